use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// JSON file mapping policy actions to rules; everything is allowed without one
    #[serde(default = "default_policy_file")]
    pub policy_file: Option<PathBuf>,

    /// `json` for structured log lines, anything else for human-readable output
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_bind_addr() -> String {
    std::env::var("ENV_API_BIND").unwrap_or_else(|_| "0.0.0.0:8082".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("ENV_API_DB_PATH") {
        return PathBuf::from(path);
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("env-api").join("env.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".env-api").join("env.db")
    }
}

fn default_policy_file() -> Option<PathBuf> {
    std::env::var("ENV_API_POLICY_FILE")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn default_log_format() -> String {
    std::env::var("LOG_FORMAT").unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            policy_file: default_policy_file(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
