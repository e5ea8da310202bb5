//! Validation of human-supplied names for environments and templates.

use crate::error::{OrchestratorError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Regex for validating environment and template names
static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z]+[a-zA-Z0-9_-]*$")
        .expect("Name regex should compile - this is a static pattern")
});

/// Validate an environment or template name
///
/// A name must start with a letter, followed only by letters, digits,
/// underscores or hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidInput(format!(
            "Invalid name '{}': must start with a letter and contain only alphanumeric, '_' or '-' characters",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_names() {
        for name in ["abc-1_2", "a", "Production", "web_tier-2", "x9"] {
            assert!(validate_name(name).is_ok(), "expected {} to be valid", name);
        }
    }

    #[test]
    fn test_rejects_leading_non_letter() {
        for name in ["1abc", "_abc", "-abc", ""] {
            assert!(
                matches!(validate_name(name), Err(OrchestratorError::InvalidInput(_))),
                "expected {:?} to be rejected",
                name
            );
        }
    }

    #[test]
    fn test_rejects_punctuation_and_whitespace() {
        assert!(validate_name("abc def").is_err());
        assert!(validate_name("abc.def").is_err());
        assert!(validate_name("abc/def").is_err());
        assert!(validate_name("abc\n").is_err());
    }
}
