pub mod api_docs;
pub mod auth;
pub mod config;
pub mod deployer;
pub mod error;
pub mod policy;
pub mod routes;
pub mod state;

pub use config::Config;
pub use deployer::spawn_deployment;
pub use error::{ApiError, ApiResult};
pub use policy::Policy;
pub use routes::{create_app, create_app_with_state};
pub use state::AppState;
