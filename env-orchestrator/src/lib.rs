//! Environment orchestration business logic
//!
//! This crate holds the session state machine that governs editing and
//! deploying environment descriptions, plus environment, template and
//! deployment bookkeeping. It is consumed by the env-api HTTP service but
//! can also be driven directly, e.g. from tests or a CLI.

pub mod db;
pub mod deployment;
pub mod document;
pub mod engine;
pub mod environment;
pub mod error;
pub mod session;
pub mod template;
pub mod validation;
pub mod versioned;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use deployment::{
    Deployment, DeploymentJob, DeploymentManager, DeploymentOutcome, DeploymentResult, NewStatus,
    Status, StatusLevel,
};
pub use engine::{run_deployment, DeploymentEngine, DescriptionEngine, StatusReporter};
pub use environment::{
    CreateEnvironmentRequest, Environment, EnvironmentManager, EnvironmentStatus, EnvironmentView,
};
pub use error::{OrchestratorError, Result};
pub use session::{Session, SessionManager, SessionScope, SessionState, SessionView};
pub use template::{
    CreateTemplateRequest, Template, TemplateManager, TemplateView, UpdateTemplateRequest,
};
pub use versioned::VersionedEntity;
