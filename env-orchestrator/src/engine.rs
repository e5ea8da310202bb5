//! Hand-off between recorded deployments and the engine that applies them.

use crate::deployment::{Deployment, DeploymentJob, DeploymentManager, DeploymentOutcome, NewStatus, Status};
use crate::document::{self, SERVICES_PATH};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

/// Applies a session's description to real infrastructure
#[async_trait]
pub trait DeploymentEngine: Send + Sync {
    async fn apply(&self, job: &DeploymentJob, reporter: &StatusReporter) -> anyhow::Result<()>;
}

/// Appends status lines to one deployment's log
#[derive(Clone)]
pub struct StatusReporter {
    manager: DeploymentManager,
    deployment_id: String,
}

impl StatusReporter {
    pub fn new(manager: DeploymentManager, deployment_id: impl Into<String>) -> Self {
        Self {
            manager,
            deployment_id: deployment_id.into(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub async fn report(&self, status: NewStatus) -> Result<Status> {
        self.manager.append_status(&self.deployment_id, status).await
    }
}

/// Run one deployment job through `engine` and finish it
///
/// Engine errors do not propagate: they are recorded as a failed outcome.
#[instrument(skip(manager, engine, job), fields(deployment_id = %job.deployment_id))]
pub async fn run_deployment(
    manager: &DeploymentManager,
    engine: &dyn DeploymentEngine,
    job: DeploymentJob,
) -> Result<Deployment> {
    let reporter = StatusReporter::new(manager.clone(), job.deployment_id.clone());

    let outcome = match engine.apply(&job, &reporter).await {
        Ok(()) => DeploymentOutcome::Success,
        Err(e) => DeploymentOutcome::Failure {
            message: e.to_string(),
            details: Some(format!("{:#}", e)),
        },
    };

    manager.finish(&job.deployment_id, outcome).await
}

/// Engine that walks the services of a description and logs each one
///
/// Every service object gets an info line tied to its `?.id`.
#[derive(Debug, Clone, Default)]
pub struct DescriptionEngine;

#[async_trait]
impl DeploymentEngine for DescriptionEngine {
    async fn apply(&self, job: &DeploymentJob, reporter: &StatusReporter) -> anyhow::Result<()> {
        let services = match document::get_path(&job.description, SERVICES_PATH)? {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => map.values().cloned().collect(),
            Some(other) => anyhow::bail!("services node must be a list or an object, got {}", other),
            None => Vec::new(),
        };

        for service in &services {
            let name = service
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unnamed");
            let mut status = NewStatus::info(format!("Service {} applied", name));
            if let Some(id) = service.pointer("/?/id").and_then(Value::as_str) {
                status = status.for_entity("service", id);
            }
            reporter.report(status).await?;
        }

        info!(
            "Applied {} service(s) to environment {}",
            services.len(),
            job.environment_id
        );

        Ok(())
    }
}
