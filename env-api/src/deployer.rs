use env_orchestrator::{run_deployment, DeploymentEngine, DeploymentJob, DeploymentManager};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Run a committed deployment job in the background
///
/// The request that triggered the deployment returns as soon as the job is
/// recorded; progress is visible through the deployment's status log.
pub fn spawn_deployment(
    deployments: DeploymentManager,
    engine: Arc<dyn DeploymentEngine>,
    job: DeploymentJob,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deployment_id = job.deployment_id.clone();
        info!("Starting deployment {}", deployment_id);

        match run_deployment(&deployments, engine.as_ref(), job).await {
            Ok(deployment) => info!(
                "Deployment {} finished with result {:?}",
                deployment.id, deployment.result
            ),
            Err(e) => error!("Failed to finish deployment {}: {}", deployment_id, e),
        }
    })
}
