use crate::policy::Policy;
use env_orchestrator::{
    DeploymentEngine, DeploymentManager, DescriptionEngine, EnvironmentManager, SessionManager,
    TemplateManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub environments: EnvironmentManager,
    pub sessions: SessionManager,
    pub deployments: DeploymentManager,
    pub templates: TemplateManager,
    pub policy: Arc<Policy>,
    pub engine: Arc<dyn DeploymentEngine>,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            environments: EnvironmentManager::new(pool.clone()),
            sessions: SessionManager::new(pool.clone()),
            deployments: DeploymentManager::new(pool.clone()),
            templates: TemplateManager::new(pool),
            policy: Arc::new(Policy::allow_all()),
            engine: Arc::new(DescriptionEngine),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn DeploymentEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        self.environments.pool()
    }
}
