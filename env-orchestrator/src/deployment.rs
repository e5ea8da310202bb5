use crate::db::{from_millis, now_millis};
use crate::error::{OrchestratorError, Result};
use crate::session::SessionState;
use crate::versioned::{serialize_datetime, serialize_optional_datetime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{SqliteExecutor, SqlitePool};
use std::fmt;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A recorded attempt to apply a session's description to its environment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Deployment {
    pub id: String,
    pub environment_id: String,
    pub session_id: String,
    #[schema(value_type = Object)]
    pub description: Value,
    pub result: Option<DeploymentResult>,

    #[serde(serialize_with = "serialize_datetime")]
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_optional_datetime")]
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// One append-only line of a deployment's log
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Status {
    pub id: String,
    pub deployment_id: String,
    pub entity_id: Option<String>,
    pub entity: Option<String>,
    pub level: StatusLevel,
    pub text: String,
    pub details: Option<String>,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewStatus {
    pub entity_id: Option<String>,
    pub entity: Option<String>,
    pub level: StatusLevel,
    pub text: String,
    pub details: Option<String>,
}

impl NewStatus {
    pub fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            entity: None,
            level,
            text: text.into(),
            details: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, text)
    }

    /// Tie the status to a sub-entity, e.g. `("service", "<id>")`
    pub fn for_entity(mut self, entity: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// How a deployment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Success,
    Failure {
        message: String,
        details: Option<String>,
    },
}

/// Work handed to a deployment engine
#[derive(Clone)]
pub struct DeploymentJob {
    pub deployment_id: String,
    pub environment_id: String,
    pub session_id: String,
    pub description: Value,
    /// Credentials of the actor who requested the deployment
    pub actor_token: String,
}

impl fmt::Debug for DeploymentJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentJob")
            .field("deployment_id", &self.deployment_id)
            .field("environment_id", &self.environment_id)
            .field("session_id", &self.session_id)
            .field("actor_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DeploymentManager {
    pool: SqlitePool,
}

impl DeploymentManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// List the deployments of an environment, newest first
    pub async fn list(&self, environment_id: &str) -> Result<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE environment_id = ? ORDER BY started_at DESC, created_at DESC",
        )
        .bind(environment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Deployment::try_from).collect()
    }

    /// Get a single deployment by ID
    pub async fn get(&self, id: &str) -> Result<Deployment> {
        fetch_deployment(&self.pool, id).await
    }

    /// Status log of a deployment in append order
    pub async fn statuses(&self, deployment_id: &str) -> Result<Vec<Status>> {
        self.get(deployment_id).await?;

        let rows = sqlx::query_as::<_, StatusRow>(
            "SELECT * FROM statuses WHERE deployment_id = ? ORDER BY seq",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Status::from).collect())
    }

    /// Append a status line to a running deployment
    pub async fn append_status(&self, deployment_id: &str, status: NewStatus) -> Result<Status> {
        let id = insert_status(&self.pool, deployment_id, &status).await?;

        match id {
            Some(id) => fetch_status(&self.pool, &id).await,
            None => {
                self.get(deployment_id).await?;
                Err(OrchestratorError::Forbidden(format!(
                    "Deployment {} is finished; its status log is closed",
                    deployment_id
                )))
            }
        }
    }

    /// Complete a deployment
    ///
    /// In one transaction: the environment version is bumped by one and its
    /// description replaced by the session's, the session moves to
    /// `deployed`, and the deployment is stamped finished with a final
    /// status line. A failed run closes the session the same way; the error
    /// is kept in the status log.
    #[instrument(skip(self))]
    pub async fn finish(&self, id: &str, outcome: DeploymentOutcome) -> Result<Deployment> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();

        let (result, final_status) = match &outcome {
            DeploymentOutcome::Success => (
                DeploymentResult::Success,
                NewStatus::info("Deployment finished"),
            ),
            DeploymentOutcome::Failure { message, details } => {
                let mut status = NewStatus::error(format!("Deployment failed: {}", message));
                status.details = details.clone();
                (DeploymentResult::Failure, status)
            }
        };

        // Add the final line while the deployment is still open
        insert_status(&mut *tx, id, &final_status).await?;

        let stamped = sqlx::query(
            "UPDATE deployments SET finished_at = ?, result = ?, updated_at = ?
             WHERE id = ? AND finished_at IS NULL",
        )
        .bind(now)
        .bind(result)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let deployment = fetch_deployment(&mut *tx, id).await?;

        if stamped.rows_affected() == 0 {
            return Err(OrchestratorError::InvalidState(format!(
                "Deployment {} is already finished",
                id
            )));
        }

        let closed = sqlx::query(
            "UPDATE sessions SET state = ?, updated_at = ? WHERE id = ? AND state = 'deploying'",
        )
        .bind(SessionState::Deployed)
        .bind(now)
        .bind(&deployment.session_id)
        .execute(&mut *tx)
        .await?;

        if closed.rows_affected() == 0 {
            return Err(OrchestratorError::InvalidState(format!(
                "Session {} of deployment {} is not deploying",
                deployment.session_id, id
            )));
        }

        sqlx::query(
            "UPDATE environments
             SET version = version + 1,
                 description = (SELECT s.description FROM sessions s WHERE s.id = ?),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&deployment.session_id)
        .bind(now)
        .bind(&deployment.environment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        match outcome {
            DeploymentOutcome::Success => info!(
                "Deployment {} of environment {} finished",
                id, deployment.environment_id
            ),
            DeploymentOutcome::Failure { message, .. } => warn!(
                "Deployment {} of environment {} failed: {}",
                id, deployment.environment_id, message
            ),
        }

        Ok(deployment)
    }
}

pub(crate) async fn insert_deployment<'e, E>(
    executor: E,
    environment_id: &str,
    session_id: &str,
    description: &Value,
) -> Result<String>
where
    E: SqliteExecutor<'e>,
{
    let id = Uuid::new_v4().to_string();
    let now = now_millis();

    sqlx::query(
        "INSERT INTO deployments (id, environment_id, session_id, description, started_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(environment_id)
    .bind(session_id)
    .bind(serde_json::to_string(description)?)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(id)
}

/// Insert a status line if the deployment is still running
///
/// Returns the new status ID, or `None` when the deployment is missing or finished.
pub(crate) async fn insert_status<'e, E>(
    executor: E,
    deployment_id: &str,
    status: &NewStatus,
) -> Result<Option<String>>
where
    E: SqliteExecutor<'e>,
{
    let id = Uuid::new_v4().to_string();
    let now = now_millis();

    let result = sqlx::query(
        r#"
        INSERT INTO statuses (id, deployment_id, entity_id, entity, level, text, details, seq, created_at, updated_at)
        SELECT ?, d.id, ?, ?, ?, ?, ?,
               (SELECT COALESCE(MAX(s.seq), 0) + 1 FROM statuses s WHERE s.deployment_id = d.id),
               ?, ?
        FROM deployments d
        WHERE d.id = ? AND d.finished_at IS NULL
        "#,
    )
    .bind(&id)
    .bind(&status.entity_id)
    .bind(&status.entity)
    .bind(status.level)
    .bind(&status.text)
    .bind(&status.details)
    .bind(now)
    .bind(now)
    .bind(deployment_id)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() == 1).then_some(id))
}

pub(crate) async fn fetch_deployment<'e, E>(executor: E, id: &str) -> Result<Deployment>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("Deployment {}", id)))?
        .try_into()
}

async fn fetch_status<'e, E>(executor: E, id: &str) -> Result<Status>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, StatusRow>("SELECT * FROM statuses WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("Status {}", id)))?;

    Ok(row.into())
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: String,
    environment_id: String,
    session_id: String,
    description: String,
    result: Option<DeploymentResult>,
    started_at: i64,
    finished_at: Option<i64>,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: String,
    deployment_id: String,
    entity_id: Option<String>,
    entity: Option<String>,
    level: StatusLevel,
    text: String,
    details: Option<String>,
    created_at: i64,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = OrchestratorError;

    fn try_from(row: DeploymentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            environment_id: row.environment_id,
            session_id: row.session_id,
            description: serde_json::from_str(&row.description)?,
            result: row.result,
            started_at: from_millis(row.started_at),
            finished_at: row.finished_at.map(from_millis),
            updated_at: from_millis(row.updated_at),
        })
    }
}

impl From<StatusRow> for Status {
    fn from(row: StatusRow) -> Self {
        Self {
            id: row.id,
            deployment_id: row.deployment_id,
            entity_id: row.entity_id,
            entity: row.entity,
            level: row.level,
            text: row.text,
            details: row.details,
            created_at: from_millis(row.created_at),
        }
    }
}
