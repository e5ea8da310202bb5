//! Editing sessions and their state machine.
//!
//! A session is a checked-out copy of an environment's description. It is
//! created `open` with the environment's current version, moves to
//! `deploying` when a deployment is requested and to `deployed` when the
//! deployment finishes. An `open` session may instead be deleted.
//!
//! ```text
//! open ──deploy──▶ deploying ──finish──▶ deployed
//!   │
//!   └──delete──▶ deleted
//! ```
//!
//! Every transition is a guarded `UPDATE`/`INSERT` evaluated inside a single
//! transaction, so two concurrent callers can never both observe the
//! precondition and both apply the transition.

use crate::db::{from_millis, now_millis};
use crate::deployment::{insert_deployment, insert_status, DeploymentJob, NewStatus};
use crate::document;
use crate::environment::fetch_environment;
use crate::error::{OrchestratorError, Result};
use crate::versioned::{serialize_datetime, VersionedEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub environment_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub description: Value,
    pub version: i64,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Deploying,
    Deployed,
    Deleted,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Open, SessionState::Deploying)
                | (SessionState::Open, SessionState::Deleted)
                | (SessionState::Deploying, SessionState::Deployed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Deployed | SessionState::Deleted)
    }
}

/// API representation of a session; never carries the description
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub id: String,
    pub environment_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub version: i64,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            environment_id: self.environment_id.clone(),
            user_id: self.user_id.clone(),
            state: self.state,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl VersionedEntity for Session {
    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Who is asking for a session, and through which environment
#[derive(Debug, Clone, Copy)]
pub struct SessionScope<'a> {
    pub environment_id: &'a str,
    pub tenant_id: &'a str,
    /// Required owner; `None` admits any user of the tenant
    pub user_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct SessionManager {
    pool: SqlitePool,
}

impl SessionManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a session on an environment owned by `tenant_id`
    ///
    /// A tenant mismatch is reported as `Unauthorized`.
    pub async fn configure(
        &self,
        environment_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Session> {
        let environment = fetch_environment(&self.pool, environment_id).await?;
        if environment.tenant_id != tenant_id {
            warn!(
                "Tenant {} is not authorized to access environment {}",
                tenant_id, environment_id
            );
            return Err(OrchestratorError::Unauthorized(format!(
                "Environment {} belongs to another tenant",
                environment_id
            )));
        }

        self.create(environment_id, user_id).await
    }

    /// Create an open session holding a copy of the environment description
    ///
    /// Fails with `Forbidden` while the environment is deploying.
    #[instrument(skip(self))]
    pub async fn create(&self, environment_id: &str, user_id: &str) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();

        // Copy description and version in the same statement that checks the
        // environment is not deploying.
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, environment_id, user_id, state, description, version, created_at, updated_at)
            SELECT ?, e.id, ?, ?, e.description, e.version, ?, ?
            FROM environments e
            WHERE e.id = ?
              AND NOT EXISTS (SELECT 1 FROM sessions s WHERE s.environment_id = e.id AND s.state = 'deploying')
              AND NOT EXISTS (SELECT 1 FROM deployments d WHERE d.environment_id = e.id AND d.finished_at IS NULL)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(SessionState::Open)
        .bind(now)
        .bind(now)
        .bind(environment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the environment is missing (NotFound) or it is deploying
            fetch_environment(&self.pool, environment_id).await?;
            info!(
                "Could not open session for environment {}: environment is deploying",
                environment_id
            );
            return Err(OrchestratorError::Forbidden(format!(
                "Environment {} is being deployed; no new session can be opened",
                environment_id
            )));
        }

        info!("Opened session {} on environment {}", id, environment_id);

        self.get(&id).await
    }

    /// Get a single session by ID
    pub async fn get(&self, id: &str) -> Result<Session> {
        fetch_session(&self.pool, id).await
    }

    /// Get a session checked against the environment, tenant and owner it is accessed through
    ///
    /// A session tied to another environment is `NotFound`; a tenant or
    /// owner mismatch is `Unauthorized`.
    pub async fn get_scoped(&self, id: &str, scope: SessionScope<'_>) -> Result<Session> {
        let session = self.get(id).await?;

        if session.environment_id != scope.environment_id {
            warn!(
                "Session {} is not tied with environment {}",
                id, scope.environment_id
            );
            return Err(OrchestratorError::NotFound(format!("Session {}", id)));
        }

        let environment = fetch_environment(&self.pool, &session.environment_id).await?;
        if environment.tenant_id != scope.tenant_id {
            return Err(OrchestratorError::Unauthorized(format!(
                "Session {} belongs to another tenant",
                id
            )));
        }

        if let Some(user_id) = scope.user_id {
            if session.user_id != user_id {
                warn!("User {} is not authorized to access session {}", user_id, id);
                return Err(OrchestratorError::Unauthorized(format!(
                    "Session {} is owned by another user",
                    id
                )));
            }
        }

        Ok(session)
    }

    /// Check that a session is open and not stale
    ///
    /// True iff the session is `open` and its version equals the current
    /// version of its environment.
    pub async fn validate(&self, session: &Session) -> Result<bool> {
        validate_with(&self.pool, session).await
    }

    /// Replace the session's working copy of the description
    #[instrument(skip(self, description))]
    pub async fn update_description(&self, id: &str, description: Value) -> Result<Session> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET description = ?, updated_at = ?
            WHERE id = ?
              AND state = 'open'
              AND version = (SELECT e.version FROM environments e WHERE e.id = sessions.environment_id)
            "#,
        )
        .bind(serde_json::to_string(&description)?)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.get(id).await?;
            return Err(OrchestratorError::Forbidden(format!(
                "Session {} is not open or is stale",
                id
            )));
        }

        self.get(id).await
    }

    /// Read a node of the session's description
    pub async fn get_path(&self, id: &str, path: &str) -> Result<Option<Value>> {
        let session = self.get(id).await?;
        Ok(document::get_path(&session.description, path)?.cloned())
    }

    /// Write a node of the session's description
    ///
    /// The read and the write happen in one transaction holding the write
    /// lock, so concurrent edits of different nodes are all kept.
    #[instrument(skip(self, value))]
    pub async fn set_path(&self, id: &str, path: &str, value: Value) -> Result<Session> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();

        let claimed = sqlx::query(
            r#"
            UPDATE sessions SET updated_at = ?
            WHERE id = ?
              AND state = 'open'
              AND version = (SELECT e.version FROM environments e WHERE e.id = sessions.environment_id)
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let session = fetch_session(&mut *tx, id).await?;
        if claimed.rows_affected() == 0 {
            return Err(OrchestratorError::Forbidden(format!(
                "Session {} is not open or is stale",
                id
            )));
        }

        let mut description = session.description;
        document::set_path(&mut description, path, value)?;

        sqlx::query("UPDATE sessions SET description = ? WHERE id = ?")
            .bind(serde_json::to_string(&description)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let session = fetch_session(&mut *tx, id).await?;
        tx.commit().await?;

        Ok(session)
    }

    /// Move an open, current session to `deploying` and record a deployment
    ///
    /// The returned job carries the actor's token to the deployment engine;
    /// the token is never persisted.
    #[instrument(skip(self, actor_token))]
    pub async fn deploy(&self, id: &str, actor_token: &str) -> Result<DeploymentJob> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();

        // Compare-and-swap: only an open session at the environment's current
        // version, with no other deployment in flight, may flip.
        let flipped = sqlx::query(
            r#"
            UPDATE sessions SET state = ?, updated_at = ?
            WHERE id = ?
              AND state = 'open'
              AND version = (SELECT e.version FROM environments e WHERE e.id = sessions.environment_id)
              AND NOT EXISTS (
                  SELECT 1 FROM sessions other
                  WHERE other.environment_id = sessions.environment_id AND other.state = 'deploying')
              AND NOT EXISTS (
                  SELECT 1 FROM deployments d
                  WHERE d.environment_id = sessions.environment_id AND d.finished_at IS NULL)
            "#,
        )
        .bind(SessionState::Deploying)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation()) {
                OrchestratorError::Forbidden(format!(
                    "Another session of the environment of {} is deploying",
                    id
                ))
            } else {
                OrchestratorError::Database(e)
            }
        })?;

        let session = fetch_session(&mut *tx, id).await?;

        if flipped.rows_affected() == 0 {
            let reason = match session.state {
                SessionState::Open => "session is stale or environment is deploying",
                _ => "session is already deployed or deployment is in progress",
            };
            warn!("Refusing to deploy session {}: {}", id, reason);
            return Err(OrchestratorError::Forbidden(format!(
                "Session {} cannot be deployed: {}",
                id, reason
            )));
        }

        let deployment_id =
            insert_deployment(&mut *tx, &session.environment_id, &session.id, &session.description)
                .await?;
        insert_status(
            &mut *tx,
            &deployment_id,
            &NewStatus::info(format!("Deployment of session {} started", session.id))
                .for_entity("session", &session.id),
        )
        .await?;

        tx.commit().await?;

        info!(
            "Session {} is deploying to environment {} (deployment {})",
            id, session.environment_id, deployment_id
        );

        Ok(DeploymentJob {
            deployment_id,
            environment_id: session.environment_id,
            session_id: session.id,
            description: session.description,
            actor_token: actor_token.to_string(),
        })
    }

    /// Delete an open session
    ///
    /// Returns the removed session with its state set to `deleted`.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<Session> {
        let removed = sqlx::query_as::<_, SessionRow>(
            "DELETE FROM sessions WHERE id = ? AND state = 'open' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = removed else {
            let session = self.get(id).await?;
            let reason = match session.state {
                SessionState::Deploying => "it is being deployed",
                _ => "it is already closed",
            };
            warn!("Session {} could not be deleted: {}", id, reason);
            return Err(OrchestratorError::Forbidden(format!(
                "Session {} could not be deleted: {}",
                id, reason
            )));
        };

        info!("Deleted session {}", id);

        let mut session = Session::try_from(row)?;
        session.state = SessionState::Deleted;
        Ok(session)
    }
}

pub(crate) async fn fetch_session<'e, E>(executor: E, id: &str) -> Result<Session>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("Session {}", id)))?
        .try_into()
}

async fn validate_with<'e, E>(executor: E, session: &Session) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    if session.state != SessionState::Open {
        return Ok(false);
    }
    let environment = fetch_environment(executor, &session.environment_id).await?;
    Ok(session.is_current_with(&environment))
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    environment_id: String,
    user_id: String,
    state: SessionState,
    description: String,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = OrchestratorError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            environment_id: row.environment_id,
            user_id: row.user_id,
            state: row.state,
            description: serde_json::from_str(&row.description)?,
            version: row.version,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}
