use crate::db::{from_millis, now_millis};
use crate::document::{self, SERVICES_PATH};
use crate::error::{OrchestratorError, Result};
use crate::validation::validate_name;
use crate::versioned::{serialize_datetime, VersionedEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// A tenant-owned environment with its live description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub version: i64,
    pub description: Value,
    pub networking: Value,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Status derived from an environment's sessions and deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Ready,
    Deploying,
}

/// API representation of an environment; never carries the description
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentView {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub version: i64,
    #[schema(value_type = Object)]
    pub networking: Value,
    pub status: EnvironmentStatus,

    /// Only present on the detail view
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub services: Option<Value>,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateEnvironmentRequest {
    pub name: String,
}

impl Environment {
    pub fn view(&self, status: EnvironmentStatus) -> EnvironmentView {
        EnvironmentView {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            name: self.name.clone(),
            version: self.version,
            networking: self.networking.clone(),
            status,
            services: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// View including the deployed services node
    pub fn detail_view(&self, status: EnvironmentStatus) -> Result<EnvironmentView> {
        let mut view = self.view(status);
        view.services = document::get_path(&self.description, SERVICES_PATH)?.cloned();
        Ok(view)
    }
}

impl VersionedEntity for Environment {
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

pub(crate) fn initial_description(id: &str, name: &str) -> Value {
    json!({
        "Objects": {
            "?": { "id": id },
            "name": name,
        },
        "Attributes": [],
    })
}

#[derive(Clone)]
pub struct EnvironmentManager {
    pool: SqlitePool,
}

impl EnvironmentManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new environment at version 0
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(&self, req: CreateEnvironmentRequest, tenant_id: &str) -> Result<Environment> {
        validate_name(&req.name)?;

        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let description = initial_description(&id, &req.name);

        sqlx::query(
            r#"
            INSERT INTO environments (id, tenant_id, name, version, description, networking, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, '{}', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&req.name)
        .bind(serde_json::to_string(&description)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::conflict_on_unique(
                e,
                format!("Environment with name '{}' already exists", req.name),
            )
        })?;

        info!("Created environment {} ({})", req.name, id);

        self.get(&id).await
    }

    /// List the environments of a tenant
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Environment>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT * FROM environments WHERE tenant_id = ? ORDER BY created_at DESC, name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Environment::try_from).collect()
    }

    /// Get a single environment by ID
    pub async fn get(&self, id: &str) -> Result<Environment> {
        fetch_environment(&self.pool, id).await
    }

    /// Get an environment, reporting a tenant mismatch as not found
    pub async fn get_for_tenant(&self, id: &str, tenant_id: &str) -> Result<Environment> {
        let environment = self.get(id).await?;
        if environment.tenant_id != tenant_id {
            return Err(OrchestratorError::NotFound(format!("Environment {}", id)));
        }
        Ok(environment)
    }

    /// Rename an environment
    #[instrument(skip(self))]
    pub async fn rename(&self, id: &str, tenant_id: &str, name: &str) -> Result<Environment> {
        validate_name(name)?;
        self.get_for_tenant(id, tenant_id).await?;

        // The live description carries the name as well
        sqlx::query(
            "UPDATE environments
             SET name = ?, description = json_set(description, '$.Objects.name', ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(name)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::conflict_on_unique(
                e,
                format!("Environment with name '{}' already exists", name),
            )
        })?;

        self.get(id).await
    }

    /// Delete an environment together with its sessions, deployments and statuses
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str, tenant_id: &str) -> Result<()> {
        self.get_for_tenant(id, tenant_id).await?;

        let mut tx = self.pool.begin().await?;

        // The first statement is a write so the transaction holds the write
        // lock before it looks at deployment state.
        let claimed = sqlx::query(
            r#"
            UPDATE environments SET updated_at = ?
            WHERE id = ?
              AND NOT EXISTS (SELECT 1 FROM sessions s WHERE s.environment_id = environments.id AND s.state = 'deploying')
              AND NOT EXISTS (SELECT 1 FROM deployments d WHERE d.environment_id = environments.id AND d.finished_at IS NULL)
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            fetch_environment(&mut *tx, id).await?;
            return Err(OrchestratorError::Forbidden(format!(
                "Environment {} is being deployed and cannot be deleted",
                id
            )));
        }

        sqlx::query(
            "DELETE FROM statuses WHERE deployment_id IN
                (SELECT id FROM deployments WHERE environment_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM deployments WHERE environment_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sessions WHERE environment_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM environments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("Environment {}", id)));
        }

        tx.commit().await?;

        info!("Deleted environment {}", id);
        Ok(())
    }

    /// Derive the status of an environment from its sessions and deployments
    pub async fn get_status(&self, id: &str) -> Result<EnvironmentStatus> {
        // Surface a missing environment rather than reporting it as ready
        self.get(id).await?;
        status_of(&self.pool, id).await
    }
}

pub(crate) async fn fetch_environment<'e, E>(executor: E, id: &str) -> Result<Environment>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("Environment {}", id)))?
        .try_into()
}

pub(crate) async fn status_of<'e, E>(executor: E, environment_id: &str) -> Result<EnvironmentStatus>
where
    E: SqliteExecutor<'e>,
{
    let busy: i64 = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM sessions WHERE environment_id = ? AND state = 'deploying')
             OR EXISTS (SELECT 1 FROM deployments WHERE environment_id = ? AND finished_at IS NULL)",
    )
    .bind(environment_id)
    .bind(environment_id)
    .fetch_one(executor)
    .await?;

    Ok(if busy != 0 {
        EnvironmentStatus::Deploying
    } else {
        EnvironmentStatus::Ready
    })
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    id: String,
    tenant_id: String,
    name: String,
    version: i64,
    description: String,
    networking: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<EnvironmentRow> for Environment {
    type Error = OrchestratorError;

    fn try_from(row: EnvironmentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            version: row.version,
            description: serde_json::from_str(&row.description)?,
            networking: serde_json::from_str(&row.networking)?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}
