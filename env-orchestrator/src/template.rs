use crate::db::{from_millis, now_millis};
use crate::document::{self, SERVICES_PATH};
use crate::environment::{initial_description, CreateEnvironmentRequest, EnvironmentManager};
use crate::error::{OrchestratorError, Result};
use crate::session::{Session, SessionManager};
use crate::validation::validate_name;
use crate::versioned::{serialize_datetime, VersionedEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// A reusable environment blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub version: i64,
    pub description: Value,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateView {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub version: i64,

    /// Services node of the description; only set on single-template reads
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[schema(value_type = Option<Object>)]
    pub services: Option<Value>,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[schema(value_type = Option<Object>)]
    pub description: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTemplateRequest {
    pub name: String,
    #[schema(value_type = Option<Object>)]
    pub description: Option<Value>,
}

impl Template {
    pub fn view(&self) -> TemplateView {
        TemplateView {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            name: self.name.clone(),
            version: self.version,
            services: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// View including the services node
    pub fn detail_view(&self) -> Result<TemplateView> {
        let mut view = self.view();
        view.services = document::get_path(&self.description, SERVICES_PATH)?.cloned();
        Ok(view)
    }
}

impl VersionedEntity for Template {
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

#[derive(Clone)]
pub struct TemplateManager {
    pool: SqlitePool,
    environments: EnvironmentManager,
    sessions: SessionManager,
}

impl TemplateManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            environments: EnvironmentManager::new(pool.clone()),
            sessions: SessionManager::new(pool.clone()),
            pool,
        }
    }

    /// Create a template
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(&self, req: CreateTemplateRequest, tenant_id: &str) -> Result<Template> {
        validate_name(&req.name)?;

        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let description = req
            .description
            .unwrap_or_else(|| initial_description(&id, &req.name));

        sqlx::query(
            r#"
            INSERT INTO templates (id, tenant_id, name, version, description, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?, ?)
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
                format!("Template with name '{}' already exists", req.name),
            )
        })?;

        info!("Created template {} ({})", req.name, id);

        self.get(&id).await
    }

    /// List the templates of a tenant
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Template>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT * FROM templates WHERE tenant_id = ? ORDER BY created_at DESC, name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Template::try_from).collect()
    }

    /// Get a single template by ID
    pub async fn get(&self, id: &str) -> Result<Template> {
        sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Template {}", id)))?
            .try_into()
    }

    /// Get a template, reporting a tenant mismatch as not found
    pub async fn get_for_tenant(&self, id: &str, tenant_id: &str) -> Result<Template> {
        let template = self.get(id).await?;
        if template.tenant_id != tenant_id {
            return Err(OrchestratorError::NotFound(format!("Template {}", id)));
        }
        Ok(template)
    }

    /// Rename a template and optionally replace its description
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn update(
        &self,
        id: &str,
        tenant_id: &str,
        req: UpdateTemplateRequest,
    ) -> Result<Template> {
        validate_name(&req.name)?;
        let template = self.get_for_tenant(id, tenant_id).await?;
        let description = req.description.unwrap_or(template.description);

        sqlx::query(
            "UPDATE templates SET name = ?, description = ?, version = version + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(&req.name)
        .bind(serde_json::to_string(&description)?)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::conflict_on_unique(
                e,
                format!("Template with name '{}' already exists", req.name),
            )
        })?;

        self.get(id).await
    }

    /// Delete a template
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str, tenant_id: &str) -> Result<()> {
        self.get_for_tenant(id, tenant_id).await?;

        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("Template {}", id)));
        }

        info!("Deleted template {}", id);
        Ok(())
    }

    /// Create an environment from a template and open a session on it
    ///
    /// The template's services node, if any, is copied into the session's
    /// description; it reaches the environment when the session is deployed.
    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_environment(
        &self,
        template_id: &str,
        tenant_id: &str,
        user_id: &str,
        req: CreateEnvironmentRequest,
    ) -> Result<Session> {
        validate_name(&req.name)?;
        let template = self.get_for_tenant(template_id, tenant_id).await?;

        let environment = self.environments.create(req, tenant_id).await?;
        let session = self.sessions.create(&environment.id, user_id).await?;

        match document::get_path(&template.description, SERVICES_PATH)? {
            Some(services) => {
                info!(
                    "Copying services of template {} into environment {}",
                    template.id, environment.id
                );
                self.sessions
                    .set_path(&session.id, SERVICES_PATH, services.clone())
                    .await
            }
            None => Ok(session),
        }
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    tenant_id: String,
    name: String,
    version: i64,
    description: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TemplateRow> for Template {
    type Error = OrchestratorError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            version: row.version,
            description: serde_json::from_str(&row.description)?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}
