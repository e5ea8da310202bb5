use crate::{
    auth::RequestContext,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use env_orchestrator::{Deployment, Status};
use serde_json::json;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/environments/{env_id}/deployments",
            get(list_deployments),
        )
        .route(
            "/api/v1/environments/{env_id}/deployments/{deployment_id}",
            get(get_deployment),
        )
        .route(
            "/api/v1/environments/{env_id}/deployments/{deployment_id}/statuses",
            get(list_statuses),
        )
}

async fn environment_deployment(
    state: &AppState,
    ctx: &RequestContext,
    env_id: &str,
    deployment_id: &str,
) -> ApiResult<Deployment> {
    state.environments.get_for_tenant(env_id, &ctx.tenant).await?;

    let deployment = state.deployments.get(deployment_id).await?;
    if deployment.environment_id != env_id {
        return Err(ApiError::NotFound(format!(
            "Deployment {} not found",
            deployment_id
        )));
    }
    Ok(deployment)
}

#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}/deployments",
    params(("env_id" = String, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Deployments of the environment", body = [Deployment]),
        (status = 404, description = "Environment not found")
    ),
    tag = "deployments"
)]
pub async fn list_deployments(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(env_id): Path<String>,
) -> ApiResult<Json<Vec<Deployment>>> {
    state.policy.check(
        "list_deployments",
        &ctx,
        Some(&json!({ "tenant_id": ctx.tenant, "environment_id": env_id })),
    )?;

    state.environments.get_for_tenant(&env_id, &ctx.tenant).await?;
    let deployments = state.deployments.list(&env_id).await?;

    Ok(Json(deployments))
}

#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}/deployments/{deployment_id}",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("deployment_id" = String, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Deployment details", body = Deployment),
        (status = 404, description = "Environment or deployment not found")
    ),
    tag = "deployments"
)]
pub async fn get_deployment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, deployment_id)): Path<(String, String)>,
) -> ApiResult<Json<Deployment>> {
    state.policy.check(
        "show_deployment",
        &ctx,
        Some(&json!({ "tenant_id": ctx.tenant, "deployment_id": deployment_id })),
    )?;

    let deployment = environment_deployment(&state, &ctx, &env_id, &deployment_id).await?;

    Ok(Json(deployment))
}

/// Status log of a deployment, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}/deployments/{deployment_id}/statuses",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("deployment_id" = String, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Status entries", body = [Status]),
        (status = 404, description = "Environment or deployment not found")
    ),
    tag = "deployments"
)]
pub async fn list_statuses(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, deployment_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Status>>> {
    state.policy.check(
        "list_statuses",
        &ctx,
        Some(&json!({ "tenant_id": ctx.tenant, "deployment_id": deployment_id })),
    )?;

    environment_deployment(&state, &ctx, &env_id, &deployment_id).await?;
    let statuses = state.deployments.statuses(&deployment_id).await?;

    Ok(Json(statuses))
}
