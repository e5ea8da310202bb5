use crate::{auth::RequestContext, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use env_orchestrator::{CreateEnvironmentRequest, EnvironmentView};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/environments",
            get(list_environments).post(create_environment),
        )
        .route(
            "/api/v1/environments/{env_id}",
            get(get_environment)
                .put(rename_environment)
                .delete(delete_environment),
        )
}

fn target(ctx: &RequestContext, env_id: &str) -> Value {
    json!({ "tenant_id": ctx.tenant, "environment_id": env_id })
}

/// List the environments of the caller's tenant
#[utoipa::path(
    get,
    path = "/api/v1/environments",
    responses(
        (status = 200, description = "Environments of the tenant", body = [EnvironmentView]),
        (status = 401, description = "Missing identity headers")
    ),
    tag = "environments"
)]
pub async fn list_environments(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<Vec<EnvironmentView>>> {
    state.policy.check("list_environments", &ctx, None)?;

    let environments = state.environments.list(&ctx.tenant).await?;

    let mut views = Vec::with_capacity(environments.len());
    for environment in environments {
        let status = state.environments.get_status(&environment.id).await?;
        views.push(environment.view(status));
    }

    Ok(Json(views))
}

#[utoipa::path(
    post,
    path = "/api/v1/environments",
    request_body = CreateEnvironmentRequest,
    responses(
        (status = 201, description = "Environment created", body = EnvironmentView),
        (status = 400, description = "Invalid environment name"),
        (status = 409, description = "Name already taken in this tenant")
    ),
    tag = "environments"
)]
pub async fn create_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateEnvironmentRequest>,
) -> ApiResult<(StatusCode, Json<EnvironmentView>)> {
    state
        .policy
        .check("create_environment", &ctx, Some(&json!({ "tenant_id": ctx.tenant })))?;

    let environment = state.environments.create(req, &ctx.tenant).await?;
    let status = state.environments.get_status(&environment.id).await?;

    Ok((StatusCode::CREATED, Json(environment.view(status))))
}

/// Show an environment with its derived status and deployed services
#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}",
    params(("env_id" = String, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Environment details", body = EnvironmentView),
        (status = 404, description = "Environment not found")
    ),
    tag = "environments"
)]
pub async fn get_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(env_id): Path<String>,
) -> ApiResult<Json<EnvironmentView>> {
    state
        .policy
        .check("show_environment", &ctx, Some(&target(&ctx, &env_id)))?;

    let environment = state.environments.get_for_tenant(&env_id, &ctx.tenant).await?;
    let status = state.environments.get_status(&env_id).await?;

    Ok(Json(environment.detail_view(status)?))
}

#[utoipa::path(
    put,
    path = "/api/v1/environments/{env_id}",
    params(("env_id" = String, Path, description = "Environment ID")),
    request_body = CreateEnvironmentRequest,
    responses(
        (status = 200, description = "Environment renamed", body = EnvironmentView),
        (status = 400, description = "Invalid environment name"),
        (status = 404, description = "Environment not found"),
        (status = 409, description = "Name already taken in this tenant")
    ),
    tag = "environments"
)]
pub async fn rename_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(env_id): Path<String>,
    Json(req): Json<CreateEnvironmentRequest>,
) -> ApiResult<Json<EnvironmentView>> {
    state
        .policy
        .check("update_environment", &ctx, Some(&target(&ctx, &env_id)))?;

    let environment = state
        .environments
        .rename(&env_id, &ctx.tenant, &req.name)
        .await?;
    let status = state.environments.get_status(&env_id).await?;

    Ok(Json(environment.view(status)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/environments/{env_id}",
    params(("env_id" = String, Path, description = "Environment ID")),
    responses(
        (status = 200, description = "Environment deleted"),
        (status = 403, description = "Environment is being deployed"),
        (status = 404, description = "Environment not found")
    ),
    tag = "environments"
)]
pub async fn delete_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(env_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .policy
        .check("delete_environment", &ctx, Some(&target(&ctx, &env_id)))?;

    state.environments.delete(&env_id, &ctx.tenant).await?;

    Ok(Json(json!({ "message": "Environment deleted" })))
}
