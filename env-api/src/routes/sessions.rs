use crate::{
    auth::RequestContext,
    deployer::spawn_deployment,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use env_orchestrator::{Deployment, Session, SessionScope, SessionView};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/environments/{env_id}/configure",
            post(configure_environment),
        )
        .route(
            "/api/v1/environments/{env_id}/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route(
            "/api/v1/environments/{env_id}/sessions/{session_id}/deploy",
            post(deploy_session),
        )
        .route(
            "/api/v1/environments/{env_id}/sessions/{session_id}/description",
            get(get_description).put(update_description),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DescriptionQuery {
    /// JSON pointer into the description; the whole document when empty
    #[serde(default)]
    pub path: String,
}

fn target(ctx: &RequestContext, env_id: &str, session_id: &str) -> Value {
    json!({
        "tenant_id": ctx.tenant,
        "environment_id": env_id,
        "session_id": session_id,
    })
}

/// Fetch a session owned by the caller through the environment it belongs to
async fn owned_session(
    state: &AppState,
    ctx: &RequestContext,
    env_id: &str,
    session_id: &str,
) -> ApiResult<Session> {
    let scope = SessionScope {
        environment_id: env_id,
        tenant_id: &ctx.tenant,
        user_id: Some(&ctx.user),
    };
    Ok(state.sessions.get_scoped(session_id, scope).await?)
}

/// Open an editing session on an environment
#[utoipa::path(
    post,
    path = "/api/v1/environments/{env_id}/configure",
    params(("env_id" = String, Path, description = "Environment ID")),
    responses(
        (status = 201, description = "Session opened", body = SessionView),
        (status = 401, description = "Environment belongs to another tenant"),
        (status = 403, description = "Environment is being deployed"),
        (status = 404, description = "Environment not found")
    ),
    tag = "sessions"
)]
pub async fn configure_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(env_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    state.policy.check(
        "create_session",
        &ctx,
        Some(&json!({ "tenant_id": ctx.tenant, "environment_id": env_id })),
    )?;

    let session = state
        .sessions
        .configure(&env_id, &ctx.tenant, &ctx.user)
        .await?;

    Ok((StatusCode::CREATED, Json(session.view())))
}

#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}/sessions/{session_id}",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("session_id" = String, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 401, description = "Session belongs to another tenant or user"),
        (status = 403, description = "Session is closed or stale"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<SessionView>> {
    state
        .policy
        .check("show_session", &ctx, Some(&target(&ctx, &env_id, &session_id)))?;

    let session = owned_session(&state, &ctx, &env_id, &session_id).await?;
    if !state.sessions.validate(&session).await? {
        return Err(ApiError::Forbidden(format!(
            "Session {} is not valid",
            session_id
        )));
    }

    Ok(Json(session.view()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/environments/{env_id}/sessions/{session_id}",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("session_id" = String, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Session deleted", body = SessionView),
        (status = 401, description = "Session belongs to another tenant or user"),
        (status = 403, description = "Session is being deployed or already closed"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, session_id)): Path<(String, String)>,
) -> ApiResult<Json<SessionView>> {
    state
        .policy
        .check("delete_session", &ctx, Some(&target(&ctx, &env_id, &session_id)))?;

    owned_session(&state, &ctx, &env_id, &session_id).await?;
    let deleted = state.sessions.delete(&session_id).await?;

    Ok(Json(deleted.view()))
}

/// Deploy a session's description to its environment
///
/// Returns once the deployment is recorded; the engine runs in the
/// background and reports through the deployment's status log.
#[utoipa::path(
    post,
    path = "/api/v1/environments/{env_id}/sessions/{session_id}/deploy",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("session_id" = String, Path, description = "Session ID")
    ),
    responses(
        (status = 202, description = "Deployment started", body = Deployment),
        (status = 401, description = "Session belongs to another tenant"),
        (status = 403, description = "Session is closed, stale or another deployment is running"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn deploy_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, session_id)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    state
        .policy
        .check("deploy_session", &ctx, Some(&target(&ctx, &env_id, &session_id)))?;

    // Any user of the tenant may deploy
    let scope = SessionScope {
        environment_id: &env_id,
        tenant_id: &ctx.tenant,
        user_id: None,
    };
    state.sessions.get_scoped(&session_id, scope).await?;

    let job = state.sessions.deploy(&session_id, &ctx.auth_token).await?;
    let deployment = state.deployments.get(&job.deployment_id).await?;

    spawn_deployment(state.deployments.clone(), state.engine.clone(), job);

    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/environments/{env_id}/sessions/{session_id}/description",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("session_id" = String, Path, description = "Session ID"),
        DescriptionQuery
    ),
    responses(
        (status = 200, description = "Node of the session's description", body = serde_json::Value),
        (status = 404, description = "Session or path not found")
    ),
    tag = "sessions"
)]
pub async fn get_description(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, session_id)): Path<(String, String)>,
    Query(query): Query<DescriptionQuery>,
) -> ApiResult<Json<Value>> {
    state
        .policy
        .check("show_description", &ctx, Some(&target(&ctx, &env_id, &session_id)))?;

    owned_session(&state, &ctx, &env_id, &session_id).await?;

    let node = state
        .sessions
        .get_path(&session_id, &query.path)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Path {} not found", query.path)))?;

    Ok(Json(node))
}

/// Write a node of the session's description
#[utoipa::path(
    put,
    path = "/api/v1/environments/{env_id}/sessions/{session_id}/description",
    params(
        ("env_id" = String, Path, description = "Environment ID"),
        ("session_id" = String, Path, description = "Session ID"),
        DescriptionQuery
    ),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Description updated", body = SessionView),
        (status = 400, description = "Malformed path"),
        (status = 403, description = "Session is closed or stale"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn update_description(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((env_id, session_id)): Path<(String, String)>,
    Query(query): Query<DescriptionQuery>,
    Json(value): Json<Value>,
) -> ApiResult<Json<SessionView>> {
    state
        .policy
        .check("update_description", &ctx, Some(&target(&ctx, &env_id, &session_id)))?;

    owned_session(&state, &ctx, &env_id, &session_id).await?;
    let session = state
        .sessions
        .set_path(&session_id, &query.path, value)
        .await?;

    Ok(Json(session.view()))
}
