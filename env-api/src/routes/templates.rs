use crate::{auth::RequestContext, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use env_orchestrator::{
    CreateEnvironmentRequest, CreateTemplateRequest, SessionView, TemplateView,
    UpdateTemplateRequest,
};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/v1/templates/{template_id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route(
            "/api/v1/templates/{template_id}/create-environment",
            post(create_environment_from_template),
        )
}

fn target(ctx: &RequestContext, template_id: &str) -> Value {
    json!({ "tenant_id": ctx.tenant, "template_id": template_id })
}

#[utoipa::path(
    get,
    path = "/api/v1/templates",
    responses((status = 200, description = "Templates of the tenant", body = [TemplateView])),
    tag = "templates"
)]
pub async fn list_templates(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<Vec<TemplateView>>> {
    state.policy.check("list_templates", &ctx, None)?;

    let templates = state.templates.list(&ctx.tenant).await?;

    Ok(Json(templates.iter().map(|t| t.view()).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = TemplateView),
        (status = 400, description = "Invalid template name"),
        (status = 409, description = "Name already taken in this tenant")
    ),
    tag = "templates"
)]
pub async fn create_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateView>)> {
    state
        .policy
        .check("create_template", &ctx, Some(&json!({ "tenant_id": ctx.tenant })))?;

    let template = state.templates.create(req, &ctx.tenant).await?;

    Ok((StatusCode::CREATED, Json(template.detail_view()?)))
}

/// Show a template with its services
#[utoipa::path(
    get,
    path = "/api/v1/templates/{template_id}",
    params(("template_id" = String, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template details", body = TemplateView),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn get_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<TemplateView>> {
    state
        .policy
        .check("show_template", &ctx, Some(&target(&ctx, &template_id)))?;

    let template = state
        .templates
        .get_for_tenant(&template_id, &ctx.tenant)
        .await?;

    Ok(Json(template.detail_view()?))
}

#[utoipa::path(
    put,
    path = "/api/v1/templates/{template_id}",
    params(("template_id" = String, Path, description = "Template ID")),
    request_body = UpdateTemplateRequest,
    responses(
        (status = 200, description = "Template updated", body = TemplateView),
        (status = 400, description = "Invalid template name"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "Name already taken in this tenant")
    ),
    tag = "templates"
)]
pub async fn update_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(template_id): Path<String>,
    Json(req): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<TemplateView>> {
    state
        .policy
        .check("update_template", &ctx, Some(&target(&ctx, &template_id)))?;

    let template = state
        .templates
        .update(&template_id, &ctx.tenant, req)
        .await?;

    Ok(Json(template.detail_view()?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/templates/{template_id}",
    params(("template_id" = String, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template deleted"),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn delete_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(template_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .policy
        .check("delete_template", &ctx, Some(&target(&ctx, &template_id)))?;

    state.templates.delete(&template_id, &ctx.tenant).await?;

    Ok(Json(json!({ "message": "Template deleted" })))
}

/// Create an environment from a template
///
/// Returns the open session holding the template's services; deploying it
/// brings them into the new environment.
#[utoipa::path(
    post,
    path = "/api/v1/templates/{template_id}/create-environment",
    params(("template_id" = String, Path, description = "Template ID")),
    request_body = CreateEnvironmentRequest,
    responses(
        (status = 201, description = "Environment created, session opened", body = SessionView),
        (status = 400, description = "Invalid environment name"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "Environment name already taken")
    ),
    tag = "templates"
)]
pub async fn create_environment_from_template(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(template_id): Path<String>,
    Json(req): Json<CreateEnvironmentRequest>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    state
        .policy
        .check("create_environment", &ctx, Some(&target(&ctx, &template_id)))?;

    let session = state
        .templates
        .create_environment(&template_id, &ctx.tenant, &ctx.user, req)
        .await?;

    Ok((StatusCode::CREATED, Json(session.view())))
}
