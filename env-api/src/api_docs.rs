use env_orchestrator::{
    CreateEnvironmentRequest, CreateTemplateRequest, Deployment, DeploymentResult,
    EnvironmentStatus, EnvironmentView, SessionState, SessionView, Status, StatusLevel,
    TemplateView, UpdateTemplateRequest,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::environments::list_environments,
        crate::routes::environments::create_environment,
        crate::routes::environments::get_environment,
        crate::routes::environments::rename_environment,
        crate::routes::environments::delete_environment,
        crate::routes::sessions::configure_environment,
        crate::routes::sessions::get_session,
        crate::routes::sessions::delete_session,
        crate::routes::sessions::deploy_session,
        crate::routes::sessions::get_description,
        crate::routes::sessions::update_description,
        crate::routes::deployments::list_deployments,
        crate::routes::deployments::get_deployment,
        crate::routes::deployments::list_statuses,
        crate::routes::templates::list_templates,
        crate::routes::templates::create_template,
        crate::routes::templates::get_template,
        crate::routes::templates::update_template,
        crate::routes::templates::delete_template,
        crate::routes::templates::create_environment_from_template,
    ),
    components(
        schemas(
            EnvironmentView,
            EnvironmentStatus,
            CreateEnvironmentRequest,
            SessionView,
            SessionState,
            Deployment,
            DeploymentResult,
            Status,
            StatusLevel,
            TemplateView,
            CreateTemplateRequest,
            UpdateTemplateRequest
        )
    ),
    tags(
        (name = "env-api", description = "Environment Orchestration API")
    )
)]
pub struct ApiDoc;
