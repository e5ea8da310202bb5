pub mod deployments;
pub mod environments;
pub mod health;
pub mod sessions;
pub mod templates;

use crate::{api_docs::ApiDoc, auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub async fn create_app(pool: SqlitePool) -> anyhow::Result<Router> {
    Ok(create_app_with_state(AppState::new(pool)))
}

/// Build the router around prepared state (custom policy or engine)
pub fn create_app_with_state(state: AppState) -> Router {
    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(health::routes()) // Health routes don't need auth
        .merge(
            environments::routes()
                .merge(sessions::routes())
                .merge(deployments::routes())
                .merge(templates::routes())
                .layer(middleware::from_fn(auth_middleware)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
