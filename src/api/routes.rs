//! Route definitions for the API.

use axum::{middleware, routing::get, Router};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers;
use super::middleware::auth::auth_middleware;
use super::SharedState;
use crate::models::ArtifactKind;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    let openapi = super::openapi::ApiDoc::openapi();

    let v0 = Router::new()
        .nest("/servers", handlers::artifacts::router(ArtifactKind::Server))
        .nest("/agents", handlers::artifacts::router(ArtifactKind::Agent))
        .nest("/skills", handlers::artifacts::router(ArtifactKind::Skill))
        .nest("/deployments", handlers::deployments::router())
        .nest("/admin", handlers::admin::router())
        .route("/health", get(handlers::health::health_check))
        .route("/version", get(handlers::health::version))
        .route("/ping", get(handlers::health::ping))
        // Every v0 request carries an AuthContext; handlers gate mutations.
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/v0/openapi.json", openapi))
        .nest("/v0", v0)
        .route("/metrics", get(handlers::health::metrics))
        .with_state(state)
}
