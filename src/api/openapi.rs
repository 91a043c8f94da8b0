//! OpenAPI document served next to the Swagger UI.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Top-level OpenAPI document for the registry API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Amphora Registry API",
        description = "Governance and distribution plane for agentic artifacts: \
                       MCP servers, agents, and skills.",
        version = env!("CARGO_PKG_VERSION"),
        license(name = "Apache-2.0", url = "https://www.apache.org/licenses/LICENSE-2.0")
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "servers", description = "MCP server catalogue"),
        (name = "agents", description = "Agent catalogue"),
        (name = "skills", description = "Skill catalogue"),
        (name = "deployments", description = "Deployment intent and reconciliation"),
        (name = "admin", description = "Imports, import sources, manual reconcile"),
        (name = "health", description = "Health and introspection"),
    ),
    components(schemas(
        ProblemResponse,
        crate::api::handlers::deployments::DeploymentRequest,
        crate::api::handlers::deployments::DeploymentConfigUpdate,
        crate::api::handlers::admin::ImportRequest,
        crate::api::handlers::admin::ImportResponse,
        crate::api::handlers::admin::AddRegistryRequest,
        crate::models::Deployment,
        crate::models::DeployableKind,
        crate::models::ImportRegistry,
    ))
)]
pub struct ApiDoc;

/// Problem-details body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ProblemResponse {
    /// Short human-readable summary (e.g. "Validation Failed")
    pub title: String,
    /// HTTP status code
    pub status: u16,
    /// Specific explanation of this occurrence
    pub detail: String,
}

/// Adds the bearer JWT security scheme to the spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
