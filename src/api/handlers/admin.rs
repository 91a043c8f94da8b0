//! Administrative handlers: imports, manual reconcile, import sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::dto::ListResponse;
use crate::api::middleware::auth::AuthContext;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::ImportRegistry;
use crate::services::auth::PermissionAction;
use crate::services::importer::ImportService;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/import", post(import))
        .route("/reconcile", post(reconcile))
        .route("/registries", get(list_registries).post(add_registry))
        .route("/registries/:id", axum::routing::delete(remove_registry))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportRequest {
    /// Seed file path/URL or a paginated registry endpoint.
    pub source: String,
    /// Extra HTTP headers sent to the source.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Update entries whose version already exists.
    #[serde(default)]
    pub update: bool,
    /// Skip upstream registry validation for this import even when the
    /// instance has it enabled.
    #[serde(default)]
    pub skip_validation: bool,
    /// Name of a registered import source to attribute rows to; removing
    /// that source later deletes the rows it contributed.
    #[serde(default)]
    pub registry: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportResponse {
    pub imported: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Run an import synchronously and report its counts. Per-entry failures
/// are part of the tally, not an error.
pub async fn import(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportResponse>> {
    auth.require(PermissionAction::Publish, "*")?;

    // Imports from trusted registries commonly skip upstream package
    // validation; build a non-validating catalogue for this run when asked.
    let catalog: Arc<dyn crate::services::catalog::Catalog> =
        if body.skip_validation && state.config.enable_registry_validation {
            Arc::new(
                crate::services::catalog::CatalogService::new(state.store.clone(), false)
                    .with_embeddings(state.embeddings.clone()),
            )
        } else {
            Arc::clone(&state.catalog)
        };

    let mut importer = ImportService::new(catalog)
        .with_update_existing(body.update)
        .with_source_headers(body.headers)
        .with_source_label(body.registry);
    if state.config.enrich_server_data {
        importer = importer.with_enrichment(state.config.github_token.clone());
    }

    let summary = importer.import_from_path(&body.source).await?;
    Ok(Json(ImportResponse {
        imported: summary.imported,
        updated: summary.updated,
        failed: summary.failed,
    }))
}

/// Trigger a full reconcile of all runtime targets.
pub async fn reconcile(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode> {
    auth.require(PermissionAction::Deploy, "*")?;
    state.deployments.reconcile_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddRegistryRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub registry_type: Option<String>,
}

pub async fn list_registries(
    State(state): State<SharedState>,
) -> Result<Json<ListResponse<ImportRegistry>>> {
    let registries = state.store.list_registries().await?;
    Ok(Json(ListResponse::new(registries, None)))
}

pub async fn add_registry(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<AddRegistryRequest>,
) -> Result<Json<ImportRegistry>> {
    auth.require(PermissionAction::Publish, "*")?;
    let registry = state
        .store
        .add_registry(
            &body.name,
            &body.url,
            body.registry_type.as_deref().unwrap_or("mcp"),
        )
        .await?;
    Ok(Json(registry))
}

pub async fn remove_registry(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    auth.require(PermissionAction::Publish, "*")?;
    state.store.remove_registry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
