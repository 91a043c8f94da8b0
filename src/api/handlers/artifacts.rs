//! Catalogue handlers, shared by servers, agents, and skills.
//!
//! One router per kind is built from the same handler set; the kind rides
//! along as a request extension.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::dto::{ListQuery, ListResponse};
use crate::api::middleware::auth::AuthContext;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::{ArtifactDescriptor, ArtifactKind, ArtifactStatus, StoredVersion};
use crate::services::auth::PermissionAction;
use crate::store::VersionFilter;

/// Build the catalogue routes for one artifact kind.
pub fn router(kind: ArtifactKind) -> Router<SharedState> {
    Router::new()
        .route("/", get(list_artifacts))
        .route("/publish", post(publish_artifact))
        .route("/:name/versions", get(get_all_versions))
        .route(
            "/:name/versions/:version",
            get(get_artifact)
                .put(update_artifact)
                .delete(delete_artifact),
        )
        .route(
            "/:name/versions/:version/readme",
            get(get_readme).put(put_readme),
        )
        .layer(Extension(kind))
}

/// List versions with filtering and keyset pagination.
pub async fn list_artifacts(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<StoredVersion>>> {
    let filter = VersionFilter {
        search: query.search.clone(),
        version: query.version.clone(),
        updated_since: query.updated_since,
        remote_url: None,
    };
    let page = state
        .catalog
        .list(kind, &filter, query.cursor.as_deref(), query.effective_limit())
        .await?;
    Ok(Json(ListResponse::new(page.items, page.next_cursor)))
}

/// Publish a new version. Requires a publish capability for the name.
pub async fn publish_artifact(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Extension(auth): Extension<AuthContext>,
    Json(descriptor): Json<ArtifactDescriptor>,
) -> Result<Json<StoredVersion>> {
    auth.require(PermissionAction::Publish, &descriptor.name)?;
    let stored = state.catalog.publish(kind, descriptor).await?;
    Ok(Json(stored))
}

/// Fetch one version; `latest` resolves the latest-flagged row.
pub async fn get_artifact(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<StoredVersion>> {
    let stored = if version == "latest" {
        state.catalog.get_latest(kind, &name).await?
    } else {
        state.catalog.get(kind, &name, &version).await?
    };
    Ok(Json(stored))
}

pub async fn get_all_versions(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Path(name): Path<String>,
) -> Result<Json<ListResponse<StoredVersion>>> {
    let versions = state.catalog.get_all_versions(kind, &name).await?;
    Ok(Json(ListResponse::new(versions, None)))
}

/// Update body: the descriptor plus an optional status transition.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub status: Option<ArtifactStatus>,
    #[serde(flatten)]
    pub descriptor: ArtifactDescriptor,
}

pub async fn update_artifact(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<StoredVersion>> {
    auth.require(PermissionAction::Publish, &name)?;
    let stored = state
        .catalog
        .update(kind, &name, &version, body.descriptor, body.status)
        .await?;
    Ok(Json(stored))
}

/// Logical delete: tombstones the version.
pub async fn delete_artifact(
    State(state): State<SharedState>,
    Extension(kind): Extension<ArtifactKind>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<StoredVersion>> {
    auth.require(PermissionAction::Publish, &name)?;
    let stored = state.catalog.delete(kind, &name, &version).await?;
    Ok(Json(stored))
}

pub async fn get_readme(
    State(state): State<SharedState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Response> {
    let readme = state.catalog.get_readme(&name, &version).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, readme.content_type.clone())],
        readme.content,
    )
        .into_response())
}

pub async fn put_readme(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    auth.require(PermissionAction::Publish, &name)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/markdown");
    state
        .catalog
        .put_readme(&name, &version, &body, content_type)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
