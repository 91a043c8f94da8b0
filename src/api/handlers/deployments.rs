//! Deployment handlers.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::dto::ListResponse;
use crate::api::middleware::auth::AuthContext;
use crate::api::SharedState;
use crate::config::RuntimeTarget;
use crate::error::Result;
use crate::models::{DeployableKind, Deployment};
use crate::services::auth::PermissionAction;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_deployments).post(deploy))
        .route(
            "/:name/versions/:version",
            get(get_deployment)
                .put(update_deployment_config)
                .delete(remove_deployment),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by resource type ("mcp" or "agent").
    #[serde(rename = "resourceType")]
    pub resource_type: Option<String>,
}

pub async fn list_deployments(
    State(state): State<SharedState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<ListResponse<Deployment>>> {
    let resource_type = query
        .resource_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(DeployableKind::parse)
        .transpose()?;
    let deployments = state.deployments.list(resource_type).await?;
    Ok(Json(ListResponse::new(deployments, None)))
}

pub async fn get_deployment(
    State(state): State<SharedState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<Deployment>> {
    let deployment = state.deployments.get(&name, &version).await?;
    Ok(Json(deployment))
}

/// Deploy request body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub server_name: String,
    /// Version to deploy; `latest` resolves at deploy time.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub prefer_remote: bool,
    /// "mcp" (default) or "agent".
    #[serde(default)]
    pub resource_type: String,
    /// "local" or "kubernetes"; defaults to the configured target.
    #[serde(default)]
    pub runtime: String,
}

pub async fn deploy(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<DeploymentRequest>,
) -> Result<Json<Deployment>> {
    auth.require(PermissionAction::Deploy, &body.server_name)?;

    let resource_type = DeployableKind::parse(&body.resource_type)?;
    let runtime = if body.runtime.is_empty() {
        None
    } else {
        Some(RuntimeTarget::parse(&body.runtime)?)
    };

    let deployment = state
        .deployments
        .deploy(
            resource_type,
            &body.server_name,
            &body.version,
            body.config,
            body.prefer_remote,
            runtime,
        )
        .await?;
    Ok(Json(deployment))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeploymentConfigUpdate {
    pub config: BTreeMap<String, String>,
}

pub async fn update_deployment_config(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<DeploymentConfigUpdate>,
) -> Result<Json<Deployment>> {
    auth.require(PermissionAction::Deploy, &name)?;
    let deployment = state
        .deployments
        .update_config(&name, &version, body.config)
        .await?;
    Ok(Json(deployment))
}

pub async fn remove_deployment(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
) -> Result<StatusCode> {
    auth.require(PermissionAction::Deploy, &name)?;
    state.deployments.remove(&name, &version).await?;
    Ok(StatusCode::NO_CONTENT)
}
