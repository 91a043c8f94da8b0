//! Deployment state service: records per-version deployment intent and
//! drives the reconciler after every mutation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RuntimeTarget;
use crate::error::{AppError, Result};
use crate::models::{ArtifactKind, ArtifactStatus, DeployableKind, Deployment};
use crate::runtime::ReconcileManager;
use crate::store::Store;

/// Deployment operations. The HTTP handlers and the MCP tool binding both
/// program against this trait; tests substitute a fake.
#[async_trait]
pub trait Deployments: Send + Sync {
    async fn list(&self, resource_type: Option<DeployableKind>) -> Result<Vec<Deployment>>;

    async fn get(&self, name: &str, version: &str) -> Result<Deployment>;

    /// Record intent to run `name@version` and reconcile its target.
    /// `version` may be `latest`. Fails when the referenced version does not
    /// exist or is deleted.
    async fn deploy(
        &self,
        resource_type: DeployableKind,
        name: &str,
        version: &str,
        config: BTreeMap<String, String>,
        prefer_remote: bool,
        runtime: Option<RuntimeTarget>,
    ) -> Result<Deployment>;

    /// Replace the config map atomically and reconcile.
    async fn update_config(
        &self,
        name: &str,
        version: &str,
        config: BTreeMap<String, String>,
    ) -> Result<Deployment>;

    /// Remove the deployment row and reconcile; the runtime tears the
    /// instance down via orphan pruning.
    async fn remove(&self, name: &str, version: &str) -> Result<()>;

    /// Reconcile every target from recorded state.
    async fn reconcile_all(&self) -> Result<()>;
}

pub struct DeploymentService {
    store: Store,
    reconciler: Arc<ReconcileManager>,
    default_target: RuntimeTarget,
}

impl DeploymentService {
    pub fn new(
        store: Store,
        reconciler: Arc<ReconcileManager>,
        default_target: RuntimeTarget,
    ) -> Self {
        Self {
            store,
            reconciler,
            default_target,
        }
    }

    async fn reconcile_for(&self, deployment: &Deployment) -> Result<()> {
        let target =
            RuntimeTarget::parse(&deployment.runtime).unwrap_or(self.default_target);
        self.reconciler.reconcile_target(target).await
    }
}

#[async_trait]
impl Deployments for DeploymentService {
    async fn list(&self, resource_type: Option<DeployableKind>) -> Result<Vec<Deployment>> {
        self.store.list_deployments(resource_type).await
    }

    async fn get(&self, name: &str, version: &str) -> Result<Deployment> {
        self.store.get_deployment(name, version).await
    }

    async fn deploy(
        &self,
        resource_type: DeployableKind,
        name: &str,
        version: &str,
        config: BTreeMap<String, String>,
        prefer_remote: bool,
        runtime: Option<RuntimeTarget>,
    ) -> Result<Deployment> {
        let kind = match resource_type {
            DeployableKind::Mcp => ArtifactKind::Server,
            DeployableKind::Agent => ArtifactKind::Agent,
        };

        // Resolve `latest` to a concrete version at deploy time; the row
        // pins that version until the operator redeploys.
        let stored = if version.is_empty() || version == "latest" {
            self.store.get_latest(kind, name).await?
        } else {
            self.store.get_version(kind, name, version).await?
        };

        if stored.meta.status == ArtifactStatus::Deleted {
            return Err(AppError::Conflict(format!(
                "{kind} {name} version {} is deleted and cannot be deployed",
                stored.version()
            )));
        }

        let target = runtime.unwrap_or(self.default_target);
        let deployment = self
            .store
            .upsert_deployment(
                resource_type,
                name,
                stored.version(),
                &config,
                prefer_remote,
                target.as_str(),
            )
            .await?;

        self.reconciler.reconcile_target(target).await?;
        Ok(deployment)
    }

    async fn update_config(
        &self,
        name: &str,
        version: &str,
        config: BTreeMap<String, String>,
    ) -> Result<Deployment> {
        let deployment = self
            .store
            .update_deployment_config(name, version, &config)
            .await?;
        self.reconcile_for(&deployment).await?;
        Ok(deployment)
    }

    async fn remove(&self, name: &str, version: &str) -> Result<()> {
        let deployment = self.store.get_deployment(name, version).await?;
        self.store.delete_deployment(name, version).await?;
        self.reconcile_for(&deployment).await?;
        Ok(())
    }

    async fn reconcile_all(&self) -> Result<()> {
        self.reconciler.reconcile_all().await
    }
}
