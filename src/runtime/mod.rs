//! Runtime reconciliation: declared catalogue state in, running instances out.
//!
//! [`ReconcileManager`] reads every recorded deployment, asks the translator
//! to resolve each one, and hands the resulting [`DesiredState`] to the
//! backend owning the deployment's runtime target. At most one reconcile is
//! in flight per target; callers queue on the target's lock.

pub mod compose;
pub mod kubernetes;
pub mod translator;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::{Config, RuntimeTarget};
use crate::error::{AppError, Result};
use crate::models::{ArtifactKind, ArtifactStatus, DeployableKind, Deployment};
use crate::store::Store;
use crate::telemetry::names;

use compose::LocalReconciler;
use kubernetes::KubernetesReconciler;
use translator::{agent_dependencies, resolve_agent, resolve_server, DesiredState, ResolvedServer};

pub struct ReconcileManager {
    store: Store,
    local: LocalReconciler,
    kubernetes: KubernetesReconciler,
    default_target: RuntimeTarget,
    local_lock: Mutex<()>,
    kubernetes_lock: Mutex<()>,
}

impl ReconcileManager {
    pub fn new(store: Store, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            local: LocalReconciler::new(&config.runtime_dir),
            kubernetes: KubernetesReconciler::new(&config.kagent_namespace),
            default_target: config.runtime_target,
            local_lock: Mutex::new(()),
            kubernetes_lock: Mutex::new(()),
        })
    }

    fn target_of(&self, deployment: &Deployment) -> RuntimeTarget {
        RuntimeTarget::parse(&deployment.runtime).unwrap_or(self.default_target)
    }

    /// Reconcile every target that has (or recently had) deployments. Both
    /// backends are attempted; the first error is returned after all
    /// attempts so one broken target cannot starve the other.
    pub async fn reconcile_all(&self) -> Result<()> {
        let deployments = self.store.list_deployments(None).await?;

        let mut first_error = None;
        let mut targets = vec![RuntimeTarget::Local];
        if deployments
            .iter()
            .any(|d| self.target_of(d) == RuntimeTarget::Kubernetes)
            || self.default_target == RuntimeTarget::Kubernetes
        {
            targets.push(RuntimeTarget::Kubernetes);
        }

        for target in targets {
            if let Err(e) = self.reconcile_target(target).await {
                warn!(runtime_target = target.as_str(), "reconcile failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reconcile one runtime target. Serialized per target: a concurrent
    /// caller waits until the in-flight reconcile completes.
    pub async fn reconcile_target(&self, target: RuntimeTarget) -> Result<()> {
        let desired = self.build_desired_state(target).await?;

        metrics::counter!(names::RECONCILE_TOTAL, "target" => target.as_str()).increment(1);

        let result = match target {
            RuntimeTarget::Local => {
                let _guard = self.local_lock.lock().await;
                self.local.apply(&desired).await
            }
            RuntimeTarget::Kubernetes => {
                let _guard = self.kubernetes_lock.lock().await;
                self.kubernetes.apply(&desired).await
            }
        };

        if result.is_err() {
            metrics::counter!(names::RECONCILE_FAILURES_TOTAL, "target" => target.as_str())
                .increment(1);
        }
        result
    }

    /// Build the desired state for one target from recorded deployments.
    ///
    /// Deployments whose version has been logically deleted (or no longer
    /// exists) are skipped with a warning, so a catalogue tombstone tears
    /// the instance down on the next reconcile without discarding the
    /// operator's deployment row.
    async fn build_desired_state(&self, target: RuntimeTarget) -> Result<DesiredState> {
        let deployments = self.store.list_deployments(None).await?;
        let mut desired = DesiredState::default();

        for deployment in deployments {
            if self.target_of(&deployment) != target {
                continue;
            }
            match deployment.resource_type {
                DeployableKind::Mcp => {
                    let Some(stored) = self
                        .fetch_live(ArtifactKind::Server, &deployment.server_name, &deployment.version)
                        .await?
                    else {
                        continue;
                    };
                    desired
                        .mcp_servers
                        .push(resolve_server(&stored.descriptor, &deployment)?);
                }
                DeployableKind::Agent => {
                    let Some(stored) = self
                        .fetch_live(ArtifactKind::Agent, &deployment.server_name, &deployment.version)
                        .await?
                    else {
                        continue;
                    };
                    let servers = self.resolve_agent_servers(&stored.descriptor, &deployment).await?;
                    desired
                        .agents
                        .push(resolve_agent(&stored.descriptor, &deployment, servers)?);
                }
            }
        }

        desired.normalize();
        Ok(desired)
    }

    /// Fetch a version, returning None (with a warning) when it is missing
    /// or tombstoned.
    async fn fetch_live(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<Option<crate::models::StoredVersion>> {
        match self.store.get_version(kind, name, version).await {
            Ok(stored) if stored.meta.status == ArtifactStatus::Deleted => {
                warn!(%kind, name, version, "deployment references a deleted version; skipping");
                Ok(None)
            }
            Ok(stored) => Ok(Some(stored)),
            Err(AppError::NotFound(_)) => {
                warn!(%kind, name, version, "deployment references a missing version; skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve an agent's declared MCP-server dependencies using the
    /// agent's own deployment config.
    async fn resolve_agent_servers(
        &self,
        descriptor: &crate::models::ArtifactDescriptor,
        deployment: &Deployment,
    ) -> Result<Vec<ResolvedServer>> {
        let mut servers = Vec::new();
        for dep in agent_dependencies(descriptor) {
            let stored = match &dep.version {
                Some(version) => {
                    self.store
                        .get_version(ArtifactKind::Server, &dep.name, version)
                        .await
                }
                None => self.store.get_latest(ArtifactKind::Server, &dep.name).await,
            }
            .map_err(|e| {
                AppError::ValidationFailed(format!(
                    "agent {} depends on unresolvable server {}: {e}",
                    descriptor.name, dep.name
                ))
            })?;
            servers.push(resolve_server(&stored.descriptor, deployment)?);
        }
        Ok(servers)
    }
}
