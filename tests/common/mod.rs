//! Shared test doubles.
//!
//! [`InMemoryCatalog`] implements the catalogue contract over a mutex-held
//! map so importer and API-shape tests run without a database. It mirrors
//! the production publish semantics: structural validation, duplicate
//! remote URL rejection, the version ceiling, and latest-flag supersession.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use amphora_registry::config::RuntimeTarget;
use amphora_registry::error::{AppError, Result};
use amphora_registry::models::{
    ArtifactDescriptor, ArtifactKind, ArtifactStatus, DeployableKind, Deployment, OfficialMeta,
    Readme, StoredVersion,
};
use amphora_registry::services::catalog::{Catalog, MAX_VERSIONS_PER_NAME};
use amphora_registry::services::deployment::Deployments;
use amphora_registry::services::validation::validate_descriptor;
use amphora_registry::services::version::compare_versions;
use amphora_registry::store::{VersionFilter, VersionPage};

#[derive(Default)]
struct CatalogState {
    // (kind, name, version) -> stored row
    rows: BTreeMap<(ArtifactKind, String, String), StoredVersion>,
    readmes: BTreeMap<(String, String), (Vec<u8>, String)>,
}

/// In-memory [`Catalog`] fake.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, kind: ArtifactKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn publish(
        &self,
        kind: ArtifactKind,
        descriptor: ArtifactDescriptor,
    ) -> Result<StoredVersion> {
        validate_descriptor(&descriptor)?;
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();

        for remote in &descriptor.remotes {
            let clash = state.rows.values().any(|row| {
                row.kind == kind
                    && row.descriptor.name != descriptor.name
                    && row.descriptor.remotes.iter().any(|r| r.url == remote.url)
            });
            if clash {
                return Err(AppError::ValidationFailed(format!(
                    "remote URL {} is already used by another {kind}",
                    remote.url
                )));
            }
        }

        let (version_count, version_exists, current_latest) = {
            let versions_of_name: Vec<&StoredVersion> = state
                .rows
                .values()
                .filter(|row| row.kind == kind && row.descriptor.name == descriptor.name)
                .collect();
            (
                versions_of_name.len(),
                versions_of_name
                    .iter()
                    .any(|row| row.descriptor.version == descriptor.version),
                versions_of_name
                    .iter()
                    .find(|row| row.meta.is_latest)
                    .map(|row| (row.descriptor.version.clone(), row.meta.published_at)),
            )
        };

        if version_count as i64 >= MAX_VERSIONS_PER_NAME {
            return Err(AppError::MaxVersionsReached(descriptor.name.clone()));
        }
        if version_exists {
            return Err(AppError::InvalidVersion(format!(
                "version {} already exists for {}",
                descriptor.version, descriptor.name
            )));
        }

        let is_new_latest = match &current_latest {
            Some((version, published_at)) => {
                compare_versions(&descriptor.version, version, now, *published_at)
                    == Ordering::Greater
            }
            None => true,
        };

        if is_new_latest {
            for row in state.rows.values_mut() {
                if row.kind == kind && row.descriptor.name == descriptor.name {
                    row.meta.is_latest = false;
                }
            }
        }

        let stored = StoredVersion {
            kind,
            descriptor,
            meta: OfficialMeta {
                status: ArtifactStatus::Active,
                published_at: now,
                updated_at: now,
                is_latest: is_new_latest,
            },
        };
        state.rows.insert(
            (
                kind,
                stored.descriptor.name.clone(),
                stored.descriptor.version.clone(),
            ),
            stored.clone(),
        );
        Ok(stored)
    }

    async fn update(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        mut descriptor: ArtifactDescriptor,
        new_status: Option<ArtifactStatus>,
    ) -> Result<StoredVersion> {
        descriptor.name = name.to_string();
        descriptor.version = version.to_string();
        validate_descriptor(&descriptor)?;

        let mut state = self.state.lock().unwrap();
        let key = (kind, name.to_string(), version.to_string());
        let row = state
            .rows
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("{kind} {name} {version}")))?;

        if let Some(status) = new_status {
            if !row.meta.status.can_transition_to(status) {
                return Err(AppError::Conflict(format!(
                    "cannot change status from {} to {}",
                    row.meta.status.as_str(),
                    status.as_str()
                )));
            }
            row.meta.status = status;
        }
        row.descriptor = descriptor;
        row.meta.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<StoredVersion> {
        let mut state = self.state.lock().unwrap();
        let key = (kind, name.to_string(), version.to_string());
        let row = state
            .rows
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("{kind} {name} {version}")))?;
        row.meta.status = ArtifactStatus::Deleted;
        row.meta.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn list(
        &self,
        kind: ArtifactKind,
        filter: &VersionFilter,
        _cursor: Option<&str>,
        limit: i64,
    ) -> Result<VersionPage> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<StoredVersion> = state
            .rows
            .values()
            .filter(|row| row.kind == kind)
            .filter(|row| match &filter.search {
                Some(s) => {
                    row.descriptor.name.contains(s.as_str())
                        || row.descriptor.description.contains(s.as_str())
                }
                None => true,
            })
            .filter(|row| match &filter.version {
                Some(v) => &row.descriptor.version == v,
                None => true,
            })
            .cloned()
            .collect();
        items.truncate(limit.max(0) as usize);
        Ok(VersionPage {
            items,
            next_cursor: None,
        })
    }

    async fn get(&self, kind: ArtifactKind, name: &str, version: &str) -> Result<StoredVersion> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .get(&(kind, name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{kind} {name} {version}")))
    }

    async fn get_latest(&self, kind: ArtifactKind, name: &str) -> Result<StoredVersion> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .values()
            .find(|row| {
                row.kind == kind && row.descriptor.name == name && row.meta.is_latest
            })
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{kind} {name}")))
    }

    async fn get_all_versions(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Vec<StoredVersion>> {
        let state = self.state.lock().unwrap();
        let versions: Vec<StoredVersion> = state
            .rows
            .values()
            .filter(|row| row.kind == kind && row.descriptor.name == name)
            .cloned()
            .collect();
        if versions.is_empty() {
            return Err(AppError::NotFound(format!("{kind} {name}")));
        }
        Ok(versions)
    }

    async fn put_readme(
        &self,
        name: &str,
        version: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()> {
        self.state.lock().unwrap().readmes.insert(
            (name.to_string(), version.to_string()),
            (content.to_vec(), content_type.to_string()),
        );
        Ok(())
    }

    async fn get_readme(&self, name: &str, version: &str) -> Result<Readme> {
        let state = self.state.lock().unwrap();
        let (content, content_type) = state
            .readmes
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("readme {name} {version}")))?;
        Ok(Readme {
            name: name.to_string(),
            version: version.to_string(),
            content_type,
            size_bytes: content.len() as i64,
            sha256: String::new(),
            content,
            updated_at: Utc::now(),
        })
    }
}

/// Descriptor builder for tests.
pub fn descriptor(name: &str, version: &str) -> ArtifactDescriptor {
    ArtifactDescriptor {
        name: name.to_string(),
        version: version.to_string(),
        description: format!("test descriptor for {name}"),
        ..Default::default()
    }
}

/// In-memory [`Deployments`] fake: records rows, never touches a runtime.
#[derive(Default)]
pub struct FakeDeployments {
    rows: Mutex<Vec<Deployment>>,
    pub reconcile_calls: Mutex<usize>,
}

impl FakeDeployments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Deployments for FakeDeployments {
    async fn list(&self, resource_type: Option<DeployableKind>) -> Result<Vec<Deployment>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|d| resource_type.is_none() || resource_type == Some(d.resource_type))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str, version: &str) -> Result<Deployment> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.server_name == name && d.version == version)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("deployment {name} {version}")))
    }

    async fn deploy(
        &self,
        resource_type: DeployableKind,
        name: &str,
        version: &str,
        config: std::collections::BTreeMap<String, String>,
        prefer_remote: bool,
        runtime: Option<RuntimeTarget>,
    ) -> Result<Deployment> {
        let deployment = Deployment {
            resource_type,
            server_name: name.to_string(),
            version: if version.is_empty() || version == "latest" {
                "1.0.0".to_string()
            } else {
                version.to_string()
            },
            config,
            prefer_remote,
            runtime: runtime.unwrap_or(RuntimeTarget::Local).as_str().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|d| {
            !(d.resource_type == deployment.resource_type
                && d.server_name == deployment.server_name
                && d.version == deployment.version)
        });
        rows.push(deployment.clone());
        *self.reconcile_calls.lock().unwrap() += 1;
        Ok(deployment)
    }

    async fn update_config(
        &self,
        name: &str,
        version: &str,
        config: std::collections::BTreeMap<String, String>,
    ) -> Result<Deployment> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|d| d.server_name == name && d.version == version)
            .ok_or_else(|| AppError::NotFound(format!("deployment {name} {version}")))?;
        row.config = config;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn remove(&self, name: &str, version: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|d| !(d.server_name == name && d.version == version));
        if rows.len() == before {
            return Err(AppError::NotFound(format!("deployment {name} {version}")));
        }
        *self.reconcile_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn reconcile_all(&self) -> Result<()> {
        *self.reconcile_calls.lock().unwrap() += 1;
        Ok(())
    }
}
