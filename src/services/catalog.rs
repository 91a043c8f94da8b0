//! Catalogue service: publish / update / list / get across all artifact
//! kinds, enforcing the versioning, latest-flag, uniqueness, and
//! concurrent-publish invariants.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::{
    ArtifactDescriptor, ArtifactKind, ArtifactStatus, OfficialMeta, Readme, StoredVersion,
};
use crate::services::embeddings::EmbeddingService;
use crate::services::validation::{validate_descriptor, RegistryValidator};
use crate::services::version::compare_versions;
use crate::store::{Store, Tx, VersionFilter, VersionPage};
use crate::telemetry::names;

/// Hard ceiling on versions per name.
pub const MAX_VERSIONS_PER_NAME: i64 = 10_000;

const DEFAULT_LIST_LIMIT: i64 = 30;

/// Catalogue operations. The importer, API handlers, and MCP binding all
/// program against this trait; tests substitute an in-memory fake.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn publish(
        &self,
        kind: ArtifactKind,
        descriptor: ArtifactDescriptor,
    ) -> Result<StoredVersion>;

    async fn update(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        descriptor: ArtifactDescriptor,
        new_status: Option<ArtifactStatus>,
    ) -> Result<StoredVersion>;

    /// Logical delete: tombstones the version, never removes the row.
    async fn delete(&self, kind: ArtifactKind, name: &str, version: &str)
        -> Result<StoredVersion>;

    async fn list(
        &self,
        kind: ArtifactKind,
        filter: &VersionFilter,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<VersionPage>;

    async fn get(&self, kind: ArtifactKind, name: &str, version: &str) -> Result<StoredVersion>;

    async fn get_latest(&self, kind: ArtifactKind, name: &str) -> Result<StoredVersion>;

    async fn get_all_versions(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Vec<StoredVersion>>;

    async fn put_readme(
        &self,
        name: &str,
        version: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()>;

    async fn get_readme(&self, name: &str, version: &str) -> Result<Readme>;
}

/// Production catalogue backed by the transactional store.
pub struct CatalogService {
    store: Store,
    registry_validator: Option<RegistryValidator>,
    embeddings: Option<Arc<EmbeddingService>>,
}

impl CatalogService {
    pub fn new(store: Store, enable_registry_validation: bool) -> Self {
        Self {
            store,
            registry_validator: enable_registry_validation.then(RegistryValidator::new),
            embeddings: None,
        }
    }

    /// Attach the embedding service; publishes then upsert embeddings
    /// best-effort in the background.
    pub fn with_embeddings(mut self, embeddings: Option<Arc<EmbeddingService>>) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Every remote URL in `descriptor` must be unclaimed by other names of
    /// the same kind. A name may freely reuse its own URLs across versions.
    async fn check_duplicate_remote_urls(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        descriptor: &ArtifactDescriptor,
    ) -> Result<()> {
        for remote in &descriptor.remotes {
            let filter = VersionFilter {
                remote_url: Some(remote.url.clone()),
                ..Default::default()
            };
            let page = self
                .store
                .list_versions_tx(tx, kind, &filter, None, 1000)
                .await?;
            for existing in page.items {
                if existing.descriptor.name != descriptor.name {
                    return Err(AppError::ValidationFailed(format!(
                        "remote URL {} is already used by {kind} {}",
                        remote.url, existing.descriptor.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn spawn_embedding_upsert(&self, stored: &StoredVersion) {
        if let Some(embeddings) = &self.embeddings {
            embeddings.clone().spawn_upsert(
                stored.kind,
                stored.descriptor.name.clone(),
                stored.descriptor.version.clone(),
                embedding_text(&stored.descriptor),
            );
        }
    }
}

/// Text fed to the embedding model for one descriptor.
fn embedding_text(descriptor: &ArtifactDescriptor) -> String {
    let mut text = descriptor.name.clone();
    if let Some(title) = &descriptor.title {
        text.push(' ');
        text.push_str(title);
    }
    text.push(' ');
    text.push_str(&descriptor.description);
    text
}

#[async_trait]
impl Catalog for CatalogService {
    async fn publish(
        &self,
        kind: ArtifactKind,
        descriptor: ArtifactDescriptor,
    ) -> Result<StoredVersion> {
        validate_descriptor(&descriptor)?;
        if let Some(validator) = &self.registry_validator {
            validator.validate_packages(&descriptor).await?;
        }

        let publish_time = Utc::now();
        let mut tx = self.store.begin().await?;

        // Serialize against concurrent publishers of the same name.
        self.store
            .acquire_publish_lock(&mut tx, kind, &descriptor.name)
            .await?;

        self.check_duplicate_remote_urls(&mut tx, kind, &descriptor)
            .await?;

        let version_count = self
            .store
            .count_versions(&mut tx, kind, &descriptor.name)
            .await?;
        if version_count >= MAX_VERSIONS_PER_NAME {
            return Err(AppError::MaxVersionsReached(format!(
                "{} already has {MAX_VERSIONS_PER_NAME} versions",
                descriptor.name
            )));
        }

        if self
            .store
            .version_exists(&mut tx, kind, &descriptor.name, &descriptor.version)
            .await?
        {
            return Err(AppError::InvalidVersion(format!(
                "version {} already exists for {}",
                descriptor.version, descriptor.name
            )));
        }

        let current_latest = self
            .store
            .get_current_latest(&mut tx, kind, &descriptor.name)
            .await?;

        let is_new_latest = match &current_latest {
            Some(latest) => {
                compare_versions(
                    &descriptor.version,
                    &latest.descriptor.version,
                    publish_time,
                    latest.meta.published_at,
                ) == Ordering::Greater
            }
            None => true,
        };

        if is_new_latest && current_latest.is_some() {
            self.store
                .unmark_latest(&mut tx, kind, &descriptor.name)
                .await?;
        }

        let meta = OfficialMeta {
            status: ArtifactStatus::Active,
            published_at: publish_time,
            updated_at: publish_time,
            is_latest: is_new_latest,
        };

        let stored = self
            .store
            .create_version(&mut tx, kind, &descriptor, &meta)
            .await?;
        tx.commit().await?;

        metrics::counter!(names::PUBLISH_TOTAL, "kind" => kind.as_str()).increment(1);
        self.spawn_embedding_upsert(&stored);

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
        // The path parameters are authoritative for identity.
        descriptor.name = name.to_string();
        descriptor.version = version.to_string();

        validate_descriptor(&descriptor)?;

        let mut tx = self.store.begin().await?;

        // Lock before reading: the skip-validation and status-transition
        // decisions below must be made against committed state, not a
        // snapshot a concurrent writer is about to invalidate.
        self.store.acquire_publish_lock(&mut tx, kind, name).await?;
        let current = self.store.get_version_tx(&mut tx, kind, name, version).await?;

        // Deleted versions (and versions being deleted) skip upstream
        // registry validation; structural validation already ran.
        let currently_deleted = current.meta.status == ArtifactStatus::Deleted;
        let being_deleted = new_status == Some(ArtifactStatus::Deleted);
        if !(currently_deleted || being_deleted) {
            if let Some(validator) = &self.registry_validator {
                validator.validate_packages(&descriptor).await?;
            }
        }

        if let Some(status) = new_status {
            if !current.meta.status.can_transition_to(status) {
                return Err(AppError::Conflict(format!(
                    "cannot change status from {} to {}",
                    current.meta.status.as_str(),
                    status.as_str()
                )));
            }
        }

        self.check_duplicate_remote_urls(&mut tx, kind, &descriptor)
            .await?;

        let mut updated = self
            .store
            .update_version(&mut tx, kind, name, version, &descriptor)
            .await?;

        if let Some(status) = new_status {
            updated = self
                .store
                .set_status(&mut tx, kind, name, version, status)
                .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn delete(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<StoredVersion> {
        let mut tx = self.store.begin().await?;
        self.store.acquire_publish_lock(&mut tx, kind, name).await?;

        // Ensure the row exists before tombstoning; any status may be deleted.
        let _ = self.store.get_version_tx(&mut tx, kind, name, version).await?;
        let deleted = self
            .store
            .set_status(&mut tx, kind, name, version, ArtifactStatus::Deleted)
            .await?;
        tx.commit().await?;

        Ok(deleted)
    }

    async fn list(
        &self,
        kind: ArtifactKind,
        filter: &VersionFilter,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<VersionPage> {
        let limit = if limit <= 0 { DEFAULT_LIST_LIMIT } else { limit };
        self.store.list_versions(kind, filter, cursor, limit).await
    }

    async fn get(&self, kind: ArtifactKind, name: &str, version: &str) -> Result<StoredVersion> {
        self.store.get_version(kind, name, version).await
    }

    async fn get_latest(&self, kind: ArtifactKind, name: &str) -> Result<StoredVersion> {
        self.store.get_latest(kind, name).await
    }

    async fn get_all_versions(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Vec<StoredVersion>> {
        self.store.get_all_versions(kind, name).await
    }

    async fn put_readme(
        &self,
        name: &str,
        version: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()> {
        if content.is_empty() {
            warn!(name, version, "storing empty readme");
        }
        self.store.put_readme(name, version, content, content_type).await
    }

    async fn get_readme(&self, name: &str, version: &str) -> Result<Readme> {
        self.store.get_readme(name, version).await
    }
}
