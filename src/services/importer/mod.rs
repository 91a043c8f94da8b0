//! Importer: pulls descriptors from seed files or remote registries into
//! the catalogue.
//!
//! A single invocation is single-threaded; concurrent-publish safety comes
//! from the catalogue's advisory lock. Per-entry failures are counted and
//! logged, never fatal to the batch.

mod client;
mod enrich;
mod readme_seed;

pub use client::{PageEntry, RegistryClient, RegistryPage};
pub use enrich::{Enricher, Enrichment, ENRICHMENT_META_KEY};
pub use readme_seed::{encode_readme, readme_key, ReadmeEntry, ReadmeFile};

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{ArtifactDescriptor, ArtifactKind, SOURCE_META_KEY};
use crate::services::catalog::Catalog;
use crate::telemetry::names;

/// Seed catalogue compiled into the binary; imported on startup unless
/// disabled.
const BUILTIN_SEED: &str = include_str!("builtin_seed.json");

/// Outcome counts for one import run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct ImportService {
    catalog: Arc<dyn Catalog>,
    client: RegistryClient,
    enricher: Option<Enricher>,
    readme_seed: Option<ReadmeFile>,
    update_existing: bool,
    source_label: Option<String>,
}

impl ImportService {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            client: RegistryClient::new(),
            enricher: None,
            readme_seed: None,
            update_existing: false,
            source_label: None,
        }
    }

    /// Label every imported descriptor with the registered source it came
    /// from, so deleting that source can cascade to its rows.
    pub fn with_source_label(mut self, label: Option<String>) -> Self {
        self.source_label = label;
        self
    }

    /// Enable container/dependency/scorecard enrichment.
    pub fn with_enrichment(mut self, github_token: Option<String>) -> Self {
        self.enricher = Some(Enricher::new(github_token));
        self
    }

    /// Update entries whose `(name, version)` already exists instead of
    /// counting them as failures.
    pub fn with_update_existing(mut self, update_existing: bool) -> Self {
        self.update_existing = update_existing;
        self
    }

    /// Extra HTTP headers sent with every request to the source.
    pub fn with_source_headers(mut self, headers: std::collections::BTreeMap<String, String>) -> Self {
        self.client = self.client.with_headers(headers);
        self
    }

    /// Load a README seed file applied after each matching publish.
    pub fn with_readme_seed_path(mut self, path: &str) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let seed: ReadmeFile = serde_json::from_slice(&raw)?;
        self.readme_seed = Some(seed);
        Ok(self)
    }

    /// Import the embedded builtin seed catalogue.
    pub async fn import_builtin_seed(&self) -> Result<ImportSummary> {
        let descriptors: Vec<ArtifactDescriptor> = serde_json::from_str(BUILTIN_SEED)?;
        let entries = descriptors
            .into_iter()
            .map(|server| PageEntry { server, meta: None })
            .collect();
        self.import_entries(entries).await
    }

    /// Import from a local path or URL. URLs are probed first: a registry
    /// envelope means cursor pagination, anything else is read as a seed
    /// document.
    pub async fn import_from_path(&self, source: &str) -> Result<ImportSummary> {
        let entries = if source.starts_with("http://") || source.starts_with("https://") {
            if self.client.is_registry_endpoint(source).await {
                info!(source, "importing from paginated registry endpoint");
                self.client.fetch_all(source).await?
            } else {
                debug!(source, "source is not a registry envelope; treating as seed file");
                parse_seed_document(&self.client.fetch_seed(source).await?)?
            }
        } else {
            let raw = std::fs::read(source).map_err(|e| {
                AppError::UpstreamUnavailable(format!("failed to read seed data: {e}"))
            })?;
            parse_seed_document(&raw)?
        };

        self.import_entries(entries).await
    }

    /// Publish (or update) each entry, applying enrichment and README
    /// seeds. Individual failures never abort the run.
    async fn import_entries(&self, entries: Vec<PageEntry>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for entry in entries {
            let mut descriptor = entry.server;
            let name = descriptor.name.clone();
            let version = descriptor.version.clone();

            if let Some(label) = &self.source_label {
                descriptor
                    .extra
                    .insert(SOURCE_META_KEY.to_string(), Value::String(label.clone()));
            }

            if let Some(enricher) = &self.enricher {
                let enrichment = enricher.enrich(&descriptor).await;
                if !enrichment.is_empty() {
                    descriptor
                        .extra
                        .insert(ENRICHMENT_META_KEY.to_string(), enrichment.to_meta());
                }
            }

            match self.publish_or_update(descriptor).await {
                Ok(updated) => {
                    if updated {
                        summary.updated += 1;
                    } else {
                        summary.imported += 1;
                    }
                    metrics::counter!(names::IMPORT_ENTRIES_TOTAL).increment(1);
                    self.apply_readme_seed(&name, &version).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::counter!(names::IMPORT_FAILURES_TOTAL).increment(1);
                    warn!(name, version, "import entry failed: {e}");
                }
            }
        }

        info!(
            imported = summary.imported,
            updated = summary.updated,
            failed = summary.failed,
            "import finished"
        );
        Ok(summary)
    }

    /// Returns true when the entry took the update path.
    async fn publish_or_update(&self, descriptor: ArtifactDescriptor) -> Result<bool> {
        let name = descriptor.name.clone();
        let version = descriptor.version.clone();

        match self
            .catalog
            .publish(ArtifactKind::Server, descriptor.clone())
            .await
        {
            Ok(_) => Ok(false),
            Err(AppError::InvalidVersion(_)) if self.update_existing => {
                self.catalog
                    .update(ArtifactKind::Server, &name, &version, descriptor, None)
                    .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_readme_seed(&self, name: &str, version: &str) {
        let Some(seed) = &self.readme_seed else {
            return;
        };
        let Some(entry) = seed.get(&readme_key(name, version)) else {
            return;
        };
        match entry.decode() {
            Ok((content, content_type)) => {
                if let Err(e) = self
                    .catalog
                    .put_readme(name, version, &content, &content_type)
                    .await
                {
                    warn!(name, version, "readme seed store failed: {e}");
                }
            }
            Err(e) => warn!(name, version, "readme seed entry invalid: {e}"),
        }
    }
}

/// A seed document is either a bare array of descriptors or a wrapped
/// `{servers: [...]}` page.
fn parse_seed_document(raw: &[u8]) -> Result<Vec<PageEntry>> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| AppError::UpstreamUnavailable(format!("failed to read seed data: {e}")))?;

    if value.is_array() {
        let descriptors: Vec<ArtifactDescriptor> = serde_json::from_value(value)?;
        return Ok(descriptors
            .into_iter()
            .map(|server| PageEntry { server, meta: None })
            .collect());
    }

    let page: RegistryPage = serde_json::from_value(value)
        .map_err(|e| AppError::UpstreamUnavailable(format!("failed to read seed data: {e}")))?;
    Ok(page
        .servers
        .into_iter()
        .filter(PageEntry::is_importable)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_seed_parses() {
        let descriptors: Vec<ArtifactDescriptor> = serde_json::from_str(BUILTIN_SEED).unwrap();
        assert!(!descriptors.is_empty());
        for d in &descriptors {
            assert!(crate::services::validation::validate_descriptor(d).is_ok());
        }
    }

    #[test]
    fn test_parse_seed_document_bare_array() {
        let raw = serde_json::json!([
            {"name": "a.b/x", "version": "1.0.0", "description": "d"}
        ]);
        let entries = parse_seed_document(raw.to_string().as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server.name, "a.b/x");
    }

    #[test]
    fn test_parse_seed_document_wrapped_page_filters_inactive() {
        let raw = serde_json::json!({
            "servers": [
                {"server": {"name": "a.b/x", "version": "1.0.0", "description": "d"}},
                {"server": {"name": "a.b/y", "version": "1.0.0", "description": "d"},
                 "_meta": {"official": {"status": "deleted"}}}
            ],
            "metadata": {"count": 2}
        });
        let entries = parse_seed_document(raw.to_string().as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server.name, "a.b/x");
    }

    #[test]
    fn test_parse_seed_document_rejects_garbage() {
        assert!(parse_seed_document(b"{invalid json}").is_err());
        assert!(parse_seed_document(br#"{"not": "a seed"}"#).is_err());
    }
}
