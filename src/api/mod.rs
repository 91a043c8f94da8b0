//! API module - HTTP handlers and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

use crate::config::Config;
use crate::services::auth::TokenVerifier;
use crate::services::catalog::Catalog;
use crate::services::deployment::Deployments;
use crate::services::embeddings::EmbeddingService;
use crate::store::Store;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub store: Store,
    pub catalog: Arc<dyn Catalog>,
    pub deployments: Arc<dyn Deployments>,
    /// Capability token verifier; None means mutations are open
    /// (embedded single-user mode).
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    /// Embedding generator, when enabled; used when an import needs a
    /// catalogue instance with different validation settings.
    pub embeddings: Option<Arc<EmbeddingService>>,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: PgPool,
        store: Store,
        catalog: Arc<dyn Catalog>,
        deployments: Arc<dyn Deployments>,
    ) -> Self {
        Self {
            config,
            db,
            store,
            catalog,
            deployments,
            verifier: None,
            embeddings: None,
            metrics_handle: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_embeddings(mut self, embeddings: Option<Arc<EmbeddingService>>) -> Self {
        self.embeddings = embeddings;
        self
    }

    pub fn with_metrics_handle(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics_handle = handle.map(Arc::new);
        self
    }
}

pub type SharedState = Arc<AppState>;
