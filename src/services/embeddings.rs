//! Optional semantic embedding generation.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Strictly
//! best-effort: failures are logged and never surface to the publish that
//! triggered them.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::EmbeddingsConfig;
use crate::error::{AppError, Result};
use crate::models::ArtifactKind;
use crate::store::Store;

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EmbeddingService {
    store: Store,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl EmbeddingService {
    /// Build the service from config; returns None when embeddings are
    /// disabled or misconfigured (logged, never fatal).
    pub fn from_config(config: &EmbeddingsConfig, store: Store) -> Option<Arc<Self>> {
        if !config.enabled {
            return None;
        }
        let Some(api_url) = config.api_url.clone() else {
            warn!("EMBEDDINGS_ENABLED is set but EMBEDDINGS_API_URL is missing; embeddings disabled");
            return None;
        };
        let client = reqwest::Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()
            .ok()?;
        Some(Arc::new(Self {
            store,
            client,
            api_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        }))
    }

    pub async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        let mut req = self.client.post(&self.api_url).json(&serde_json::json!({
            "model": self.model,
            "input": [text],
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "embedding provider returned {}",
                resp.status()
            )));
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::UpstreamUnavailable("empty embedding response".into()))?;

        if self.dimensions > 0 && vector.len() != self.dimensions {
            debug!(
                expected = self.dimensions,
                actual = vector.len(),
                "embedding dimension differs from configured value"
            );
        }

        Ok(vector)
    }

    /// Generate and store an embedding in the background. The spawned task
    /// owns its own deadline and never blocks or fails the caller.
    pub fn spawn_upsert(
        self: Arc<Self>,
        kind: ArtifactKind,
        name: String,
        version: String,
        text: String,
    ) {
        tokio::spawn(async move {
            let result = tokio::time::timeout(EMBEDDING_TIMEOUT, async {
                let vector = self.generate(&text).await?;
                self.store
                    .upsert_embedding(kind, &name, &version, &self.model, &vector)
                    .await
            })
            .await;

            match result {
                Ok(Ok(())) => debug!(%kind, name, version, "embedding stored"),
                Ok(Err(e)) => warn!(%kind, name, version, "embedding upsert failed: {e}"),
                Err(_) => warn!(%kind, name, version, "embedding upsert timed out"),
            }
        });
    }
}
