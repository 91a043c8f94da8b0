//! Semantic embedding storage. Optional: nothing else depends on these rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::models::ArtifactKind;

use super::Store;

/// Embedding bookkeeping without the vector payload.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingMetadata {
    pub model: String,
    pub dimensions: i32,
    pub generated_at: DateTime<Utc>,
}

impl Store {
    pub async fn upsert_embedding(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (resource_type, name, version, model, dimensions, vector)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource_type, name, version) DO UPDATE SET
                model = EXCLUDED.model,
                dimensions = EXCLUDED.dimensions,
                vector = EXCLUDED.vector,
                generated_at = now()
            "#,
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(version)
        .bind(model)
        .bind(vector.len() as i32)
        .bind(serde_json::to_value(vector)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_embedding_metadata(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<EmbeddingMetadata> {
        let row: Option<EmbeddingMetadata> = sqlx::query_as(
            r#"
            SELECT model, dimensions, generated_at
            FROM embeddings
            WHERE resource_type = $1 AND name = $2 AND version = $3
            "#,
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(version)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| {
            AppError::NotFound(format!("embedding for {name} version {version} not found"))
        })
    }
}
