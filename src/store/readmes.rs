//! README storage. Content is kept base64-encoded at rest; the digest of
//! the decoded bytes must match the stored sha256 on every read.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::models::Readme;

use super::Store;

#[derive(Debug, FromRow)]
struct ReadmeRow {
    name: String,
    version: String,
    content_type: String,
    size_bytes: i64,
    sha256: String,
    content: String,
    updated_at: DateTime<Utc>,
}

/// Hex SHA-256 of a byte slice.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

impl Store {
    pub async fn put_readme(
        &self,
        name: &str,
        version: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO readmes (name, version, content_type, size_bytes, sha256, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name, version) DO UPDATE SET
                content_type = EXCLUDED.content_type,
                size_bytes = EXCLUDED.size_bytes,
                sha256 = EXCLUDED.sha256,
                content = EXCLUDED.content,
                updated_at = now()
            "#,
        )
        .bind(name)
        .bind(version)
        .bind(content_type)
        .bind(content.len() as i64)
        .bind(sha256_hex(content))
        .bind(BASE64.encode(content))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_readme(&self, name: &str, version: &str) -> Result<Readme> {
        let row: Option<ReadmeRow> = sqlx::query_as(
            r#"
            SELECT name, version, content_type, size_bytes, sha256, content, updated_at
            FROM readmes WHERE name = $1 AND version = $2
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_optional(self.pool())
        .await?;

        let row = row.ok_or_else(|| {
            AppError::NotFound(format!("readme for {name} version {version} not found"))
        })?;

        let content = BASE64
            .decode(&row.content)
            .map_err(|e| AppError::Internal(format!("stored readme is not valid base64: {e}")))?;

        if sha256_hex(&content) != row.sha256 {
            return Err(AppError::Internal(format!(
                "readme digest mismatch for {name}@{version}"
            )));
        }

        Ok(Readme {
            name: row.name,
            version: row.version,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            sha256: row.sha256,
            content,
            updated_at: row.updated_at,
        })
    }
}
