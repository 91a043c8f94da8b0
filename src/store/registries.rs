//! Import source rows.

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ArtifactKind, ImportRegistry, SOURCE_META_KEY};

use super::Store;

impl Store {
    pub async fn add_registry(
        &self,
        name: &str,
        url: &str,
        registry_type: &str,
    ) -> Result<ImportRegistry> {
        let row: ImportRegistry = sqlx::query_as(
            r#"
            INSERT INTO registries (name, url, registry_type)
            VALUES ($1, $2, $3)
            RETURNING id, name, url, registry_type, created_at
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(registry_type)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::AlreadyExists(format!("registry {name} already exists"))
            }
            _ => AppError::Sqlx(e),
        })?;
        Ok(row)
    }

    pub async fn list_registries(&self) -> Result<Vec<ImportRegistry>> {
        let rows: Vec<ImportRegistry> = sqlx::query_as(
            "SELECT id, name, url, registry_type, created_at FROM registries ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Remove an import source and cascade to the catalogue rows the
    /// importer labelled with it.
    pub async fn remove_registry(&self, id: Uuid) -> Result<()> {
        let mut tx = self.begin().await?;

        let name: Option<String> =
            sqlx::query_scalar("DELETE FROM registries WHERE id = $1 RETURNING name")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(name) = name else {
            return Err(AppError::NotFound(format!("registry {id} not found")));
        };

        for kind in ArtifactKind::ALL {
            let sql = format!(
                "DELETE FROM {table} WHERE value ->> '{SOURCE_META_KEY}' = $1",
                table = kind.table(),
            );
            let removed = sqlx::query(&sql).bind(&name).execute(&mut *tx).await?;
            if removed.rows_affected() > 0 {
                tracing::info!(
                    source = %name,
                    kind = kind.as_str(),
                    rows = removed.rows_affected(),
                    "cascaded import source removal"
                );
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
