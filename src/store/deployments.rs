//! Deployment table operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::models::{DeployableKind, Deployment};

use super::Store;

#[derive(Debug, FromRow)]
struct DeploymentRow {
    resource_type: String,
    name: String,
    version: String,
    config: serde_json::Value,
    prefer_remote: bool,
    runtime: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeploymentRow {
    fn into_deployment(self) -> Result<Deployment> {
        let config: BTreeMap<String, String> = serde_json::from_value(self.config)?;
        Ok(Deployment {
            resource_type: DeployableKind::parse(&self.resource_type)?,
            server_name: self.name,
            version: self.version,
            config,
            prefer_remote: self.prefer_remote,
            runtime: self.runtime,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DEPLOYMENT_COLUMNS: &str =
    "resource_type, name, version, config, prefer_remote, runtime, created_at, updated_at";

impl Store {
    /// Create or replace the deployment row for `(resource_type, name, version)`.
    /// Same-key writers serialize on the row lock the upsert takes implicitly.
    pub async fn upsert_deployment(
        &self,
        resource_type: DeployableKind,
        name: &str,
        version: &str,
        config: &BTreeMap<String, String>,
        prefer_remote: bool,
        runtime: &str,
    ) -> Result<Deployment> {
        let sql = format!(
            r#"
            INSERT INTO deployments (resource_type, name, version, config, prefer_remote, runtime)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource_type, name, version) DO UPDATE SET
                config = EXCLUDED.config,
                prefer_remote = EXCLUDED.prefer_remote,
                runtime = EXCLUDED.runtime,
                updated_at = now()
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        );
        let row: DeploymentRow = sqlx::query_as(&sql)
            .bind(resource_type.as_str())
            .bind(name)
            .bind(version)
            .bind(serde_json::to_value(config)?)
            .bind(prefer_remote)
            .bind(runtime)
            .fetch_one(self.pool())
            .await?;
        row.into_deployment()
    }

    pub async fn get_deployment(&self, name: &str, version: &str) -> Result<Deployment> {
        let sql = format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE name = $1 AND version = $2"
        );
        let row: Option<DeploymentRow> = sqlx::query_as(&sql)
            .bind(name)
            .bind(version)
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| {
            AppError::NotFound(format!("deployment {name} version {version} not found"))
        })?
        .into_deployment()
    }

    pub async fn list_deployments(
        &self,
        resource_type: Option<DeployableKind>,
    ) -> Result<Vec<Deployment>> {
        let sql = format!(
            r#"
            SELECT {DEPLOYMENT_COLUMNS} FROM deployments
            WHERE ($1::text IS NULL OR resource_type = $1)
            ORDER BY name, version
            "#
        );
        let rows: Vec<DeploymentRow> = sqlx::query_as(&sql)
            .bind(resource_type.map(|t| t.as_str()))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(DeploymentRow::into_deployment).collect()
    }

    /// Replace the config map atomically.
    pub async fn update_deployment_config(
        &self,
        name: &str,
        version: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<Deployment> {
        let sql = format!(
            r#"
            UPDATE deployments SET config = $3, updated_at = now()
            WHERE name = $1 AND version = $2
            RETURNING {DEPLOYMENT_COLUMNS}
            "#
        );
        let row: Option<DeploymentRow> = sqlx::query_as(&sql)
            .bind(name)
            .bind(version)
            .bind(serde_json::to_value(config)?)
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| {
            AppError::NotFound(format!("deployment {name} version {version} not found"))
        })?
        .into_deployment()
    }

    pub async fn delete_deployment(&self, name: &str, version: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM deployments WHERE name = $1 AND version = $2")
            .bind(name)
            .bind(version)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "deployment {name} version {version} not found"
            )));
        }
        Ok(())
    }
}
