//! Import source bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A remote registry or seed source the importer has been pointed at.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportRegistry {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub registry_type: String,
    pub created_at: DateTime<Utc>,
}
