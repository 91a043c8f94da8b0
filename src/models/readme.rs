//! README blob model.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A README attached to one artifact version. `content` holds the decoded
/// bytes; at rest the store keeps them base64-encoded next to their digest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readme {
    pub name: String,
    pub version: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}
