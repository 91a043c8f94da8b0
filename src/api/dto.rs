//! Shared request/response shapes for the v0 API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Keyset pagination envelope used by every list endpoint.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub items: Vec<T>,
    pub metadata: ListMetadata,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    /// Number of items in this page.
    pub count: usize,
    /// Opaque continuation token; absent on the final page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        let count = items.len();
        Self {
            items,
            metadata: ListMetadata { count, next_cursor },
        }
    }
}

/// Query parameters accepted by catalogue list endpoints.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListQuery {
    pub cursor: Option<String>,
    /// Page size; defaults to 30, capped at 100.
    pub limit: Option<i64>,
    /// Substring search over name and description.
    pub search: Option<String>,
    /// Exact version filter.
    pub version: Option<String>,
    /// RFC 3339 lower bound on `updatedAt`.
    pub updated_since: Option<chrono::DateTime<chrono::Utc>>,
}

/// Maximum page size the API hands out.
pub const MAX_LIST_LIMIT: i64 = 100;

impl ListQuery {
    /// Effective page size: default 30, capped at [`MAX_LIST_LIMIT`].
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(l) if l > 0 => l.min(MAX_LIST_LIMIT),
            _ => 30,
        }
    }
}
