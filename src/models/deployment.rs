//! Deployment intent model and config-key partitioning.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AppError, Result};

/// Resource kinds that can be deployed. Skills are catalogue-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeployableKind {
    Mcp,
    Agent,
}

impl DeployableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "mcp" | "" => Ok(Self::Mcp),
            "agent" => Ok(Self::Agent),
            other => Err(AppError::ValidationFailed(format!(
                "invalid resource type {other:?}: must be 'mcp' or 'agent'"
            ))),
        }
    }
}

/// Recorded intent to run one artifact version on a runtime target.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub resource_type: DeployableKind,
    pub server_name: String,
    pub version: String,
    /// Raw key-value configuration; keys are partitioned by prefix at
    /// resolution time (see [`partition_config`]).
    pub config: BTreeMap<String, String>,
    pub prefer_remote: bool,
    /// Runtime target: "local" or "kubernetes".
    pub runtime: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Config prefix that routes a value to remote HTTP headers.
pub const HEADER_PREFIX: &str = "HEADER_";
/// Config prefix that routes a value to argument placeholder substitution.
pub const ARG_PREFIX: &str = "ARG_";

/// Deployment config split along the prefix contract: `HEADER_*` keys become
/// HTTP headers, `ARG_*` keys feed argument placeholders, everything else is
/// an environment variable. Prefixes are stripped from the partitioned keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionedConfig {
    pub headers: BTreeMap<String, String>,
    pub args: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

/// Partition a raw deployment config map by key prefix.
pub fn partition_config(config: &BTreeMap<String, String>) -> PartitionedConfig {
    let mut out = PartitionedConfig::default();
    for (key, value) in config {
        if let Some(stripped) = key.strip_prefix(HEADER_PREFIX) {
            out.headers.insert(stripped.to_string(), value.clone());
        } else if let Some(stripped) = key.strip_prefix(ARG_PREFIX) {
            out.args.insert(stripped.to_string(), value.clone());
        } else {
            out.env.insert(key.clone(), value.clone());
        }
    }
    out
}
