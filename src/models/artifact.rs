//! Artifact descriptor and registry metadata models.
//!
//! The descriptor body is an open document: the typed fields below cover
//! everything the registry interprets, and `extra` captures publisher
//! extensions verbatim so nothing is dropped on a write/read round trip.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Extension key recording which registered import source a descriptor came
/// from. Removing that source cascades to rows carrying its label.
pub const SOURCE_META_KEY: &str = "dev.amphora.registry/source";

/// The three artifact namespaces. Each kind lives in its own table and URL
/// subtree but shares the same descriptor shape and catalogue semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Server,
    Agent,
    Skill,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Server, Self::Agent, Self::Skill];

    /// Singular form, used as the payload key in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Agent => "agent",
            Self::Skill => "skill",
        }
    }

    /// Backing table name. Compile-time constant so query strings can be
    /// assembled without any user-controlled input.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::Agent => "agents",
            Self::Skill => "skills",
        }
    }

    /// Plural URL path segment under `/v0`.
    pub fn path_segment(&self) -> &'static str {
        self.table()
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "server" | "servers" => Ok(Self::Server),
            "agent" | "agents" => Ok(Self::Agent),
            "skill" | "skills" => Ok(Self::Skill),
            other => Err(AppError::ValidationFailed(format!(
                "unknown artifact kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a published version.
///
/// Allowed transitions: active -> deprecated, any -> deleted. Deleted is the
/// logical tombstone; rows are never physically removed by a user delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Active,
    Deprecated,
    Deleted,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            "deleted" => Ok(Self::Deleted),
            other => Err(AppError::ValidationFailed(format!(
                "unknown status: {other}"
            ))),
        }
    }

    /// Whether a transition from `self` to `to` is allowed.
    pub fn can_transition_to(&self, to: ArtifactStatus) -> bool {
        match (self, to) {
            (_, Self::Deleted) => true,
            (Self::Active, Self::Deprecated) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }
}

/// Source repository reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub source: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Icon reference; everything beyond the source URL is passed through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Icon {
    pub src: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One launch/package argument. `{placeholder}` tokens in `value` are
/// substituted from deployment config at translation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub arg_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_required: bool,
}

/// Declared environment variable for a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_secret: bool,
}

/// HTTP header declared on a transport or remote endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_secret: bool,
}

/// Transport wiring for a package-backed server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transport {
    #[serde(rename = "type", default)]
    pub transport_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
}

/// A runnable package distribution of the artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub registry_type: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

/// A hosted endpoint of the artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Remote {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub remote_type: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
}

/// The descriptor body published by clients. Unknown fields survive in
/// `extra` and are re-emitted on serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<Icon>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Registry-owned metadata attached to every stored version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfficialMeta {
    pub status: ArtifactStatus,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_latest: bool,
}

/// A stored artifact version: descriptor plus registry metadata.
///
/// Serializes as `{"<kind>": {...descriptor...}, "_meta": {"official": {...}}}`
/// so server, agent, and skill responses keep their kind-specific payload key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVersion {
    pub kind: ArtifactKind,
    pub descriptor: ArtifactDescriptor,
    pub meta: OfficialMeta,
}

impl StoredVersion {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn version(&self) -> &str {
        &self.descriptor.version
    }
}

impl Serialize for StoredVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct MetaEnvelope<'a> {
            official: &'a OfficialMeta,
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.kind.as_str(), &self.descriptor)?;
        map.serialize_entry("_meta", &MetaEnvelope {
            official: &self.meta,
        })?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for StoredVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| D::Error::custom("expected object"))?;

        let (kind, payload) = ArtifactKind::ALL
            .iter()
            .find_map(|k| obj.get(k.as_str()).map(|v| (*k, v)))
            .ok_or_else(|| D::Error::custom("missing artifact payload key"))?;

        let descriptor: ArtifactDescriptor =
            serde_json::from_value(payload.clone()).map_err(D::Error::custom)?;
        let meta: OfficialMeta = obj
            .get("_meta")
            .and_then(|m| m.get("official"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("missing _meta.official"))?;

        Ok(StoredVersion {
            kind,
            descriptor,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> OfficialMeta {
        OfficialMeta {
            status: ArtifactStatus::Active,
            published_at: Utc::now(),
            updated_at: Utc::now(),
            is_latest: true,
        }
    }

    #[test]
    fn test_kind_tables_and_segments() {
        assert_eq!(ArtifactKind::Server.table(), "servers");
        assert_eq!(ArtifactKind::Agent.table(), "agents");
        assert_eq!(ArtifactKind::Skill.table(), "skills");
        assert_eq!(ArtifactKind::parse("servers").unwrap(), ArtifactKind::Server);
        assert!(ArtifactKind::parse("toolchains").is_err());
    }

    #[test]
    fn test_status_transitions() {
        use ArtifactStatus::*;
        assert!(Active.can_transition_to(Deprecated));
        assert!(Active.can_transition_to(Deleted));
        assert!(Deprecated.can_transition_to(Deleted));
        assert!(Deleted.can_transition_to(Deleted));
        assert!(!Deprecated.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Deprecated));
    }

    #[test]
    fn test_descriptor_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "name": "io.example/echo",
            "version": "1.0.0",
            "description": "d",
            "x-publisher": {"build": 42},
            "$schema": "https://example.com/schema.json"
        });
        let descriptor: ArtifactDescriptor = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(descriptor.extra["x-publisher"]["build"], 42);

        let round_tripped = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(round_tripped["x-publisher"], raw["x-publisher"]);
        assert_eq!(round_tripped["$schema"], raw["$schema"]);
    }

    #[test]
    fn test_descriptor_camel_case_wire_names() {
        let raw = serde_json::json!({
            "name": "io.example/weather",
            "version": "2.0.0",
            "description": "weather tools",
            "websiteUrl": "https://weather.example",
            "packages": [{
                "registryType": "npm",
                "identifier": "@example/weather",
                "environmentVariables": [
                    {"name": "API_KEY", "isRequired": true, "isSecret": true}
                ],
                "transport": {"type": "http", "port": 3000, "path": "/mcp"}
            }]
        });
        let descriptor: ArtifactDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(descriptor.website_url.as_deref(), Some("https://weather.example"));
        let pkg = &descriptor.packages[0];
        assert_eq!(pkg.registry_type, "npm");
        assert!(pkg.environment_variables[0].is_required);
        assert!(pkg.environment_variables[0].is_secret);
        assert_eq!(pkg.transport.as_ref().unwrap().port, Some(3000));

        let out = serde_json::to_value(&descriptor).unwrap();
        assert!(out["packages"][0].get("registryType").is_some());
        assert!(out["packages"][0]["environmentVariables"][0]
            .get("isSecret")
            .is_some());
    }

    #[test]
    fn test_stored_version_serializes_under_kind_key() {
        let stored = StoredVersion {
            kind: ArtifactKind::Server,
            descriptor: ArtifactDescriptor {
                name: "io.example/echo".into(),
                version: "1.0.0".into(),
                description: "d".into(),
                ..Default::default()
            },
            meta: sample_meta(),
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["server"]["name"], "io.example/echo");
        assert_eq!(value["_meta"]["official"]["isLatest"], true);
        assert_eq!(value["_meta"]["official"]["status"], "active");
    }

    #[test]
    fn test_stored_version_round_trips_for_each_kind() {
        for kind in ArtifactKind::ALL {
            let stored = StoredVersion {
                kind,
                descriptor: ArtifactDescriptor {
                    name: "a.b/x".into(),
                    version: "0.1.0".into(),
                    ..Default::default()
                },
                meta: sample_meta(),
            };
            let json = serde_json::to_string(&stored).unwrap();
            let back: StoredVersion = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind, kind);
            assert_eq!(back.descriptor.name, "a.b/x");
        }
    }
}
