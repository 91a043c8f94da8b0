//! Descriptor-to-runtime translation.
//!
//! Resolves a `(descriptor, deployment config, preferRemote)` triple into
//! the abstract shapes the reconciler backends consume. Resolution is pure:
//! identical inputs always produce identical output, and the desired state
//! is kept sorted so serialized forms are byte-stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{
    partition_config, Argument, ArtifactDescriptor, Deployment, Package, PartitionedConfig,
    Remote,
};

/// Default HTTP port an MCP server container listens on.
pub const DEFAULT_MCP_PORT: u16 = 3000;
/// Default HTTP path of the MCP endpoint.
pub const DEFAULT_MCP_PATH: &str = "/mcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

/// Concrete container launch spec for a package-backed resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub port: u16,
    pub path: String,
}

/// A locally-run MCP server: container plus transport wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBinding {
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpEndpoint>,
    pub container: ContainerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedHeader {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_secret: bool,
}

/// A remotely-hosted MCP server: URL plus effective headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBinding {
    pub url: String,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ResolvedHeader>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerBinding {
    Local(LocalBinding),
    Remote(RemoteBinding),
}

/// One MCP server bound to a concrete endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedServer {
    pub name: String,
    pub version: String,
    /// Runtime object name: sanitized for container and Kubernetes use.
    pub runtime_name: String,
    #[serde(flatten)]
    pub binding: ServerBinding,
}

/// One agent bound to its image plus the MCP servers it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAgent {
    pub name: String,
    pub version: String,
    pub runtime_name: String,
    pub container: ContainerSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ResolvedServer>,
}

/// Everything a reconcile should make real on one runtime target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub mcp_servers: Vec<ResolvedServer>,
    pub agents: Vec<ResolvedAgent>,
}

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty() && self.agents.is_empty()
    }

    /// Sort both lists so repeated translations serialize identically.
    pub fn normalize(&mut self) {
        self.mcp_servers
            .sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        self.agents
            .sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        for agent in &mut self.agents {
            agent
                .servers
                .sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        }
    }
}

/// Declared MCP-server dependency of an agent, read from the descriptor's
/// `dependencies` extension field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parse an agent descriptor's declared MCP-server dependencies.
pub fn agent_dependencies(descriptor: &ArtifactDescriptor) -> Vec<AgentDependency> {
    descriptor
        .extra
        .get("dependencies")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Resolve an MCP server descriptor against its deployment intent.
pub fn resolve_server(
    descriptor: &ArtifactDescriptor,
    deployment: &Deployment,
) -> Result<ResolvedServer> {
    let parts = partition_config(&deployment.config);

    let use_remote = !descriptor.remotes.is_empty()
        && (deployment.prefer_remote || descriptor.packages.is_empty());

    let binding = if use_remote {
        ServerBinding::Remote(resolve_remote(&descriptor.remotes[0], &parts))
    } else if let Some(package) = descriptor.packages.first() {
        ServerBinding::Local(resolve_package(package, &parts, &descriptor.name)?)
    } else {
        return Err(AppError::ValidationFailed(format!(
            "{} declares neither packages nor remotes; nothing to deploy",
            descriptor.name
        )));
    };

    Ok(ResolvedServer {
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        runtime_name: runtime_name(&descriptor.name, &descriptor.version),
        binding,
    })
}

/// Resolve an agent descriptor: its container image plus the already
/// resolved MCP servers it depends on.
pub fn resolve_agent(
    descriptor: &ArtifactDescriptor,
    deployment: &Deployment,
    servers: Vec<ResolvedServer>,
) -> Result<ResolvedAgent> {
    let parts = partition_config(&deployment.config);

    let package = descriptor.packages.first().ok_or_else(|| {
        AppError::ValidationFailed(format!(
            "agent {} declares no package; agents need a container image",
            descriptor.name
        ))
    })?;
    if package.registry_type != "oci" && package.registry_type != "docker" {
        return Err(AppError::ValidationFailed(format!(
            "agent {} package must be a container image (docker/oci), got {}",
            descriptor.name, package.registry_type
        )));
    }

    let container = ContainerSpec {
        image: container_image(package),
        cmd: None,
        args: assemble_args(package, &parts)?,
        env: assemble_env(package, &parts)?,
    };

    Ok(ResolvedAgent {
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        runtime_name: runtime_name(&descriptor.name, &descriptor.version),
        container,
        servers,
    })
}

fn resolve_remote(remote: &Remote, parts: &PartitionedConfig) -> RemoteBinding {
    let transport = match remote.remote_type.as_deref() {
        Some(t) if t.contains("sse") => TransportKind::Sse,
        _ => TransportKind::Http,
    };

    // Declared headers first, HEADER_* config overlaid on top.
    let mut headers: BTreeMap<String, ResolvedHeader> = BTreeMap::new();
    for h in &remote.headers {
        headers.insert(
            h.name.clone(),
            ResolvedHeader {
                name: h.name.clone(),
                value: h.value.clone().unwrap_or_default(),
                is_secret: h.is_secret,
            },
        );
    }
    for (name, value) in &parts.headers {
        let is_secret = headers.get(name).map(|h| h.is_secret).unwrap_or(false);
        headers.insert(
            name.clone(),
            ResolvedHeader {
                name: name.clone(),
                value: value.clone(),
                is_secret,
            },
        );
    }

    RemoteBinding {
        url: remote.url.clone(),
        transport,
        headers: headers.into_values().collect(),
    }
}

fn resolve_package(
    package: &Package,
    parts: &PartitionedConfig,
    server_name: &str,
) -> Result<LocalBinding> {
    let transport_type = package
        .transport
        .as_ref()
        .map(|t| t.transport_type.as_str())
        .unwrap_or("");

    let (transport, http) = match transport_type {
        "" | "stdio" => (TransportKind::Stdio, None),
        "http" | "sse" => {
            let declared = package.transport.as_ref();
            let endpoint = HttpEndpoint {
                port: declared.and_then(|t| t.port).unwrap_or(DEFAULT_MCP_PORT),
                path: declared
                    .and_then(|t| t.path.clone())
                    .unwrap_or_else(|| DEFAULT_MCP_PATH.to_string()),
            };
            let kind = if transport_type == "sse" {
                TransportKind::Sse
            } else {
                TransportKind::Http
            };
            (kind, Some(endpoint))
        }
        other => {
            return Err(AppError::ValidationFailed(format!(
                "{server_name}: unsupported transport type {other:?}"
            )));
        }
    };

    let (image, cmd, launch_args) = launch_plan(package)?;
    let mut args = launch_args;
    args.extend(assemble_args(package, parts)?);

    Ok(LocalBinding {
        transport,
        http,
        container: ContainerSpec {
            image,
            cmd,
            args,
            env: assemble_env(package, parts)?,
        },
    })
}

/// Image and launch command for a package, by upstream registry type.
fn launch_plan(package: &Package) -> Result<(String, Option<String>, Vec<String>)> {
    let spec = package_spec(package);
    match package.registry_type.as_str() {
        "npm" => Ok((
            "node:22-alpine".into(),
            Some("npx".into()),
            vec!["-y".into(), spec],
        )),
        // `sh -c '... "$@"' --` keeps appended arguments out of the
        // install script while still reaching the launched binary.
        "pypi" => {
            let binary = package
                .identifier
                .rsplit('/')
                .next()
                .unwrap_or(&package.identifier);
            Ok((
                "python:3.12-slim".into(),
                Some("sh".into()),
                vec![
                    "-c".into(),
                    format!("pip install --quiet '{spec}' && exec {binary} \"$@\""),
                    "--".into(),
                ],
            ))
        }
        "docker" | "oci" => Ok((container_image(package), None, Vec::new())),
        other => Err(AppError::ValidationFailed(format!(
            "unsupported package registry type {other:?}"
        ))),
    }
}

/// `identifier==version` / `identifier@version` style install spec.
fn package_spec(package: &Package) -> String {
    match (&package.registry_type[..], &package.version) {
        ("npm", Some(v)) => format!("{}@{v}", package.identifier),
        ("pypi", Some(v)) => format!("{}=={v}", package.identifier),
        _ => package.identifier.clone(),
    }
}

/// Container image reference for docker/oci packages; the package version
/// becomes the tag when the identifier does not already pin one.
fn container_image(package: &Package) -> String {
    let has_tag = package
        .identifier
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':'));
    match (&package.version, has_tag) {
        (Some(v), false) => format!("{}:{v}", package.identifier),
        _ => package.identifier.clone(),
    }
}

/// Assemble runtime arguments (prepended) and package arguments (appended),
/// substituting `{var}` placeholders from the ARG_* config partition.
fn assemble_args(package: &Package, parts: &PartitionedConfig) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for arg in package
        .runtime_arguments
        .iter()
        .chain(package.package_arguments.iter())
    {
        append_argument(arg, parts, &mut out)?;
    }
    Ok(out)
}

fn append_argument(
    arg: &Argument,
    parts: &PartitionedConfig,
    out: &mut Vec<String>,
) -> Result<()> {
    let configured = arg.name.as_deref().and_then(|n| parts.args.get(n));
    let raw = configured
        .cloned()
        .or_else(|| arg.value.clone())
        .or_else(|| arg.default.clone());

    let value = match raw {
        Some(raw) => {
            let substituted = substitute_placeholders(&raw, &parts.args);
            if arg.is_required && substituted.contains('{') && substituted.contains('}') {
                return Err(AppError::ValidationFailed(format!(
                    "argument {} has unresolved placeholder in {substituted:?}",
                    arg.name.as_deref().unwrap_or("<positional>")
                )));
            }
            Some(substituted)
        }
        None => None,
    };

    if value.is_none() && arg.is_required {
        let name = arg.name.as_deref().unwrap_or("<positional>");
        return Err(AppError::ValidationFailed(format!(
            "required argument {name} has no value; set ARG_{name} in the deployment config"
        )));
    }

    let is_named = arg.arg_type.as_deref() == Some("named");
    match (is_named, arg.name.as_deref()) {
        (true, Some(name)) => {
            out.push(if name.starts_with('-') {
                name.to_string()
            } else {
                format!("--{name}")
            });
            if let Some(v) = value {
                if !v.is_empty() {
                    out.push(v);
                }
            }
        }
        _ => {
            if let Some(v) = value {
                out.push(v);
            }
        }
    }
    Ok(())
}

/// Environment: declared defaults first, non-prefixed config overlaid;
/// missing required variables fail resolution.
fn assemble_env(package: &Package, parts: &PartitionedConfig) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for declared in &package.environment_variables {
        let value = parts
            .env
            .get(&declared.name)
            .cloned()
            .or_else(|| declared.value.clone())
            .or_else(|| declared.default.clone());
        match value {
            Some(v) => {
                out.insert(declared.name.clone(), v);
            }
            None if declared.is_required => {
                return Err(AppError::ValidationFailed(format!(
                    "required environment variable {} is not configured",
                    declared.name
                )));
            }
            None => {}
        }
    }
    for (key, value) in &parts.env {
        out.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Ok(out)
}

/// Replace each `{key}` occurrence with its configured value.
fn substitute_placeholders(value: &str, args: &BTreeMap<String, String>) -> String {
    let mut out = value.to_string();
    for (key, replacement) in args {
        out = out.replace(&format!("{{{key}}}"), replacement);
    }
    out
}

/// Derive a runtime object name: lowercase, collapse every non-[a-z0-9]
/// run into one dash, trim dashes, fall back to "agent" when empty.
pub fn sanitize_runtime_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_dash = false;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "agent".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitized `name-version` runtime name; the version suffix is dropped
/// when empty.
pub fn runtime_name(name: &str, version: &str) -> String {
    if version.is_empty() {
        sanitize_runtime_name(name)
    } else {
        sanitize_runtime_name(&format!("{name}-{version}"))
    }
}
