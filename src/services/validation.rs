//! Descriptor validation: structural checks run on every write, upstream
//! registry checks only when the feature flag is on.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::ArtifactDescriptor;

/// Artifact names are `namespace/local`: alphanumeric edges, dots and
/// dashes inside the namespace, dots/underscores/dashes inside the local
/// part.
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.-]*[a-zA-Z0-9]/[a-zA-Z0-9][a-zA-Z0-9._-]*[a-zA-Z0-9]$")
        .expect("name regex is valid")
});

const KNOWN_REGISTRY_TYPES: &[&str] = &["npm", "pypi", "docker", "oci"];
const KNOWN_REPO_SOURCES: &[&str] = &["github", "gitlab", "bitbucket"];

pub fn valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// Structural validation applied to every publish and update.
pub fn validate_descriptor(descriptor: &ArtifactDescriptor) -> Result<()> {
    if descriptor.name.is_empty() {
        return Err(AppError::ValidationFailed("name is required".into()));
    }
    if !valid_name(&descriptor.name) {
        return Err(AppError::ValidationFailed(format!(
            "name {:?} must match namespace/local format",
            descriptor.name
        )));
    }
    if descriptor.version.trim().is_empty() {
        return Err(AppError::ValidationFailed("version is required".into()));
    }
    if descriptor.description.trim().is_empty() {
        return Err(AppError::ValidationFailed("description is required".into()));
    }

    if let Some(repo) = &descriptor.repository {
        if !KNOWN_REPO_SOURCES.contains(&repo.source.as_str()) {
            return Err(AppError::ValidationFailed(format!(
                "repository source {:?} must be one of {KNOWN_REPO_SOURCES:?}",
                repo.source
            )));
        }
        validate_url(&repo.url, "repository.url")?;
    }

    if let Some(url) = &descriptor.website_url {
        validate_url(url, "websiteUrl")?;
    }

    for (i, pkg) in descriptor.packages.iter().enumerate() {
        if pkg.identifier.trim().is_empty() {
            return Err(AppError::ValidationFailed(format!(
                "packages[{i}].identifier is required"
            )));
        }
        if !KNOWN_REGISTRY_TYPES.contains(&pkg.registry_type.as_str()) {
            return Err(AppError::ValidationFailed(format!(
                "packages[{i}].registryType {:?} must be one of {KNOWN_REGISTRY_TYPES:?}",
                pkg.registry_type
            )));
        }
        if let Some(transport) = &pkg.transport {
            match transport.transport_type.as_str() {
                "" | "stdio" | "http" | "sse" => {}
                other => {
                    return Err(AppError::ValidationFailed(format!(
                        "packages[{i}].transport.type {other:?} must be stdio, http, or sse"
                    )));
                }
            }
        }
    }

    for (i, remote) in descriptor.remotes.iter().enumerate() {
        validate_url(&remote.url, &format!("remotes[{i}].url"))?;
    }

    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| AppError::ValidationFailed(format!("{field}: invalid URL: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::ValidationFailed(format!(
            "{field}: URL scheme must be http or https"
        )));
    }
    Ok(())
}

/// Upstream registry validation: confirm each declared package actually
/// exists in the registry its `registryType` points at. Feature-flagged;
/// skipped entirely for deleted versions.
pub struct RegistryValidator {
    client: reqwest::Client,
}

impl Default for RegistryValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryValidator {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub async fn validate_packages(&self, descriptor: &ArtifactDescriptor) -> Result<()> {
        for (i, pkg) in descriptor.packages.iter().enumerate() {
            self.validate_package(&pkg.registry_type, &pkg.identifier)
                .await
                .map_err(|e| {
                    AppError::ValidationFailed(format!(
                        "registry validation failed for package {i} ({}): {e}",
                        pkg.identifier
                    ))
                })?;
        }
        Ok(())
    }

    async fn validate_package(&self, registry_type: &str, identifier: &str) -> Result<()> {
        let probe_url = match registry_type {
            "npm" => format!("https://registry.npmjs.org/{identifier}"),
            "pypi" => format!("https://pypi.org/pypi/{identifier}/json"),
            // Docker/OCI identifiers embed their own registry host; probing
            // arbitrary registries needs auth flows, so existence is taken
            // on trust for container images.
            "docker" | "oci" => return Ok(()),
            other => {
                return Err(AppError::ValidationFailed(format!(
                    "unknown registry type {other:?}"
                )));
            }
        };

        let resp = self
            .client
            .get(&probe_url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ValidationFailed(format!(
                "package {identifier:?} not found in {registry_type} registry"
            )));
        }
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "{registry_type} registry returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
