//! Best-effort descriptor enrichment.
//!
//! Pulls container registry stats, a dependency/license summary, and the
//! OpenSSF Scorecard aggregate for imported servers. Every fetch has its
//! own timeout and every failure is silent from the importer's point of
//! view; enrichment can only ever add metadata.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::ArtifactDescriptor;

/// Extension key the enrichment block is stored under in the descriptor.
pub const ENRICHMENT_META_KEY: &str = "dev.amphora.registry/enrichment";

const ENRICH_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Enricher {
    client: reqwest::Client,
    github_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct Enrichment {
    pub container: Option<ContainerSummary>,
    pub dependencies: Option<DependencySummary>,
    pub scorecard: Option<ScorecardSummary>,
}

#[derive(Debug)]
pub struct ContainerSummary {
    pub image: String,
    pub pull_count: i64,
    pub star_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub latest_tag: Option<String>,
}

#[derive(Debug, Default)]
pub struct DependencySummary {
    pub total_packages: usize,
    pub ecosystems: BTreeMap<String, usize>,
    pub unknown_license_count: usize,
}

#[derive(Debug)]
pub struct ScorecardSummary {
    pub score: f64,
    pub highlights: Vec<String>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.container.is_none() && self.dependencies.is_none() && self.scorecard.is_none()
    }

    /// Render the enrichment as the JSON block attached to the descriptor.
    pub fn to_meta(&self) -> Value {
        let mut out = serde_json::Map::new();
        if let Some(c) = &self.container {
            out.insert(
                "container".into(),
                json!({
                    "image": c.image,
                    "pulls": c.pull_count,
                    "stars": c.star_count,
                    "lastUpdated": c.last_updated,
                    "latestTag": c.latest_tag,
                }),
            );
        }
        if let Some(d) = &self.dependencies {
            out.insert(
                "dependencies".into(),
                json!({
                    "total": d.total_packages,
                    "ecosystems": d.ecosystems,
                    "unknownLicense": d.unknown_license_count,
                }),
            );
        }
        if let Some(s) = &self.scorecard {
            out.insert(
                "scorecard".into(),
                json!({"score": s.score, "highlights": s.highlights}),
            );
        }
        Value::Object(out)
    }
}

impl Enricher {
    pub fn new(github_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ENRICH_TIMEOUT)
            .user_agent("amphora-registry")
            .build()
            .unwrap_or_default();
        Self {
            client,
            github_token,
        }
    }

    /// Gather whatever enrichment is reachable for a descriptor. Individual
    /// source failures are logged at debug and dropped.
    pub async fn enrich(&self, descriptor: &ArtifactDescriptor) -> Enrichment {
        let mut out = Enrichment::default();

        let github = descriptor
            .repository
            .as_ref()
            .filter(|r| r.source == "github")
            .and_then(|r| github_owner_repo(&r.url));

        match self.docker_hub_summary(descriptor).await {
            Ok(summary) => out.container = summary,
            Err(e) => debug!("container enrichment failed: {e}"),
        }

        if let Some((owner, repo)) = &github {
            match self.dependency_summary(owner, repo).await {
                Ok(summary) => out.dependencies = Some(summary),
                Err(e) => debug!("dependency enrichment failed: {e}"),
            }
            match self.scorecard_summary(owner, repo).await {
                Ok(summary) => out.scorecard = Some(summary),
                Err(e) => debug!("scorecard enrichment failed: {e}"),
            }
        }

        out
    }

    /// Docker Hub repository stats for the first OCI/docker package.
    async fn docker_hub_summary(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<Option<ContainerSummary>> {
        let Some((owner, repo)) = descriptor
            .packages
            .iter()
            .filter(|p| p.registry_type == "oci" || p.registry_type == "docker")
            .find_map(|p| docker_owner_repo(&p.identifier))
        else {
            return Ok(None);
        };

        #[derive(Deserialize)]
        struct HubRepo {
            namespace: String,
            name: String,
            pull_count: i64,
            star_count: i64,
            last_updated: Option<DateTime<Utc>>,
        }

        let base = format!("https://hub.docker.com/v2/repositories/{owner}/{repo}");
        let resp = self
            .client
            .get(&base)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "docker hub status {}",
                resp.status()
            )));
        }
        let hub: HubRepo = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let mut summary = ContainerSummary {
            image: format!("{}/{}", hub.namespace, hub.name),
            pull_count: hub.pull_count,
            star_count: hub.star_count,
            last_updated: hub.last_updated,
            latest_tag: None,
        };

        // Latest tag is nice to have; its failure never hides the repo stats.
        #[derive(Deserialize)]
        struct TagPage {
            results: Vec<TagEntry>,
        }
        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }
        let tags_url = format!("{base}/tags?page_size=1&ordering=last_updated");
        if let Ok(resp) = self.client.get(&tags_url).send().await {
            if resp.status().is_success() {
                if let Ok(page) = resp.json::<TagPage>().await {
                    summary.latest_tag = page.results.into_iter().next().map(|t| t.name);
                }
            }
        }

        Ok(Some(summary))
    }

    /// License/ecosystem roll-up from the GitHub dependency-graph SBOM.
    async fn dependency_summary(&self, owner: &str, repo: &str) -> Result<DependencySummary> {
        let url =
            format!("https://api.github.com/repos/{owner}/{repo}/dependency-graph/sbom?ref=HEAD");
        let mut req = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.github_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "github sbom status {}",
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct SbomEnvelope {
            sbom: Sbom,
        }
        #[derive(Deserialize)]
        struct Sbom {
            #[serde(default)]
            packages: Vec<SbomPackage>,
        }
        #[derive(Deserialize)]
        struct SbomPackage {
            #[serde(default)]
            name: String,
            #[serde(default, rename = "licenseConcluded")]
            license_concluded: Option<String>,
        }

        let envelope: SbomEnvelope = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let mut summary = DependencySummary::default();
        for package in envelope.sbom.packages {
            summary.total_packages += 1;
            // purl-style names look like "npm:left-pad" or "pypi:requests".
            if let Some((ecosystem, _)) = package.name.split_once(':') {
                *summary.ecosystems.entry(ecosystem.to_string()).or_insert(0) += 1;
            }
            match package.license_concluded.as_deref() {
                None | Some("") | Some("NOASSERTION") => summary.unknown_license_count += 1,
                Some(_) => {}
            }
        }
        Ok(summary)
    }

    /// OpenSSF Scorecard aggregate plus the lowest-scoring checks.
    async fn scorecard_summary(&self, owner: &str, repo: &str) -> Result<ScorecardSummary> {
        let url = format!("https://api.securityscorecards.dev/projects/github.com/{owner}/{repo}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "scorecard status {}",
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct ScorecardResponse {
            score: f64,
            #[serde(default)]
            checks: Vec<ScorecardCheck>,
        }
        #[derive(Deserialize)]
        struct ScorecardCheck {
            name: String,
            score: i64,
            #[serde(default)]
            reason: String,
        }

        let body: ScorecardResponse = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let mut failing: Vec<_> = body
            .checks
            .into_iter()
            .filter(|c| c.score >= 0 && c.score < 10)
            .collect();
        failing.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.name.cmp(&b.name)));

        let highlights = failing
            .into_iter()
            .take(5)
            .map(|c| {
                let mut reason = c.reason.trim().to_string();
                if reason.len() > 120 {
                    reason.truncate(117);
                    reason.push_str("...");
                }
                if reason.is_empty() {
                    format!("scorecard: {}={}/10", c.name, c.score)
                } else {
                    format!("scorecard: {}={}/10 ({reason})", c.name, c.score)
                }
            })
            .collect();

        Ok(ScorecardSummary {
            score: body.score,
            highlights,
        })
    }
}

/// `https://github.com/owner/repo[...]` -> `(owner, repo)`.
fn github_owner_repo(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let mut parts = rest.split('/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.trim_end_matches(".git").to_string();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

/// `docker.io/owner/repo[:tag]` (or `owner/repo`) -> `(owner, repo)`.
fn docker_owner_repo(identifier: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = identifier.split('/').collect();
    let (owner, repo) = match parts.as_slice() {
        [registry, owner, repo] if registry.contains('.') => (*owner, *repo),
        [owner, repo] => (*owner, *repo),
        _ => return None,
    };
    let repo = repo.split(':').next().unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_lowercase(), repo.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_owner_repo_parsing() {
        assert_eq!(
            github_owner_repo("https://github.com/example/echo"),
            Some(("example".into(), "echo".into()))
        );
        assert_eq!(
            github_owner_repo("https://github.com/example/echo.git"),
            Some(("example".into(), "echo".into()))
        );
        assert_eq!(
            github_owner_repo("https://github.com/example/echo/tree/main"),
            Some(("example".into(), "echo".into()))
        );
        assert_eq!(github_owner_repo("https://gitlab.com/example/echo"), None);
    }

    #[test]
    fn test_docker_owner_repo_parsing() {
        assert_eq!(
            docker_owner_repo("docker.io/example/server:0.17.0"),
            Some(("example".into(), "server".into()))
        );
        assert_eq!(
            docker_owner_repo("Example/Server"),
            Some(("example".into(), "server".into()))
        );
        assert_eq!(docker_owner_repo("justaname"), None);
    }

    #[test]
    fn test_enrichment_meta_rendering() {
        let enrichment = Enrichment {
            container: Some(ContainerSummary {
                image: "example/server".into(),
                pull_count: 1200,
                star_count: 34,
                last_updated: None,
                latest_tag: Some("0.17.0".into()),
            }),
            dependencies: None,
            scorecard: Some(ScorecardSummary {
                score: 7.5,
                highlights: vec!["scorecard: Fuzzing=0/10".into()],
            }),
        };
        let meta = enrichment.to_meta();
        assert_eq!(meta["container"]["pulls"], 1200);
        assert_eq!(meta["container"]["latestTag"], "0.17.0");
        assert_eq!(meta["scorecard"]["score"], 7.5);
        assert!(meta.get("dependencies").is_none());
    }

    #[test]
    fn test_empty_enrichment() {
        assert!(Enrichment::default().is_empty());
    }
}
