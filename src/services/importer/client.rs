//! Remote registry client: envelope probing and cursor pagination.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{ArtifactDescriptor, ArtifactStatus};

const PAGE_LIMIT: usize = 100;
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Paginated registry page envelope. `servers` also accepts `items` so one
/// instance can import from another as well as from upstream registries.
#[derive(Debug, Deserialize)]
pub struct RegistryPage {
    #[serde(alias = "items")]
    pub servers: Vec<PageEntry>,
    pub metadata: PageMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One entry of a registry page: the descriptor plus whatever metadata the
/// source attached.
#[derive(Debug, Deserialize)]
pub struct PageEntry {
    pub server: ArtifactDescriptor,
    #[serde(default, rename = "_meta")]
    pub meta: Option<Value>,
}

impl PageEntry {
    /// Entry status as reported by the source: `_meta.official.status`
    /// first, then a top-level `status` field inside the descriptor body.
    pub fn status(&self) -> Option<ArtifactStatus> {
        let from_meta = self
            .meta
            .as_ref()
            .and_then(|m| m.get("official"))
            .and_then(|o| o.get("status"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let from_body = self
            .server
            .extra
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_owned);

        from_meta
            .or(from_body)
            .and_then(|s| ArtifactStatus::parse(&s).ok())
    }

    /// Active entries (or entries without a status) are importable.
    pub fn is_importable(&self) -> bool {
        matches!(self.status(), None | Some(ArtifactStatus::Active))
    }
}

pub struct RegistryClient {
    client: reqwest::Client,
    headers: std::collections::BTreeMap<String, String>,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PAGE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            headers: Default::default(),
        }
    }

    /// Extra headers attached to every request (auth against private
    /// sources, typically).
    pub fn with_headers(mut self, headers: std::collections::BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.headers
            .iter()
            .fold(self.client.get(url), |req, (name, value)| {
                req.header(name, value)
            })
    }

    /// Probe `base_url` with `limit=1`. A valid registry envelope (has
    /// `servers`/`items` and `metadata`) means the source paginates;
    /// anything else is treated as a seed file.
    pub async fn is_registry_endpoint(&self, base_url: &str) -> bool {
        let probe_url = format!("{base_url}?limit=1");
        let Ok(resp) = self.get(&probe_url).send().await else {
            return false;
        };
        if !resp.status().is_success() {
            return false;
        }
        let Ok(body) = resp.json::<Value>().await else {
            return false;
        };
        let has_servers = body.get("servers").is_some() || body.get("items").is_some();
        has_servers && body.get("metadata").is_some()
    }

    /// Fetch every importable entry via cursor pagination. Pages continue
    /// while `metadata.nextCursor` is non-empty; inactive entries are
    /// dropped page by page.
    pub async fn fetch_all(&self, base_url: &str) -> Result<Vec<PageEntry>> {
        let mut all = Vec::new();
        let mut cursor = String::new();
        let mut page_count = 0usize;

        loop {
            page_count += 1;
            let mut url = format!("{base_url}?limit={PAGE_LIMIT}");
            if !cursor.is_empty() {
                url.push_str("&cursor=");
                url.push_str(&urlencode(&cursor));
            }

            let resp = self.get(&url).send().await.map_err(|e| {
                AppError::UpstreamUnavailable(format!("failed to fetch page {page_count}: {e}"))
            })?;
            if !resp.status().is_success() {
                return Err(AppError::UpstreamUnavailable(format!(
                    "unexpected status {} on page {page_count}",
                    resp.status()
                )));
            }

            let page: RegistryPage = resp.json().await.map_err(|e| {
                AppError::UpstreamUnavailable(format!(
                    "failed to parse page {page_count}: {e}"
                ))
            })?;

            let before = all.len();
            all.extend(page.servers.into_iter().filter(PageEntry::is_importable));
            debug!(
                page = page_count,
                active = all.len() - before,
                total = all.len(),
                "fetched registry page"
            );

            match page.metadata.next_cursor {
                Some(next) if !next.is_empty() => cursor = next,
                _ => break,
            }
        }

        Ok(all)
    }

    /// Fetch a seed document over HTTP.
    pub async fn fetch_seed(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("failed to read seed data: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "failed to read seed data: status {}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("failed to read seed data: {e}"))
        })?.to_vec())
    }
}

/// Minimal query-component percent-encoding for cursor values.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
