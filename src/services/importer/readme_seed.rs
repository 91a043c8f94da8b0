//! README seed file codec.
//!
//! A README seed is a JSON map keyed `name@version`, each value carrying
//! base64 content with its size and digest. Decoding re-verifies both.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// One README blob in a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadmeEntry {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// The seed file: `name@version` -> entry.
pub type ReadmeFile = HashMap<String, ReadmeEntry>;

/// Standard key format for seed entries.
pub fn readme_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Encode raw README bytes into a seed entry.
pub fn encode_readme(content: &[u8], content_type: &str) -> ReadmeEntry {
    if content.is_empty() {
        return ReadmeEntry {
            content_type: Some(content_type.to_string()),
            ..Default::default()
        };
    }
    let mut hasher = Sha256::new();
    hasher.update(content);
    ReadmeEntry {
        content: BASE64.encode(content),
        content_type: Some(content_type.to_string()),
        size_bytes: content.len(),
        sha256: hex::encode(hasher.finalize()),
    }
}

impl ReadmeEntry {
    /// Decode and verify the entry, returning the raw bytes and content type.
    pub fn decode(&self) -> Result<(Vec<u8>, String)> {
        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| "text/markdown".to_string());

        if self.content.is_empty() {
            return Ok((Vec::new(), content_type));
        }

        let data = BASE64.decode(&self.content).map_err(|e| {
            AppError::ValidationFailed(format!("failed to decode README content: {e}"))
        })?;

        if self.size_bytes > 0 && data.len() != self.size_bytes {
            return Err(AppError::ValidationFailed(format!(
                "README size mismatch: expected {} bytes, got {}",
                self.size_bytes,
                data.len()
            )));
        }

        if !self.sha256.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            if hex::encode(hasher.finalize()) != self.sha256.to_lowercase() {
                return Err(AppError::ValidationFailed("README sha256 mismatch".into()));
            }
        }

        Ok((data, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let content = b"# Readme\nhello world\n";
        let entry = encode_readme(content, "text/markdown");
        assert_eq!(entry.size_bytes, content.len());
        assert_eq!(entry.sha256.len(), 64);

        let (decoded, content_type) = entry.decode().unwrap();
        assert_eq!(decoded, content);
        assert_eq!(content_type, "text/markdown");
    }

    #[test]
    fn test_decode_detects_size_mismatch() {
        let mut entry = encode_readme(b"content", "text/markdown");
        entry.size_bytes = 999;
        assert!(entry.decode().is_err());
    }

    #[test]
    fn test_decode_detects_digest_mismatch() {
        let mut entry = encode_readme(b"content", "text/markdown");
        entry.sha256 = "0".repeat(64);
        assert!(entry.decode().is_err());
    }

    #[test]
    fn test_empty_entry_decodes_to_empty() {
        let entry = encode_readme(b"", "text/plain");
        let (decoded, content_type) = entry.decode().unwrap();
        assert!(decoded.is_empty());
        assert_eq!(content_type, "text/plain");
    }

    #[test]
    fn test_readme_key_format() {
        assert_eq!(
            readme_key("io.example/echo", "1.0.0"),
            "io.example/echo@1.0.0"
        );
    }

    #[test]
    fn test_seed_file_wire_shape() {
        let json = serde_json::json!({
            "io.example/echo@1.0.0": {
                "content": BASE64.encode(b"hi"),
                "content_type": "text/markdown",
                "size_bytes": 2,
                "sha256": encode_readme(b"hi", "text/markdown").sha256,
            }
        });
        let file: ReadmeFile = serde_json::from_value(json).unwrap();
        let entry = &file["io.example/echo@1.0.0"];
        let (decoded, _) = entry.decode().unwrap();
        assert_eq!(decoded, b"hi");
    }
}
