//! Opaque keyset pagination cursors.
//!
//! A cursor pins the last row of the previous page on the listing order
//! `(updated_at DESC, name ASC, version ASC)`. Rows inserted after the
//! cursor was issued may or may not appear depending on their ordering key;
//! already-returned rows are never repeated.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub version: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}|{}",
            self.updated_at.timestamp_micros(),
            self.name,
            self.version
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let invalid = || AppError::ValidationFailed("invalid pagination cursor".into());

        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(raw).map_err(|_| invalid())?;

        let mut parts = raw.splitn(3, '|');
        let micros: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let name = parts.next().ok_or_else(invalid)?.to_string();
        let version = parts.next().ok_or_else(invalid)?.to_string();

        let updated_at = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(invalid)?;

        Ok(Self {
            updated_at,
            name,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = Cursor {
            updated_at: Utc.timestamp_micros(1_700_000_000_123_456).unwrap(),
            name: "io.example/echo".into(),
            version: "1.0.0".into(),
        };
        let token = cursor.encode();
        let decoded = Cursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_survives_pipe_in_version() {
        // Only the first two separators split; anything after stays in version.
        let cursor = Cursor {
            updated_at: Utc::now(),
            name: "a.b/x".into(),
            version: "1.0.0|weird".into(),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.version, "1.0.0|weird");
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(Cursor::decode("not-base64!!!").is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("missing|parts")).is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("nan|a|b")).is_err());
        assert!(Cursor::decode("").is_err());
    }
}
