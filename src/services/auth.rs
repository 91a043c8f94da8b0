//! Capability token verification.
//!
//! The registry never mints tokens; it only validates presented ones. A
//! verified token yields a set of permissions `(action, name pattern)`;
//! mutating operations require a permission whose pattern matches the
//! target artifact name. With no verifier configured (embedded single-user
//! mode) every mutation is allowed.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Action a permission grants on matching names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    /// Publish, update, and delete catalogue entries.
    Publish,
    /// Record, update, and remove deployments.
    Deploy,
}

/// One capability: an action over a name pattern (`*`, exact, or a
/// `prefix*` form).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub action: PermissionAction,
    pub resource_pattern: String,
}

impl Permission {
    pub fn matches(&self, action: PermissionAction, name: &str) -> bool {
        if self.action != action {
            return false;
        }
        pattern_matches(&self.resource_pattern, name)
    }
}

/// `*` matches everything; a trailing `*` matches by prefix; anything else
/// matches exactly.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name
}

/// Claims carried by a capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Pluggable token verifier. The HTTP and MCP surfaces share one instance.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims>;
}

/// HS256 JWT verifier keyed by `JWT_PRIVATE_KEY`.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Unauthenticated(format!("invalid token: {e}")))?;
        Ok(data.claims)
    }
}

/// Check a permission set against a required action on a name.
pub fn authorize(permissions: &[Permission], action: PermissionAction, name: &str) -> Result<()> {
    if permissions.iter().any(|p| p.matches(action, name)) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(format!(
            "token lacks {action:?} permission for {name}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn permission(action: PermissionAction, pattern: &str) -> Permission {
        Permission {
            action,
            resource_pattern: pattern.into(),
        }
    }

    #[test]
    fn test_wildcard_pattern_matches_everything() {
        let p = permission(PermissionAction::Publish, "*");
        assert!(p.matches(PermissionAction::Publish, "io.example/echo"));
        assert!(p.matches(PermissionAction::Publish, "anything/else"));
    }

    #[test]
    fn test_exact_pattern() {
        let p = permission(PermissionAction::Publish, "io.example/echo");
        assert!(p.matches(PermissionAction::Publish, "io.example/echo"));
        assert!(!p.matches(PermissionAction::Publish, "io.example/other"));
    }

    #[test]
    fn test_prefix_pattern() {
        let p = permission(PermissionAction::Publish, "io.example/*");
        assert!(p.matches(PermissionAction::Publish, "io.example/echo"));
        assert!(p.matches(PermissionAction::Publish, "io.example/weather"));
        assert!(!p.matches(PermissionAction::Publish, "com.other/echo"));
    }

    #[test]
    fn test_action_must_match() {
        let p = permission(PermissionAction::Deploy, "*");
        assert!(!p.matches(PermissionAction::Publish, "io.example/echo"));
        assert!(p.matches(PermissionAction::Deploy, "io.example/echo"));
    }

    #[test]
    fn test_authorize_rejects_without_matching_permission() {
        let perms = vec![permission(PermissionAction::Publish, "io.example/*")];
        assert!(authorize(&perms, PermissionAction::Publish, "io.example/echo").is_ok());
        assert!(matches!(
            authorize(&perms, PermissionAction::Publish, "com.other/echo"),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_jwt_round_trip_and_expiry() {
        let secret = "test-secret";
        let verifier = JwtVerifier::new(secret);

        let claims = Claims {
            sub: "publisher@example.com".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
            permissions: vec![permission(PermissionAction::Publish, "io.example/*")],
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified.sub, "publisher@example.com");
        assert_eq!(verified.permissions.len(), 1);

        // Expired token is rejected.
        let expired = Claims {
            sub: "x".into(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp(),
            permissions: vec![],
        };
        let token = encode(
            &Header::default(),
            &expired,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            verifier.verify(&token),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = JwtVerifier::new("secret");
        assert!(matches!(
            verifier.verify("not.a.jwt"),
            Err(AppError::Unauthenticated(_))
        ));
    }
}
