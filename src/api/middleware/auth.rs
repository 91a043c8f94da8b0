//! Bearer token middleware.
//!
//! Every `/v0` request passes through here. With no verifier configured the
//! context is permissive; with one configured, a presented token must
//! verify (garbled or expired tokens fail the request immediately), and
//! handlers performing mutations call [`AuthContext::require`] to check the
//! capability against the target name.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::services::auth::{authorize, Claims, PermissionAction};

/// Extension carrying the request's verified capabilities.
#[derive(Clone)]
pub struct AuthContext {
    /// False when no verifier is configured; all checks pass.
    enforcing: bool,
    claims: Option<Claims>,
}

impl AuthContext {
    pub fn permissive() -> Self {
        Self {
            enforcing: false,
            claims: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            enforcing: true,
            claims: None,
        }
    }

    pub fn verified(claims: Claims) -> Self {
        Self {
            enforcing: true,
            claims: Some(claims),
        }
    }

    /// Require a capability over `name`. Without a verifier this always
    /// passes; otherwise a verified token with a matching permission is
    /// needed.
    pub fn require(&self, action: PermissionAction, name: &str) -> Result<()> {
        if !self.enforcing {
            return Ok(());
        }
        match &self.claims {
            None => Err(AppError::Unauthenticated(
                "missing bearer token".to_string(),
            )),
            Some(claims) => authorize(&claims.permissions, action, name),
        }
    }
}

/// Extract the bearer token, if any, from the Authorization header.
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Attach an [`AuthContext`] to the request. Invalid tokens are rejected
/// here so handlers only ever see verified claims.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let context = match &state.verifier {
        None => AuthContext::permissive(),
        Some(verifier) => match bearer_token(&request) {
            None => AuthContext::anonymous(),
            Some(token) => AuthContext::verified(verifier.verify(token)?),
        },
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
