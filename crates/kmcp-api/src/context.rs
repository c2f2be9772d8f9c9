//! Call-scoped context
//!
//! A [`CallContext`] is built once per inbound request and passed explicitly
//! to the credential derivation manager and the resource client. It holds
//! the caller's bearer token (if any) and the identity resolved by the gate.

use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Standard OAuth authorization header
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Fallback header carrying the caller's cluster token
pub const CUSTOM_AUTHORIZATION_HEADER: &str = "kubernetes-authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// Caller bearer token, redacted in `Debug` output
#[derive(Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Raw token text
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

/// Identity resolved by the authorization gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Principal name
    pub username: String,
    /// Group memberships
    pub groups: Vec<String>,
}

/// Extract the token from a `Bearer <token>` header value
pub fn strip_bearer(value: &str) -> Option<&str> {
    value
        .strip_prefix(BEARER_PREFIX)
        .filter(|token| !token.is_empty())
}

/// Extract bearer token from the standard Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_bearer)
}

/// Per-call values threaded into credential derivation and access control
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: Option<BearerToken>,
    identity: Option<CallerIdentity>,
}

impl CallContext {
    /// Context with no caller credentials; resolves to the shared base clients
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context carrying a caller token
    pub fn with_token(token: BearerToken) -> Self {
        Self {
            token: Some(token),
            identity: None,
        }
    }

    /// Build a context from request headers
    ///
    /// The standard Authorization header wins; `kubernetes-authorization` is
    /// consulted only when it is absent.
    pub fn from_headers(headers: &HeaderMap, identity: Option<CallerIdentity>) -> Self {
        let header = headers
            .get(AUTHORIZATION_HEADER)
            .or_else(|| headers.get(CUSTOM_AUTHORIZATION_HEADER))
            .and_then(|v| v.to_str().ok());

        Self {
            token: header.and_then(strip_bearer).map(BearerToken::new),
            identity,
        }
    }

    /// Attach the identity resolved by the gate
    pub fn with_identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Caller token, if the request carried one
    pub fn token(&self) -> Option<&BearerToken> {
        self.token.as_ref()
    }

    /// Identity resolved by the gate, if authorization ran
    pub fn identity(&self) -> Option<&CallerIdentity> {
        self.identity.as_ref()
    }
}

impl<S> FromRequestParts<S> for CallContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts.extensions.get::<CallerIdentity>().cloned();
        Ok(Self::from_headers(&parts.headers, identity))
    }
}
