//! Authorization gate
//!
//! One decision per inbound call:
//!
//! ```text
//! no token ──────────────────────────────► Rejected(missing_token)
//! token ─► decode claims ─► offline check ─► [identity provider] ─► token review ─► Authorized
//!              │                 │                   │                   │
//!          malformed     expired/audience/issuer  identity_provider   token_review
//! ```
//!
//! The token review always runs, whatever the identity provider said.

use std::sync::Arc;

use kmcp_common::metrics::{record_auth_decision, Decision};
use kmcp_common::{StaticConfig, AUTH_REALM, HEALTHZ_PATH, OAUTH_PROTECTED_RESOURCE_PATH};
use tracing::{debug, instrument};

use crate::auth::claims;
use crate::auth::oidc::IdentityProvider;
use crate::auth::token_review::TokenReviewer;
use crate::context::CallerIdentity;
use crate::error::AuthError;

/// Settings consumed by the gate
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// When false every call passes
    pub enabled: bool,
    /// Audience tokens must carry
    pub audience: String,
    /// Public server URL, advertised in challenges when set
    pub server_url: Option<String>,
    /// Issuer the offline check requires, if any
    pub required_issuer: Option<String>,
}

impl GateConfig {
    /// Gate settings from the static configuration
    pub fn from_static(config: &StaticConfig) -> Self {
        Self {
            enabled: config.require_oauth,
            audience: config.effective_audience(),
            server_url: config.server_url.clone().filter(|s| !s.is_empty()),
            required_issuer: config.required_issuer.clone(),
        }
    }

    /// `WWW-Authenticate` value sent with every rejection
    pub fn challenge(&self) -> String {
        match &self.server_url {
            Some(url) => format!(
                r#"Bearer realm="{}", audience="{}", resource_metadata="{}{}", error="invalid_token""#,
                AUTH_REALM,
                self.audience,
                url.trim_end_matches('/'),
                OAUTH_PROTECTED_RESOURCE_PATH
            ),
            None => format!(
                r#"Bearer realm="{}", audience="{}", error="invalid_token""#,
                AUTH_REALM, self.audience
            ),
        }
    }
}

/// Paths that bypass the gate unconditionally
pub fn is_exempt(path: &str) -> bool {
    path == HEALTHZ_PATH || path == OAUTH_PROTECTED_RESOURCE_PATH
}

/// Bearer token authorization pipeline
pub struct AuthGate {
    config: GateConfig,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    reviewer: Arc<dyn TokenReviewer>,
}

impl AuthGate {
    /// Gate with the mandatory cluster token reviewer
    pub fn new(config: GateConfig, reviewer: Arc<dyn TokenReviewer>) -> Self {
        Self {
            config,
            identity_provider: None,
            reviewer,
        }
    }

    /// Also verify tokens with an external identity provider
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Gate settings
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether the holder of `token` may proceed
    ///
    /// `token` is the value after `Bearer `; `None` when the header is
    /// missing or uses another scheme.
    #[instrument(skip_all, fields(audience = %self.config.audience))]
    pub async fn authorize(&self, token: Option<&str>) -> Result<CallerIdentity, AuthError> {
        let result = self.run_checks(token).await;
        match &result {
            Ok(_) => record_auth_decision(Decision::Allow, "ok"),
            Err(e) => record_auth_decision(Decision::Deny, e.category()),
        }
        result
    }

    async fn run_checks(&self, token: Option<&str>) -> Result<CallerIdentity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;

        let claims = claims::decode(token)?;
        claims.validate(&self.config.audience, self.config.required_issuer.as_deref())?;
        debug!(scopes = ?claims.scopes, "Offline token checks passed");

        if let Some(provider) = &self.identity_provider {
            let asserted = provider.verify(token, &self.config.audience).await?;
            debug!(username = %asserted.username, "Identity provider accepted token");
        }

        self.reviewer.review(token, &self.config.audience).await
    }
}
