//! Error types for the gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kmcp_common::ResourceKey;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons the authorization gate rejects a call
///
/// Every variant maps to a stable category used in logs and metrics.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header on a protected path
    #[error("missing or invalid bearer token")]
    MissingToken,

    /// Token is not three segments or its claims segment does not decode
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// `exp` claim is absent or not after the validation time
    #[error("token expired")]
    ExpiredToken,

    /// `nbf` claim is after the validation time
    #[error("token not yet valid")]
    NotYetValid,

    /// The configured audience is not in the `aud` claim
    #[error("token audience mismatch: {0:?}")]
    AudienceMismatch(Vec<String>),

    /// A required issuer was configured and the `iss` claim differs
    #[error("token issuer mismatch: {0}")]
    IssuerMismatch(String),

    /// The external identity provider refused the token
    #[error("identity provider rejected token: {0}")]
    IdentityProviderRejected(String),

    /// The cluster token review refused the token or could not be performed
    #[error("token review rejected token: {0}")]
    ClusterReviewRejected(String),
}

impl AuthError {
    /// Log and metric category for this failure
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed",
            AuthError::ExpiredToken => "expired",
            AuthError::NotYetValid => "not_before",
            AuthError::AudienceMismatch(_) => "audience",
            AuthError::IssuerMismatch(_) => "issuer",
            AuthError::IdentityProviderRejected(_) => "identity_provider",
            AuthError::ClusterReviewRejected(_) => "token_review",
        }
    }

    /// Short plain-text body sent with the unauthorized response
    pub fn response_body(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Unauthorized: Bearer token required",
            _ => "Unauthorized: Invalid token",
        }
    }
}

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The access-control policy denies the resource type
    #[error("resource not allowed: {0}")]
    PolicyDenied(ResourceKey),

    /// A caller-scoped client set could not be built
    #[error("failed to derive caller credentials: {0}")]
    CredentialDerivation(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or malformed argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came from the access-control policy
    pub fn is_policy_denied(&self) -> bool {
        matches!(self, Error::PolicyDenied(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::PolicyDenied(_) => StatusCode::FORBIDDEN,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Kube(kube::Error::Api(ae)) => {
                StatusCode::from_u16(ae.code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Kube(_) => StatusCode::BAD_GATEWAY,
            Error::CredentialDerivation(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // K8s-style Status body
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AuthError::IdentityProviderRejected(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
