//! Unverified claims decoding and offline validation
//!
//! Only the middle segment of a bearer token is decoded. No signature is
//! checked here; signatures are the identity provider's business and the
//! cluster token review is authoritative.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::Deserialize;

use crate::error::AuthError;

/// Claims extracted from a bearer token's payload segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// `iss` claim, empty when absent
    pub issuer: String,
    /// `sub` claim, empty when absent
    pub subject: String,
    /// `aud` claim as a set of strings
    pub audience: Vec<String>,
    /// `exp` claim in epoch seconds
    pub expiry: Option<i64>,
    /// `nbf` claim in epoch seconds
    pub not_before: Option<i64>,
    /// `scope` claim split on whitespace
    pub scopes: Vec<String>,
}

/// Raw payload shape; `aud` may be a single string or an array
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: AudienceClaim,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    scope: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl AudienceClaim {
    fn into_vec(self) -> Vec<String> {
        match self {
            AudienceClaim::None => vec![],
            AudienceClaim::Single(s) => vec![s],
            AudienceClaim::Multiple(v) => v,
        }
    }
}

/// Restore the `=` padding stripped by JWT encoders
fn pad_base64(segment: &str) -> String {
    let mut padded = segment.to_string();
    match segment.len() % 4 {
        0 => {}
        rem => padded.push_str(&"=".repeat(4 - rem)),
    }
    padded
}

/// Decode the claims segment of a token without verifying it
pub fn decode(token: &str) -> Result<Claims, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken("invalid JWT token format".into()));
    }

    let payload = URL_SAFE
        .decode(pad_base64(segments[1]))
        .map_err(|e| AuthError::MalformedToken(format!("failed to decode JWT payload: {}", e)))?;

    let raw: RawClaims = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::MalformedToken(format!("failed to unmarshal JWT claims: {}", e)))?;

    let scopes = match raw.scope {
        Some(serde_json::Value::String(s)) => s.split_whitespace().map(String::from).collect(),
        _ => vec![],
    };

    Ok(Claims {
        issuer: raw.iss.unwrap_or_default(),
        subject: raw.sub.unwrap_or_default(),
        audience: raw.aud.into_vec(),
        expiry: raw.exp,
        not_before: raw.nbf,
        scopes,
    })
}

impl Claims {
    /// Offline checks against a validation time in epoch seconds
    ///
    /// Expiry must be present and strictly after `now`, `nbf` (when present)
    /// must not be after `now`, the audience set must contain `audience`, and
    /// the issuer is compared only when one is required. A token without
    /// `exp` is treated as expired.
    pub fn validate_at(
        &self,
        audience: &str,
        required_issuer: Option<&str>,
        now: i64,
    ) -> Result<(), AuthError> {
        match self.expiry {
            Some(exp) if exp > now => {}
            _ => return Err(AuthError::ExpiredToken),
        }
        if self.not_before.is_some_and(|nbf| nbf > now) {
            return Err(AuthError::NotYetValid);
        }
        if !self.audience.iter().any(|a| a == audience) {
            return Err(AuthError::AudienceMismatch(self.audience.clone()));
        }
        if let Some(issuer) = required_issuer {
            if self.issuer != issuer {
                return Err(AuthError::IssuerMismatch(self.issuer.clone()));
            }
        }
        Ok(())
    }

    /// Offline checks against the current time
    pub fn validate(&self, audience: &str, required_issuer: Option<&str>) -> Result<(), AuthError> {
        self.validate_at(audience, required_issuer, chrono::Utc::now().timestamp())
    }
}
