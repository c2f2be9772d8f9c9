//! Metrics for kmcp observability
//!
//! OpenTelemetry counters for:
//! - Authorization gate decisions
//! - Access-control policy decisions
//! - Credential derivation outcomes
//! - Credential source reloads

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// Global meter for kmcp metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("kmcp"));

// ============================================================================
// Authorization Metrics
// ============================================================================

/// Counter of authorization gate decisions
///
/// Labels:
/// - `decision`: allow, deny
/// - `reason`: ok, missing_token, malformed, expired, audience, issuer,
///   identity_provider, token_review
pub static AUTH_DECISIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kmcp_auth_decisions_total")
        .with_description("Total number of bearer token authorization decisions")
        .with_unit("{decisions}")
        .build()
});

/// Counter of access-control policy decisions
///
/// Labels:
/// - `decision`: allow, deny
pub static POLICY_DECISIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kmcp_policy_decisions_total")
        .with_description("Total number of resource access-control decisions")
        .with_unit("{decisions}")
        .build()
});

// ============================================================================
// Cluster Client Metrics
// ============================================================================

/// Counter of caller-scoped client derivations
///
/// Labels:
/// - `outcome`: shared, derived, fallback
pub static CREDENTIAL_DERIVATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kmcp_credential_derivations_total")
        .with_description("Total number of caller-scoped cluster client derivations")
        .with_unit("{derivations}")
        .build()
});

/// Counter of credential source reloads
///
/// Labels:
/// - `result`: success, error
pub static RELOADS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kmcp_reloads_total")
        .with_description("Total number of credential source reloads")
        .with_unit("{reloads}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Allow/deny outcome shared by the gate and the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request was allowed
    Allow,
    /// Request was denied
    Deny,
}

impl Decision {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// How a call obtained its cluster client set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationOutcome {
    /// No caller token, the shared base client set was used
    Shared,
    /// A caller-scoped client set was built
    Derived,
    /// Building the scoped set failed and the base set was used instead
    Fallback,
}

impl DerivationOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Derived => "derived",
            Self::Fallback => "fallback",
        }
    }
}

/// Record an authorization gate decision
pub fn record_auth_decision(decision: Decision, reason: &str) {
    AUTH_DECISIONS.add(
        1,
        &[
            KeyValue::new("decision", decision.as_str()),
            KeyValue::new("reason", reason.to_string()),
        ],
    );
}

/// Record an access-control policy decision
pub fn record_policy_decision(decision: Decision) {
    POLICY_DECISIONS.add(1, &[KeyValue::new("decision", decision.as_str())]);
}

/// Record how a call's client set was obtained
pub fn record_derivation(outcome: DerivationOutcome) {
    CREDENTIAL_DERIVATIONS.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

/// Record a reload attempt
pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "error" };
    RELOADS.add(1, &[KeyValue::new("result", result)]);
}
