//! Deny-list access-control policy
//!
//! A rule with an empty kind denies its whole group/version. Otherwise the
//! full `{group, version, kind}` triple must match. No rules means every
//! resource type is allowed.

use std::sync::Arc;

use kmcp_common::metrics::{record_policy_decision, Decision};
use kmcp_common::ResourceKey;
use tracing::debug;

use crate::error::{Error, Result};

/// Whether `rule` denies `key`
fn matches(rule: &ResourceKey, key: &ResourceKey) -> bool {
    if rule.group != key.group || rule.version != key.version {
        return false;
    }
    rule.kind.is_empty() || rule.kind == key.kind
}

/// Pure allow/deny decision for `key` against `rules`
pub fn is_allowed(key: &ResourceKey, rules: &[ResourceKey]) -> bool {
    !rules.iter().any(|rule| matches(rule, key))
}

/// Immutable deny rule set
///
/// Cloning is cheap; the rules are shared.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    denied: Arc<[ResourceKey]>,
}

impl AccessPolicy {
    /// Policy denying the given resource types
    pub fn new(denied: Vec<ResourceKey>) -> Self {
        Self {
            denied: denied.into(),
        }
    }

    /// Policy with no rules
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Configured deny rules
    pub fn rules(&self) -> &[ResourceKey] {
        &self.denied
    }

    /// Evaluate `key`, recording the decision
    pub fn is_allowed(&self, key: &ResourceKey) -> bool {
        let allowed = is_allowed(key, &self.denied);
        if allowed {
            record_policy_decision(Decision::Allow);
        } else {
            debug!(resource = %key, "Resource type denied by access control");
            record_policy_decision(Decision::Deny);
        }
        allowed
    }

    /// Evaluate `key`, mapping a denial to [`Error::PolicyDenied`]
    pub fn check(&self, key: &ResourceKey) -> Result<()> {
        if self.is_allowed(key) {
            Ok(())
        } else {
            Err(Error::PolicyDenied(key.clone()))
        }
    }
}
