//! Resource type keys
//!
//! A [`ResourceKey`] is the `{group, version, kind}` triple that identifies a
//! Kubernetes resource type. The same shape is used for deny rules, where an
//! empty `kind` stands for every kind in the group/version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `{group, version, kind}` triple identifying a resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// API group, empty for the core group
    #[serde(default)]
    pub group: String,
    /// API version within the group (e.g. `v1`)
    pub version: String,
    /// Resource kind (e.g. `Pod`); empty in a deny rule means "any kind"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl ResourceKey {
    /// Build a key from its parts
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build a key from an `apiVersion` string (`v1`, `apps/v1`) and a kind
    ///
    /// Returns `None` when the apiVersion has more than one `/` or an empty version.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Option<Self> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        if version.is_empty() || version.contains('/') {
            return None;
        }
        Some(Self::new(group, version, kind))
    }

    /// The `apiVersion` form of the group and version
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}
