//! Static server configuration
//!
//! Loaded once at startup from a TOML file. Command-line flags are merged on
//! top by the binary. The deny rules and tool selection read from here are
//! treated as immutable for the lifetime of a snapshot.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::gvk::ResourceKey;
use crate::DEFAULT_AUDIENCE;

/// Errors raised while loading the static configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`StaticConfig`]
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },

    /// A value is present but unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Server configuration read from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Resource types no caller may touch; an empty kind denies a whole group/version
    pub denied_resources: Vec<ResourceKey>,

    /// Log filter directive (e.g. `info`, `kmcp_api=debug`)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// HTTP listen port
    pub port: u16,

    /// Public URL of this server, used for the audience and metadata documents
    pub server_url: Option<String>,
    /// Explicit audience override
    pub audience: Option<String>,
    /// Require bearer token authorization on every non-exempt path
    pub require_oauth: bool,
    /// Issuer URL of the external identity provider, if any
    pub authorization_url: Option<String>,
    /// Client identifier registered with the identity provider
    pub oauth_client_id: Option<String>,
    /// When set, the offline check also requires this `iss` claim
    pub required_issuer: Option<String>,

    /// Explicit kubeconfig path; otherwise `KUBECONFIG`, `~/.kube/config`, then in-cluster
    pub kubeconfig: Option<PathBuf>,

    /// Tool profile name (`full`, `full-safe`)
    pub profile: String,
    /// Expose only tools annotated read-only
    pub read_only: bool,
    /// Hide tools annotated destructive
    pub disable_destructive: bool,
    /// When non-empty, only these tools are exposed
    pub enabled_tools: Vec<String>,
    /// Tools that are never exposed
    pub disabled_tools: Vec<String>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            denied_resources: Vec::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            port: 8080,
            server_url: None,
            audience: None,
            require_oauth: false,
            authorization_url: None,
            oauth_client_id: None,
            required_issuer: None,
            kubeconfig: None,
            profile: "full".to_string(),
            read_only: false,
            disable_destructive: false,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
        }
    }
}

impl StaticConfig {
    /// Read and parse a TOML configuration file
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            denied_resources = config.denied_resources.len(),
            profile = %config.profile,
            "Loaded static configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    /// Audience callers' tokens must carry
    ///
    /// Explicit `audience` wins, then the public `server_url`, then the default.
    pub fn effective_audience(&self) -> String {
        self.audience
            .as_deref()
            .or(self.server_url.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_AUDIENCE)
            .to_string()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authorization_url.is_some() && !self.require_oauth {
            return Err(ConfigError::Invalid(
                "authorization_url requires require_oauth = true".into(),
            ));
        }
        if let Some(rule) = self.denied_resources.iter().find(|r| r.version.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "denied resource rule for group '{}' has no version",
                rule.group
            )));
        }
        Ok(())
    }
}
