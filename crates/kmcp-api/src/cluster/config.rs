//! Base cluster configuration and caller-scoped derivation
//!
//! The base configuration comes from the kubeconfig search path (explicit
//! path, then `KUBECONFIG`, then `~/.kube/config`) or, when no kubeconfig
//! file exists and none was named explicitly, from the in-cluster service
//! account.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use secrecy::SecretString;
use tracing::{debug, info};

use crate::context::BearerToken;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the base credentials were loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Merged kubeconfig files, highest precedence first
    Kubeconfig {
        /// Files that contributed to the merged configuration
        paths: Vec<PathBuf>,
    },
    /// Pod service account
    InCluster,
}

impl CredentialSource {
    /// Files to watch for changes
    pub fn watch_paths(&self) -> &[PathBuf] {
        match self {
            CredentialSource::Kubeconfig { paths } => paths,
            CredentialSource::InCluster => &[],
        }
    }

    /// Whether credentials come from the pod service account
    pub fn is_in_cluster(&self) -> bool {
        matches!(self, CredentialSource::InCluster)
    }
}

/// Administrative configuration every client set starts from
#[derive(Debug, Clone)]
pub struct BaseConfig {
    /// Client configuration
    pub config: kube::Config,
    /// Origin of the credentials
    pub source: CredentialSource,
    /// Merged kubeconfig document, absent in-cluster
    pub kubeconfig: Option<serde_yaml::Value>,
}

// =============================================================================
// Pure Functions
// =============================================================================

/// Kubeconfig search path from explicit inputs
fn search_path(
    explicit: Option<&Path>,
    kubeconfig_env: Option<OsString>,
    home: Option<PathBuf>,
) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }

    if let Some(env) = kubeconfig_env.filter(|v| !v.is_empty()) {
        let paths: Vec<PathBuf> = std::env::split_paths(&env)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !paths.is_empty() {
            return paths;
        }
    }

    home.map(|h| vec![h.join(".kube").join("config")])
        .unwrap_or_default()
}

/// Candidate kubeconfig files in precedence order
pub fn kubeconfig_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    search_path(
        explicit,
        std::env::var_os("KUBECONFIG"),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

/// Copy `base` with the caller's token as the only credential
///
/// Every other credential path is cleared: token file, basic auth, client
/// certificate and key, auth provider, exec plugin and impersonation.
pub fn derive_config(base: &kube::Config, token: &BearerToken) -> kube::Config {
    let mut derived = base.clone();
    derived.auth_info = AuthInfo {
        token: Some(SecretString::from(token.expose().to_string())),
        ..Default::default()
    };
    derived
}

/// Remove every user entry from a kubeconfig document
pub fn strip_users(kubeconfig: &mut serde_yaml::Value) {
    if let Some(map) = kubeconfig.as_mapping_mut() {
        map.insert("users".into(), serde_yaml::Value::Sequence(Vec::new()));
    }
}

// =============================================================================
// Loading
// =============================================================================

fn read_merged(paths: &[PathBuf]) -> Result<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;
    for path in paths {
        let next = Kubeconfig::read_from(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        merged = Some(match merged {
            None => next,
            Some(current) => current
                .merge(next)
                .map_err(|e| Error::Config(format!("failed to merge {}: {}", path.display(), e)))?,
        });
    }
    merged.ok_or_else(|| Error::Config("no kubeconfig files".into()))
}

/// Load the base configuration
///
/// An explicitly named kubeconfig must exist. Without one, the first
/// existing files on the search path are merged, and the in-cluster
/// service account is used if none exist.
pub async fn load_base_config(explicit: Option<&Path>) -> Result<BaseConfig> {
    let existing: Vec<PathBuf> = kubeconfig_paths(explicit)
        .into_iter()
        .filter(|p| p.exists())
        .collect();

    if existing.is_empty() {
        if let Some(path) = explicit {
            return Err(Error::Config(format!(
                "kubeconfig {} does not exist",
                path.display()
            )));
        }
        debug!("No kubeconfig found, using in-cluster configuration");
        let mut config = kube::Config::incluster()
            .map_err(|e| Error::Config(format!("in-cluster configuration: {}", e)))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        info!(cluster = %config.cluster_url, "Loaded in-cluster configuration");
        return Ok(BaseConfig {
            config,
            source: CredentialSource::InCluster,
            kubeconfig: None,
        });
    }

    let merged = read_merged(&existing)?;
    let document = serde_yaml::to_value(&merged)
        .map_err(|e| Error::Config(format!("failed to serialize kubeconfig: {}", e)))?;
    let mut config = kube::Config::from_custom_kubeconfig(merged, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Config(e.to_string()))?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);

    info!(
        cluster = %config.cluster_url,
        files = existing.len(),
        "Loaded kubeconfig"
    );
    Ok(BaseConfig {
        config,
        source: CredentialSource::Kubeconfig { paths: existing },
        kubeconfig: Some(document),
    })
}
