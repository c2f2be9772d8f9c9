//! kmcp - Kubernetes MCP gateway

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use kmcp_api::auth::{AuthGate, GateConfig, KubeTokenReviewer, OidcConfig, OidcVerifier};
use kmcp_api::reload::{build_snapshot, ReloadCoordinator, ReloadSettings, SnapshotCell};
use kmcp_api::server::{start_server, AppState, ResourceMetadata};
use kmcp_common::telemetry::{init_telemetry, TelemetryConfig};
use kmcp_common::{LogFormat, StaticConfig};

/// kmcp - authenticated, policy-checked Kubernetes access for MCP clients
#[derive(Parser, Debug)]
#[command(name = "kmcp", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long = "config", env = "KMCP_CONFIG")]
    config_file: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "KMCP_PORT")]
    port: Option<u16>,

    /// Path to the kubeconfig; otherwise KUBECONFIG, ~/.kube/config, then in-cluster
    #[arg(long, env = "KUBECONFIG_PATH")]
    kubeconfig: Option<PathBuf>,

    /// Require a bearer token on every call
    #[arg(long)]
    require_oauth: bool,

    /// Public URL of this server
    #[arg(long)]
    server_url: Option<String>,

    /// Audience caller tokens must carry
    #[arg(long)]
    audience: Option<String>,

    /// OIDC issuer used to verify tokens before the token review
    #[arg(long)]
    authorization_url: Option<String>,

    /// OAuth client id registered with the issuer
    #[arg(long)]
    oauth_client_id: Option<String>,

    /// Only expose read-only tools
    #[arg(long)]
    read_only: bool,

    /// Hide destructive tools
    #[arg(long)]
    disable_destructive: bool,

    /// Tool profile (full, full-safe)
    #[arg(long)]
    profile: Option<String>,

    /// Log output format
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

/// Startup warning when the gate lets every call through
///
/// Tokens that callers still send are used to scope their cluster access.
const AUTH_DISABLED_WARNING: &str =
    "Authorization is disabled; callers are not authenticated before tools run";

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}', expected text or json", other)),
    }
}

impl Cli {
    /// Overlay flags on the file configuration
    fn merge(self, mut config: StaticConfig) -> StaticConfig {
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.kubeconfig.is_some() {
            config.kubeconfig = self.kubeconfig;
        }
        config.require_oauth |= self.require_oauth;
        if self.server_url.is_some() {
            config.server_url = self.server_url;
        }
        if self.audience.is_some() {
            config.audience = self.audience;
        }
        if self.authorization_url.is_some() {
            config.authorization_url = self.authorization_url;
        }
        if self.oauth_client_id.is_some() {
            config.oauth_client_id = self.oauth_client_id;
        }
        config.read_only |= self.read_only;
        config.disable_destructive |= self.disable_destructive;
        if let Some(profile) = self.profile {
            config.profile = profile;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let mut cli = Cli::parse();
    let file_config = match cli.config_file.take() {
        Some(path) => StaticConfig::read(&path)?,
        None => StaticConfig::default(),
    };
    let config = cli.merge(file_config);
    config.validate()?;

    init_telemetry(TelemetryConfig {
        default_directive: format!("{},tower=warn,hyper=warn", config.log_level),
        format: config.log_format,
    })?;

    run(config).await
}

async fn run(config: StaticConfig) -> anyhow::Result<()> {
    let settings = ReloadSettings::from_static(&config)?;
    let snapshot = build_snapshot(&settings, 0).await?;
    info!(
        openshift = snapshot.facts.openshift,
        in_cluster = snapshot.source.is_in_cluster(),
        tools = %snapshot.surface,
        "Loaded cluster configuration"
    );
    let snapshots = SnapshotCell::new(snapshot);

    let mut gate = AuthGate::new(
        GateConfig::from_static(&config),
        Arc::new(KubeTokenReviewer::new(snapshots.clone())),
    );
    if let Some(issuer) = &config.authorization_url {
        let mut oidc = OidcConfig::new(issuer.clone());
        oidc.client_id = config.oauth_client_id.clone();
        gate = gate.with_identity_provider(Arc::new(OidcVerifier::new(oidc)?));
    }
    if !gate.config().enabled {
        warn!("{}", AUTH_DISABLED_WARNING);
    }

    let reloader = ReloadCoordinator::new(settings, snapshots.clone()).spawn();

    let state = AppState {
        gate: Arc::new(gate),
        snapshots,
        metadata: Arc::new(ResourceMetadata::from_static(&config)),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let result = start_server(addr, state).await;

    reloader.abort();
    result.map_err(Into::into)
}
