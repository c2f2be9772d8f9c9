//! Common types for kmcp: static configuration, resource type keys and
//! observability setup shared by the gateway crate and the binary.

#![deny(missing_docs)]

pub mod config;
pub mod gvk;
pub mod metrics;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, StaticConfig};
pub use gvk::ResourceKey;

/// Audience expected in caller tokens when neither an explicit audience nor a
/// public server URL is configured
pub const DEFAULT_AUDIENCE: &str = "kubernetes-mcp-server";

/// Realm advertised in `WWW-Authenticate` challenges
pub const AUTH_REALM: &str = "Kubernetes MCP Server";

/// Path of the OAuth protected resource metadata document
pub const OAUTH_PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Liveness probe path
pub const HEALTHZ_PATH: &str = "/healthz";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "kmcp";
