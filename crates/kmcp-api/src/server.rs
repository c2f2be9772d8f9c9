//! HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use kmcp_common::{StaticConfig, HEALTHZ_PATH, OAUTH_PROTECTED_RESOURCE_PATH};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{authorize_request, AuthGate};
use crate::error::{Error, Result};
use crate::reload::SnapshotCell;
use crate::rpc::mcp_handler;

/// MCP endpoint path
pub const MCP_PATH: &str = "/mcp";

/// OAuth protected resource metadata document
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceMetadata {
    /// Protected resource identifier
    pub resource: String,
    /// Issuers accepted for this resource
    pub authorization_servers: Vec<String>,
    /// Token transports accepted
    pub bearer_methods_supported: Vec<String>,
}

impl ResourceMetadata {
    /// Metadata advertised for `config`
    pub fn from_static(config: &StaticConfig) -> Self {
        Self {
            resource: config
                .server_url
                .clone()
                .unwrap_or_else(|| config.effective_audience()),
            authorization_servers: config.authorization_url.iter().cloned().collect(),
            bearer_methods_supported: vec!["header".to_string()],
        }
    }
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Authorization gate
    pub gate: Arc<AuthGate>,
    /// Current snapshot
    pub snapshots: SnapshotCell,
    /// Metadata served at the discovery path
    pub metadata: Arc<ResourceMetadata>,
}

async fn metadata_handler(State(state): State<AppState>) -> Json<ResourceMetadata> {
    Json(state.metadata.as_ref().clone())
}

/// Routes with the gate applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .route(OAUTH_PROTECTED_RESOURCE_PATH, get(metadata_handler))
        .route(MCP_PATH, post(mcp_handler))
        .layer(from_fn_with_state(state.gate.clone(), authorize_request))
        .with_state(state)
}

/// Serve until interrupted
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, "Starting MCP server");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
    .map_err(|e| Error::Internal(format!("server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::policy::AccessPolicy;
    use crate::auth::token_review::MockTokenReviewer;
    use crate::auth::GateConfig;
    use crate::cluster::CredentialSource;
    use crate::reload::Snapshot;
    use crate::testing::clients_for;
    use crate::tools::{ClusterFacts, ToolSettings, ToolSurface};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::MockServer;

    fn app(server: &MockServer) -> Router {
        let mut config = StaticConfig::default();
        config.server_url = Some("https://mcp.example.com".into());
        config.authorization_url = Some("https://issuer.example.com".into());
        config.require_oauth = true;

        let facts = ClusterFacts::default();
        let snapshots = SnapshotCell::new(Snapshot {
            base: clients_for(server),
            policy: AccessPolicy::allow_all(),
            surface: Arc::new(ToolSurface::compute(&ToolSettings::default(), &facts)),
            facts,
            source: CredentialSource::InCluster,
            generation: 0,
        });
        router(AppState {
            gate: Arc::new(AuthGate::new(
                GateConfig::from_static(&config),
                Arc::new(MockTokenReviewer::new()),
            )),
            snapshots,
            metadata: Arc::new(ResourceMetadata::from_static(&config)),
        })
    }

    #[tokio::test]
    async fn metadata_is_public() {
        let server = MockServer::start().await;
        let response = app(&server)
            .oneshot(
                HttpRequest::get(OAUTH_PROTECTED_RESOURCE_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["resource"], "https://mcp.example.com");
        assert_eq!(body["authorization_servers"][0], "https://issuer.example.com");
        assert_eq!(body["bearer_methods_supported"][0], "header");
    }

    #[tokio::test]
    async fn mcp_requires_token() {
        let server = MockServer::start().await;
        let response = app(&server)
            .oneshot(
                HttpRequest::post(MCP_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers()["www-authenticate"].to_str().unwrap();
        assert!(challenge.contains(
            r#"resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource""#
        ));
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let server = MockServer::start().await;
        let response = app(&server)
            .oneshot(HttpRequest::get(HEALTHZ_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
