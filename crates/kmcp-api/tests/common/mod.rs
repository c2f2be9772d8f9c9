//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use kmcp_api::auth::{AuthGate, GateConfig, TokenReviewer};
use kmcp_api::context::CallerIdentity;
use kmcp_api::reload::{build_snapshot, ReloadSettings, SnapshotCell};
use kmcp_api::server::{router, AppState, ResourceMetadata};
use kmcp_api::AuthError;
use kmcp_common::{ResourceKey, StaticConfig};
use serde_json::{json, Value};
use tracing_subscriber::fmt::MakeWriter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AUDIENCE: &str = "kubernetes-mcp-server";

/// Accepts every token and counts reviews
#[derive(Default)]
pub struct CountingReviewer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TokenReviewer for CountingReviewer {
    async fn review(&self, _token: &str, _audience: &str) -> Result<CallerIdentity, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CallerIdentity {
            username: "system:serviceaccount:agents:reader".into(),
            groups: vec!["system:serviceaccounts".into()],
        })
    }
}

/// In-memory log sink for a scoped JSON subscriber
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Install a JSON subscriber writing here for the current thread
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Unsigned token with `claims`
pub fn token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Token for the default audience expiring `ttl` seconds from now
pub fn token_expiring_in(ttl: i64) -> String {
    token(json!({
        "sub": "reader",
        "aud": AUDIENCE,
        "exp": chrono::Utc::now().timestamp() + ttl,
    }))
}

pub fn write_kubeconfig(path: &Path, server: &MockServer) {
    std::fs::write(
        path,
        format!(
            r#"apiVersion: v1
kind: Config
current-context: test
contexts:
- name: test
  context: {{cluster: test, user: admin, namespace: default}}
clusters:
- name: test
  cluster: {{server: "{}"}}
users:
- name: admin
  user: {{token: admin-token}}
"#,
            server.uri()
        ),
    )
    .unwrap();
}

fn api_resource(name: &str, kind: &str, namespaced: bool) -> Value {
    json!({
        "name": name,
        "singularName": kind.to_lowercase(),
        "namespaced": namespaced,
        "kind": kind,
        "verbs": ["get", "list", "create", "update", "patch", "delete"],
    })
}

/// Minimal discovery; adds the OpenShift project group when `openshift`
pub async fn mount_discovery(server: &MockServer, openshift: bool) {
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "APIVersions",
            "apiVersion": "v1",
            "versions": ["v1"],
            "serverAddressByClientCIDRs": [],
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "v1",
            "resources": [
                api_resource("pods", "Pod", true),
                api_resource("secrets", "Secret", true),
                api_resource("namespaces", "Namespace", false),
            ],
        })))
        .mount(server)
        .await;

    let mut groups = vec![];
    if openshift {
        groups.push(json!({
            "name": "project.openshift.io",
            "versions": [{"groupVersion": "project.openshift.io/v1", "version": "v1"}],
            "preferredVersion": {"groupVersion": "project.openshift.io/v1", "version": "v1"},
        }));
        Mock::given(method("GET"))
            .and(path("/apis/project.openshift.io/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "APIResourceList",
                "apiVersion": "v1",
                "groupVersion": "project.openshift.io/v1",
                "resources": [api_resource("projects", "Project", false)],
            })))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/apis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "APIGroupList",
            "apiVersion": "v1",
            "groups": groups,
        })))
        .mount(server)
        .await;
}

/// A running gateway over a fake cluster
pub struct Harness {
    pub app: axum::Router,
    pub snapshots: SnapshotCell,
    pub settings: ReloadSettings,
    pub reviewer: Arc<CountingReviewer>,
    pub dir: tempfile::TempDir,
}

/// Gateway with authorization on, Secrets denied, credentials from a kubeconfig
/// pointing at `server`
pub async fn harness(server: &MockServer) -> Harness {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let dir = tempfile::tempdir().unwrap();
    let kubeconfig = dir.path().join("config");
    write_kubeconfig(&kubeconfig, server);

    let config = StaticConfig {
        require_oauth: true,
        kubeconfig: Some(kubeconfig),
        denied_resources: vec![ResourceKey::new("", "v1", "Secret")],
        ..Default::default()
    };
    let settings = ReloadSettings::from_static(&config).unwrap();
    let snapshots = SnapshotCell::new(build_snapshot(&settings, 0).await.unwrap());
    let reviewer = Arc::new(CountingReviewer::default());

    let app = router(AppState {
        gate: Arc::new(AuthGate::new(GateConfig::from_static(&config), reviewer.clone())),
        snapshots: snapshots.clone(),
        metadata: Arc::new(ResourceMetadata::from_static(&config)),
    });

    Harness {
        app,
        snapshots,
        settings,
        reviewer,
        dir,
    }
}
