//! Fake API server fixtures for unit tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::cluster::KubeClients;

fn resource(name: &str, kind: &str, namespaced: bool) -> Value {
    json!({
        "name": name,
        "singularName": kind.to_lowercase(),
        "namespaced": namespaced,
        "kind": kind,
        "verbs": ["get", "list", "create", "update", "patch", "delete"],
    })
}

fn resource_list(group_version: &str, resources: Vec<Value>) -> Value {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": group_version,
        "resources": resources,
    })
}

fn group(name: &str, versions: &[&str]) -> Value {
    let entries: Vec<Value> = versions
        .iter()
        .map(|v| json!({"groupVersion": format!("{}/{}", name, v), "version": v}))
        .collect();
    json!({
        "name": name,
        "versions": entries,
        "preferredVersion": entries[0].clone(),
    })
}

/// Serve legacy discovery for core/v1, apps/v1 and apps/v1beta1, plus
/// project.openshift.io/v1 when `openshift` is set
pub async fn mount_discovery(server: &MockServer, openshift: bool) {
    mount_slow_discovery(server, openshift, Duration::ZERO).await;
}

/// Same as [`mount_discovery`], each response held back by `delay`
pub async fn mount_slow_discovery(server: &MockServer, openshift: bool, delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(json!({
            "kind": "APIVersions",
            "apiVersion": "v1",
            "versions": ["v1"],
            "serverAddressByClientCIDRs": [],
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(resource_list(
            "v1",
            vec![
                resource("pods", "Pod", true),
                resource("pods/log", "Pod", true),
                resource("services", "Service", true),
                resource("secrets", "Secret", true),
                resource("configmaps", "ConfigMap", true),
                resource("events", "Event", true),
                resource("namespaces", "Namespace", false),
            ],
        )))
        .mount(server)
        .await;

    let mut groups = vec![group("apps", &["v1", "v1beta1"])];
    if openshift {
        groups.push(group("project.openshift.io", &["v1"]));
    }
    Mock::given(method("GET"))
        .and(path("/apis"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(json!({
            "kind": "APIGroupList",
            "apiVersion": "v1",
            "groups": groups,
        })))
        .mount(server)
        .await;

    for version in ["v1", "v1beta1"] {
        Mock::given(method("GET"))
            .and(path(format!("/apis/apps/{}", version)))
            .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(resource_list(
                &format!("apps/{}", version),
                vec![resource("deployments", "Deployment", true)],
            )))
            .mount(server)
            .await;
    }

    if openshift {
        Mock::given(method("GET"))
            .and(path("/apis/project.openshift.io/v1"))
            .respond_with(ResponseTemplate::new(200).set_delay(delay).set_body_json(resource_list(
                "project.openshift.io/v1",
                vec![resource("projects", "Project", false)],
            )))
            .mount(server)
            .await;
    }
}

/// Client config pointing at `server`
pub fn config_for(server: &MockServer) -> kube::Config {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut config = kube::Config::new(server.uri().parse().unwrap());
    config.default_namespace = "default".to_string();
    config
}

/// Client set pointing at `server`
pub fn clients_for(server: &MockServer) -> Arc<KubeClients> {
    Arc::new(KubeClients::from_config(config_for(server), None).unwrap())
}
