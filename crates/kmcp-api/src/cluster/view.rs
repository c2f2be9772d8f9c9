//! Kubeconfig view served by the `configuration_view` tool
//!
//! Credential material is always removed from user entries. Minified views
//! keep only the current context with its cluster and user.

use serde_yaml::{Mapping, Value};

use crate::cluster::KubeClients;
use crate::error::{Error, Result};

const SECRET_USER_KEYS: &[&str] = &[
    "token",
    "tokenFile",
    "password",
    "client-certificate-data",
    "client-key-data",
    "client-key",
];

fn named<'a>(doc: &'a Value, list: &str, name: &str) -> Option<&'a Value> {
    doc.get(list)?
        .as_sequence()?
        .iter()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
}

fn str_field<'a>(entry: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(entry, |v, key| v.get(*key))
        .and_then(Value::as_str)
}

/// Keep only the current context, its cluster and its user
pub fn minify(doc: &Value) -> Result<Value> {
    let current = doc
        .get("current-context")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Config("kubeconfig has no current context".into()))?;
    let context = named(doc, "contexts", current)
        .ok_or_else(|| Error::Config(format!("context {:?} not found", current)))?;

    let mut out = Mapping::new();
    for key in ["apiVersion", "kind", "preferences"] {
        if let Some(v) = doc.get(key) {
            out.insert(key.into(), v.clone());
        }
    }

    let pick = |list: &str, name: Option<&str>| -> Value {
        Value::Sequence(
            name.and_then(|n| named(doc, list, n))
                .cloned()
                .into_iter()
                .collect(),
        )
    };
    out.insert(
        "clusters".into(),
        pick("clusters", str_field(context, &["context", "cluster"])),
    );
    out.insert(
        "users".into(),
        pick("users", str_field(context, &["context", "user"])),
    );
    out.insert("contexts".into(), Value::Sequence(vec![context.clone()]));
    out.insert("current-context".into(), current.into());
    Ok(Value::Mapping(out))
}

/// Strip credential material from every user entry
pub fn redact(doc: &mut Value) {
    let Some(users) = doc.get_mut("users").and_then(Value::as_sequence_mut) else {
        return;
    };
    for entry in users {
        let Some(user) = entry.get_mut("user").and_then(Value::as_mapping_mut) else {
            continue;
        };
        for key in SECRET_USER_KEYS {
            user.remove(*key);
        }
        if let Some(provider) = user.get_mut("auth-provider").and_then(Value::as_mapping_mut) {
            provider.remove("config");
        }
        if let Some(exec) = user.get_mut("exec").and_then(Value::as_mapping_mut) {
            exec.remove("env");
        }
    }
}

/// Synthetic kubeconfig for clients without a kubeconfig document
fn synthetic(config: &kube::Config) -> Value {
    let mut cluster = Mapping::new();
    cluster.insert("server".into(), config.cluster_url.to_string().into());

    let mut context = Mapping::new();
    context.insert("cluster".into(), "cluster".into());
    context.insert("user".into(), "user".into());
    context.insert("namespace".into(), config.default_namespace.clone().into());

    let entry = |name: &str, key: &str, value: Value| {
        let mut m = Mapping::new();
        m.insert("name".into(), name.into());
        m.insert(key.into(), value);
        Value::Mapping(m)
    };

    let mut doc = Mapping::new();
    doc.insert("apiVersion".into(), "v1".into());
    doc.insert("kind".into(), "Config".into());
    doc.insert(
        "clusters".into(),
        Value::Sequence(vec![entry("cluster", "cluster", Value::Mapping(cluster))]),
    );
    doc.insert(
        "users".into(),
        Value::Sequence(vec![entry("user", "user", Value::Mapping(Mapping::new()))]),
    );
    doc.insert(
        "contexts".into(),
        Value::Sequence(vec![entry("context", "context", Value::Mapping(context))]),
    );
    doc.insert("current-context".into(), "context".into());
    Value::Mapping(doc)
}

/// Render the kubeconfig behind `clients` as YAML
pub fn configuration_view(clients: &KubeClients, minified: bool) -> Result<String> {
    let doc = match clients.kubeconfig() {
        Some(doc) => doc.clone(),
        None => synthetic(clients.config()),
    };
    let mut doc = if minified { minify(&doc)? } else { doc };
    redact(&mut doc);
    serde_yaml::to_string(&doc).map_err(|e| Error::Internal(e.to_string()))
}
