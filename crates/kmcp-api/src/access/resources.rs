//! Policy-checked cluster operations
//!
//! Every accessor checks the access policy for its resource type before any
//! request leaves the process.

use std::sync::Arc;

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{Pod, Service};
use kmcp_common::{ResourceKey, FIELD_MANAGER};
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, LogParams, ObjectList, Patch,
    PatchParams, PostParams,
};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::access::mapper::{AccessControlMapper, RestMapping};
use crate::access::policy::AccessPolicy;
use crate::cluster::KubeClients;
use crate::error::{Error, Result};

/// Label marking objects created by `pods_run`
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

fn pod_key() -> ResourceKey {
    ResourceKey::new("", "v1", "Pod")
}

fn service_key() -> ResourceKey {
    ResourceKey::new("", "v1", "Service")
}

fn access_review_key() -> ResourceKey {
    ResourceKey::new("authorization.k8s.io", "v1", "SelfSubjectAccessReview")
}

/// Namespace list type
pub fn namespace_key() -> ResourceKey {
    ResourceKey::new("", "v1", "Namespace")
}

/// OpenShift project list type
pub fn project_key() -> ResourceKey {
    ResourceKey::new("project.openshift.io", "v1", "Project")
}

/// Event list type
pub fn event_key() -> ResourceKey {
    ResourceKey::new("", "v1", "Event")
}

/// Cluster operations for one client set under one policy
pub struct ResourceClient {
    clients: Arc<KubeClients>,
    policy: AccessPolicy,
    mapper: AccessControlMapper,
}

impl ResourceClient {
    /// Wrap a client set
    pub fn new(clients: Arc<KubeClients>, policy: AccessPolicy) -> Self {
        let mapper = clients.mapper(&policy);
        Self {
            clients,
            policy,
            mapper,
        }
    }

    /// Underlying client set
    pub fn clients(&self) -> &Arc<KubeClients> {
        &self.clients
    }

    /// Policy-checked type resolution
    pub fn mapper(&self) -> &AccessControlMapper {
        &self.mapper
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Pods in `namespace`, or in every namespace
    pub fn pods(&self, namespace: Option<&str>) -> Result<Api<Pod>> {
        self.policy.check(&pod_key())?;
        let client = self.clients.client().clone();
        Ok(match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        })
    }

    /// Services in `namespace`
    pub fn services(&self, namespace: &str) -> Result<Api<Service>> {
        self.policy.check(&service_key())?;
        Ok(Api::namespaced(self.clients.client().clone(), namespace))
    }

    /// Self-subject access reviews
    pub fn self_subject_access_reviews(&self) -> Result<Api<SelfSubjectAccessReview>> {
        self.policy.check(&access_review_key())?;
        Ok(Api::all(self.clients.client().clone()))
    }

    /// Whether the caller may `verb` the mapped resource
    ///
    /// Any failure, including a denied access review type, counts as no.
    pub async fn can_i(&self, verb: &str, mapping: &RestMapping, namespace: Option<&str>) -> bool {
        let Ok(api) = self.self_subject_access_reviews() else {
            return false;
        };
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: namespace.map(str::to_string),
                    verb: Some(verb.to_string()),
                    group: Some(mapping.resource.group.clone()),
                    version: Some(mapping.resource.version.clone()),
                    resource: Some(mapping.resource.plural.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        match api.create(&PostParams::default(), &review).await {
            Ok(result) => result.status.map(|s| s.allowed).unwrap_or(false),
            Err(e) => {
                debug!(error = %e, verb, resource = %mapping.resource.plural, "Access review failed");
                false
            }
        }
    }

    /// Run `command` in a pod container and return its output
    ///
    /// Without a container name the first container of the pod is used.
    pub async fn pods_exec(
        &self,
        namespace: &str,
        name: &str,
        container: Option<&str>,
        command: Vec<String>,
    ) -> Result<String> {
        let pods = self.pods(Some(namespace))?;
        let container = match container {
            Some(c) => c.to_string(),
            None => first_container(&pods.get(name).await?)?,
        };

        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut attached = pods.exec(name, command, &params).await?;

        let (stdout, stderr) = tokio::join!(
            read_stream(attached.stdout()),
            read_stream(attached.stderr())
        );
        attached
            .join()
            .await
            .map_err(|e| Error::Internal(format!("exec stream failed: {}", e)))?;

        let (stdout, stderr) = (stdout?, stderr?);
        Ok(if stdout.is_empty() { stderr } else { stdout })
    }

    /// Logs of a pod container
    pub async fn pods_log(&self, namespace: &str, name: &str, container: Option<&str>) -> Result<String> {
        let params = LogParams {
            container: container.map(str::to_string),
            ..Default::default()
        };
        Ok(self.pods(Some(namespace))?.logs(name, &params).await?)
    }

    /// Create a pod, plus a service when `port` is given
    pub async fn pods_run(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
        port: Option<i32>,
    ) -> Result<Vec<DynamicObject>> {
        let labels = json!({
            APP_NAME_LABEL: name,
            MANAGED_BY_LABEL: FIELD_MANAGER,
        });

        let mut container = json!({ "name": name, "image": image, "imagePullPolicy": "IfNotPresent" });
        if let Some(port) = port {
            container["ports"] = json!([{ "containerPort": port }]);
        }

        let mut manifests = vec![json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "spec": { "containers": [container] },
        })];
        if let Some(port) = port {
            manifests.push(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": name, "namespace": namespace, "labels": labels },
                "spec": {
                    "selector": { APP_NAME_LABEL: name },
                    "ports": [{ "port": port, "targetPort": port }],
                },
            }));
        }

        let objects = manifests
            .into_iter()
            .map(serde_json::from_value::<DynamicObject>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Internal(e.to_string()))?;
        self.apply_objects(objects).await
    }

    /// Delete a pod and any service `pods_run` created with it
    pub async fn pods_delete(&self, namespace: &str, name: &str) -> Result<()> {
        let pods = self.pods(Some(namespace))?;
        let pod = pods.get(name).await?;
        let managed = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(MANAGED_BY_LABEL))
            .is_some_and(|v| v == FIELD_MANAGER);

        if managed {
            let services = self.services(namespace)?;
            let selector = format!("{}={},{}={}", MANAGED_BY_LABEL, FIELD_MANAGER, APP_NAME_LABEL, name);
            for svc in services.list(&ListParams::default().labels(&selector)).await?.items {
                if let Some(svc_name) = svc.metadata.name {
                    services.delete(&svc_name, &DeleteParams::default()).await?;
                }
            }
        }

        pods.delete(name, &DeleteParams::default()).await?;
        info!(namespace, pod = name, managed, "Deleted pod");
        Ok(())
    }

    // =========================================================================
    // Dynamic operations
    // =========================================================================

    fn dynamic_api(&self, mapping: &RestMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        let client = self.clients.client().clone();
        match namespace {
            Some(ns) if mapping.namespaced => Api::namespaced_with(client, ns, &mapping.resource),
            _ => Api::all_with(client, &mapping.resource),
        }
    }

    async fn checked_mapping(&self, key: &ResourceKey) -> Result<RestMapping> {
        self.policy.check(key)?;
        self.mapper.resolve(key).await
    }

    /// List objects of a type
    ///
    /// For namespaced types without a namespace, every namespace is listed
    /// when the caller may do so; otherwise the default namespace is used.
    pub async fn resources_list(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<ObjectList<DynamicObject>> {
        let mapping = self.checked_mapping(key).await?;

        let namespace = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Some(ns.to_string()),
            None if mapping.namespaced && !self.can_i("list", &mapping, None).await => {
                debug!(resource = %key, "Listing in default namespace");
                Some(self.clients.default_namespace().to_string())
            }
            None => None,
        };

        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }
        Ok(self
            .dynamic_api(&mapping, namespace.as_deref())
            .list(&params)
            .await?)
    }

    fn namespace_or_default<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.clients.default_namespace())
    }

    /// Get one object
    pub async fn resources_get(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        let mapping = self.checked_mapping(key).await?;
        let ns = self.namespace_or_default(namespace);
        Ok(self.dynamic_api(&mapping, Some(ns)).get(name).await?)
    }

    /// Delete one object
    pub async fn resources_delete(&self, key: &ResourceKey, namespace: Option<&str>, name: &str) -> Result<()> {
        let mapping = self.checked_mapping(key).await?;
        let ns = self.namespace_or_default(namespace);
        self.dynamic_api(&mapping, Some(ns))
            .delete(name, &DeleteParams::default())
            .await?;
        info!(resource = %key, name, "Deleted resource");
        Ok(())
    }

    /// Server-side apply every document of a YAML or JSON manifest
    ///
    /// All documents are parsed and checked before the first request.
    pub async fn resources_create_or_update(&self, manifest: &str) -> Result<Vec<DynamicObject>> {
        self.apply_objects(parse_manifest(manifest)?).await
    }

    async fn apply_objects(&self, objects: Vec<DynamicObject>) -> Result<Vec<DynamicObject>> {
        let keys = objects
            .iter()
            .map(object_key)
            .collect::<Result<Vec<_>>>()?;
        for key in &keys {
            self.policy.check(key)?;
        }

        let mut applied = Vec::with_capacity(objects.len());
        let mut crd_changed = false;
        for (obj, key) in objects.iter().zip(&keys) {
            let mapping = self.mapper.resolve(key).await?;
            let name = obj
                .metadata
                .name
                .as_deref()
                .ok_or_else(|| Error::InvalidArgument(format!("{} has no name", key)))?;
            let ns = self.namespace_or_default(obj.metadata.namespace.as_deref());

            let result = self
                .dynamic_api(&mapping, Some(ns))
                .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
                .await?;
            info!(resource = %key, name, "Applied resource");

            crd_changed |= key.group == "apiextensions.k8s.io" && key.kind == "CustomResourceDefinition";
            applied.push(result);
        }

        if crd_changed {
            self.mapper.reset().await;
        }
        Ok(applied)
    }

    /// List namespaces
    pub async fn namespaces_list(&self) -> Result<ObjectList<DynamicObject>> {
        self.resources_list(&namespace_key(), None, None).await
    }

    /// List OpenShift projects
    pub async fn projects_list(&self) -> Result<ObjectList<DynamicObject>> {
        self.resources_list(&project_key(), None, None).await
    }

    /// List events in `namespace`, or everywhere the caller may list them
    pub async fn events_list(&self, namespace: Option<&str>) -> Result<ObjectList<DynamicObject>> {
        self.resources_list(&event_key(), namespace, None).await
    }
}

fn first_container(pod: &Pod) -> Result<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .map(|c| c.name.clone())
        .ok_or_else(|| Error::InvalidArgument("pod has no containers".into()))
}

async fn read_stream(stream: Option<impl AsyncRead + Unpin>) -> Result<String> {
    let mut out = String::new();
    if let Some(mut stream) = stream {
        stream
            .read_to_string(&mut out)
            .await
            .map_err(|e| Error::Internal(format!("failed to read exec output: {}", e)))?;
    }
    Ok(out)
}

/// `{group, version, kind}` of a manifest object
pub fn object_key(obj: &DynamicObject) -> Result<ResourceKey> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::InvalidArgument("object has no apiVersion or kind".into()))?;
    ResourceKey::from_api_version(&types.api_version, types.kind.clone())
        .ok_or_else(|| Error::InvalidArgument(format!("invalid apiVersion {:?}", types.api_version)))
}

/// Parse a multi-document YAML (or JSON) manifest, skipping empty documents
pub fn parse_manifest(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    if objects.is_empty() {
        return Err(Error::InvalidArgument("manifest contains no objects".into()));
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clients_for, mount_discovery};
    use serde_json::Value;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn list_body(kind: &str) -> Value {
        json!({ "kind": kind, "apiVersion": "v1", "metadata": {}, "items": [
            { "metadata": { "name": "item-1", "namespace": "default" } }
        ]})
    }

    async fn mount_access_review(server: &MockServer, allowed: bool) {
        Mock::given(method("POST"))
            .and(path("/apis/authorization.k8s.io/v1/selfsubjectaccessreviews"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "apiVersion": "authorization.k8s.io/v1",
                "kind": "SelfSubjectAccessReview",
                "spec": {},
                "status": { "allowed": allowed },
            })))
            .mount(server)
            .await;
    }

    async fn client(server: &MockServer, denied: Vec<ResourceKey>) -> ResourceClient {
        mount_discovery(server, false).await;
        ResourceClient::new(clients_for(server), AccessPolicy::new(denied))
    }

    #[tokio::test]
    async fn denied_type_sends_no_request() {
        let server = MockServer::start().await;
        let rc = ResourceClient::new(
            clients_for(&server),
            AccessPolicy::new(vec![ResourceKey::new("", "v1", "Secret")]),
        );

        let err = rc
            .resources_get(&ResourceKey::new("", "v1", "Secret"), Some("default"), "token")
            .await
            .unwrap_err();
        assert!(err.is_policy_denied());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typed_accessors_are_checked() {
        let server = MockServer::start().await;
        let rc = ResourceClient::new(
            clients_for(&server),
            AccessPolicy::new(vec![ResourceKey::new("", "v1", "")]),
        );
        assert!(rc.pods(None).unwrap_err().is_policy_denied());
        assert!(rc.services("default").unwrap_err().is_policy_denied());
        assert!(rc.self_subject_access_reviews().is_ok());

        let err = rc
            .pods_exec("default", "web", Some("app"), vec!["ls".into()])
            .await
            .unwrap_err();
        assert!(err.is_policy_denied());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_spans_namespaces_when_allowed() {
        let server = MockServer::start().await;
        let rc = client(&server, vec![]).await;
        mount_access_review(&server, true).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/configmaps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body("ConfigMapList")))
            .expect(1)
            .mount(&server)
            .await;

        let list = rc
            .resources_list(&ResourceKey::new("", "v1", "ConfigMap"), None, None)
            .await
            .unwrap();
        assert_eq!(list.items.len(), 1);
    }

    #[tokio::test]
    async fn list_falls_back_to_default_namespace() {
        let server = MockServer::start().await;
        let rc = client(&server, vec![]).await;
        mount_access_review(&server, false).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps"))
            .and(query_param("labelSelector", "app=web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body("ConfigMapList")))
            .expect(1)
            .mount(&server)
            .await;

        rc.resources_list(&ResourceKey::new("", "v1", "ConfigMap"), None, Some("app=web"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn access_review_error_counts_as_denied() {
        let server = MockServer::start().await;
        let rc = client(&server, vec![]).await;
        Mock::given(method("POST"))
            .and(path("/apis/authorization.k8s.io/v1/selfsubjectaccessreviews"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = rc.clients().resolver().discovery().await.unwrap();
        let mapping = cache
            .mappings()
            .iter()
            .find(|m| m.resource.kind == "ConfigMap")
            .unwrap();
        assert!(!rc.can_i("list", mapping, None).await);
    }

    #[tokio::test]
    async fn apply_checks_every_document_first() {
        let server = MockServer::start().await;
        let rc = client(&server, vec![ResourceKey::new("", "v1", "Secret")]).await;
        let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata: {name: settings}
---
apiVersion: v1
kind: Secret
metadata: {name: creds}
"#;

        let err = rc.resources_create_or_update(manifest).await.unwrap_err();
        assert!(err.is_policy_denied());
        let patches = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .count();
        assert_eq!(patches, 0);
    }

    #[tokio::test]
    async fn apply_uses_server_side_apply() {
        let server = MockServer::start().await;
        let rc = client(&server, vec![]).await;
        Mock::given(method("PATCH"))
            .and(path("/apis/apps/v1/namespaces/default/deployments/web"))
            .and(query_param("fieldManager", FIELD_MANAGER))
            .and(query_param("force", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "apps/v1", "kind": "Deployment",
                "metadata": { "name": "web", "namespace": "default" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let applied = rc
            .resources_create_or_update(
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec: {}\n",
            )
            .await
            .unwrap();
        assert_eq!(applied[0].metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn parse_manifest_skips_empty_documents() {
        let objects = parse_manifest("---\napiVersion: v1\nkind: Pod\nmetadata: {name: a}\n---\n").unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(object_key(&objects[0]).unwrap(), ResourceKey::new("", "v1", "Pod"));

        let json = parse_manifest(r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"x"}}"#).unwrap();
        assert_eq!(object_key(&json[0]).unwrap().group, "apps");

        assert!(parse_manifest("").is_err());
        assert!(object_key(&parse_manifest("metadata: {name: x}\n").unwrap()[0]).is_err());
    }
}
