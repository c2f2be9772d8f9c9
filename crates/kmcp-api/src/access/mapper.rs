//! Type resolution with access control
//!
//! [`KindResolver`] caches API discovery for one client set and answers
//! kind/resource questions from it. [`AccessControlMapper`] wraps a resolver
//! and evaluates the access policy on every kind it would disclose. When a
//! lookup yields several candidates, one denied candidate rejects the whole
//! lookup.

use std::collections::HashSet;
use std::sync::Arc;

use kmcp_common::ResourceKey;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::access::policy::AccessPolicy;
use crate::error::{Error, Result};

/// A resource type resolved through discovery
#[derive(Debug, Clone, PartialEq)]
pub struct RestMapping {
    /// Group, version, kind and plural resource name
    pub resource: ApiResource,
    /// Whether objects of this type live in a namespace
    pub namespaced: bool,
}

impl RestMapping {
    /// The `{group, version, kind}` of this mapping
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.resource.group.clone(),
            self.resource.version.clone(),
            self.resource.kind.clone(),
        )
    }

    /// Lowercase singular name (`deployment`)
    pub fn singular(&self) -> String {
        self.resource.kind.to_lowercase()
    }

    fn matches_resource(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.resource.plural == name || self.singular() == name
    }
}

/// Partially specified resource (`deployments`, `deployments.apps`, `apps/v1 deployments`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRef {
    /// API group; `None` matches any group
    pub group: Option<String>,
    /// API version; `None` matches any version
    pub version: Option<String>,
    /// Plural or singular resource name
    pub resource: String,
}

impl ResourceRef {
    /// Reference by resource name only
    pub fn named(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    fn matches(&self, mapping: &RestMapping) -> bool {
        self.group.as_deref().map_or(true, |g| g == mapping.resource.group)
            && self
                .version
                .as_deref()
                .map_or(true, |v| v == mapping.resource.version)
            && mapping.matches_resource(&self.resource)
    }
}

/// `{group, kind}` pair used to look up mappings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKind {
    /// API group, empty for core
    pub group: String,
    /// Resource kind
    pub kind: String,
}

impl GroupKind {
    /// Build from parts
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl From<&ResourceKey> for GroupKind {
    fn from(key: &ResourceKey) -> Self {
        Self::new(key.group.clone(), key.kind.clone())
    }
}

/// Discovered resource types, preferred versions first within each group
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    mappings: Vec<RestMapping>,
    groups: HashSet<String>,
}

impl DiscoveryCache {
    /// Build a cache from known mappings
    pub fn new(mappings: Vec<RestMapping>) -> Self {
        let groups = mappings.iter().map(|m| m.resource.group.clone()).collect();
        Self { mappings, groups }
    }

    /// All mappings
    pub fn mappings(&self) -> &[RestMapping] {
        &self.mappings
    }

    /// Whether the server serves `group`
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    fn from_discovery(discovery: &Discovery) -> Self {
        let mut mappings = Vec::new();
        let mut groups = HashSet::new();

        for api_group in discovery.groups() {
            groups.insert(api_group.name().to_string());

            let preferred = api_group.preferred_version_or_latest().to_string();
            let mut versions: Vec<&str> = api_group.versions().collect();
            versions.sort_by_key(|v| *v != preferred);

            for version in versions {
                for (resource, caps) in api_group.versioned_resources(version) {
                    mappings.push(RestMapping {
                        resource,
                        namespaced: matches!(caps.scope, Scope::Namespaced),
                    });
                }
            }
        }

        Self { mappings, groups }
    }
}

enum DiscoverySource {
    Cluster(Client),
    Fixed(Arc<DiscoveryCache>),
}

/// Lazily loaded, resettable discovery for one client set
pub struct KindResolver {
    source: DiscoverySource,
    cache: RwLock<Option<Arc<DiscoveryCache>>>,
}

impl KindResolver {
    /// Resolver discovering types from the cluster on first use
    pub fn new(client: Client) -> Self {
        Self {
            source: DiscoverySource::Cluster(client),
            cache: RwLock::new(None),
        }
    }

    /// Resolver answering from a fixed set of mappings
    pub fn with_mappings(mappings: Vec<RestMapping>) -> Self {
        Self {
            source: DiscoverySource::Fixed(Arc::new(DiscoveryCache::new(mappings))),
            cache: RwLock::new(None),
        }
    }

    /// Current discovery data, loading it if needed
    pub async fn discovery(&self) -> Result<Arc<DiscoveryCache>> {
        if let Some(cache) = self.cache.read().await.as_ref() {
            return Ok(cache.clone());
        }

        let mut guard = self.cache.write().await;
        if let Some(cache) = guard.as_ref() {
            return Ok(cache.clone());
        }

        let loaded = match &self.source {
            DiscoverySource::Fixed(cache) => cache.clone(),
            DiscoverySource::Cluster(client) => {
                let discovery = Discovery::new(client.clone()).run().await?;
                let cache = Arc::new(DiscoveryCache::from_discovery(&discovery));
                info!(
                    groups = cache.groups.len(),
                    resources = cache.mappings.len(),
                    "Loaded API discovery"
                );
                cache
            }
        };

        *guard = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drop cached discovery; the next lookup reloads it
    pub async fn reset(&self) {
        *self.cache.write().await = None;
        debug!("Discovery cache invalidated");
    }

    /// Whether the server serves `group`
    pub async fn has_group(&self, group: &str) -> Result<bool> {
        Ok(self.discovery().await?.has_group(group))
    }
}

fn no_match(what: impl std::fmt::Display) -> Error {
    Error::InvalidArgument(format!("no matches for {}", what))
}

/// Policy-checked type resolution
#[derive(Clone)]
pub struct AccessControlMapper {
    resolver: Arc<KindResolver>,
    policy: AccessPolicy,
}

impl AccessControlMapper {
    /// Wrap `resolver` with `policy`
    pub fn new(resolver: Arc<KindResolver>, policy: AccessPolicy) -> Self {
        Self { resolver, policy }
    }

    async fn matching(&self, reference: &ResourceRef) -> Result<Vec<RestMapping>> {
        let cache = self.resolver.discovery().await?;
        Ok(cache
            .mappings()
            .iter()
            .filter(|m| reference.matches(m))
            .cloned()
            .collect())
    }

    fn check_all<'a>(&self, keys: impl IntoIterator<Item = &'a RestMapping>) -> Result<()> {
        for mapping in keys {
            self.policy.check(&mapping.key())?;
        }
        Ok(())
    }

    /// Preferred kind for a resource reference
    pub async fn kind_for(&self, reference: &ResourceRef) -> Result<ResourceKey> {
        let mapping = self
            .matching(reference)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| no_match(&reference.resource))?;
        self.policy.check(&mapping.key())?;
        Ok(mapping.key())
    }

    /// Every kind a resource reference can mean
    pub async fn kinds_for(&self, reference: &ResourceRef) -> Result<Vec<ResourceKey>> {
        let mappings = self.matching(reference).await?;
        if mappings.is_empty() {
            return Err(no_match(&reference.resource));
        }
        self.check_all(&mappings)?;
        Ok(mappings.iter().map(RestMapping::key).collect())
    }

    /// Preferred fully qualified resource for a reference
    pub async fn resource_for(&self, reference: &ResourceRef) -> Result<ApiResource> {
        let mapping = self
            .matching(reference)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| no_match(&reference.resource))?;
        self.policy.check(&mapping.key())?;
        Ok(mapping.resource)
    }

    /// Every fully qualified resource a reference can mean
    ///
    /// Fails if any candidate is denied.
    pub async fn resources_for(&self, reference: &ResourceRef) -> Result<Vec<ApiResource>> {
        let mappings = self.matching(reference).await?;
        if mappings.is_empty() {
            return Err(no_match(&reference.resource));
        }
        self.check_all(&mappings)?;
        Ok(mappings.into_iter().map(|m| m.resource).collect())
    }

    /// Mapping for a kind in the first listed version that exists
    ///
    /// Each requested version is checked before discovery is consulted. With
    /// no versions the preferred mapping is resolved and then checked.
    pub async fn rest_mapping(&self, group_kind: &GroupKind, versions: &[&str]) -> Result<RestMapping> {
        for version in versions {
            self.policy.check(&ResourceKey::new(
                group_kind.group.clone(),
                *version,
                group_kind.kind.clone(),
            ))?;
        }

        let cache = self.resolver.discovery().await?;
        let candidates = || {
            cache
                .mappings()
                .iter()
                .filter(|m| m.resource.group == group_kind.group && m.resource.kind == group_kind.kind)
        };

        let mapping = if versions.is_empty() {
            candidates().next()
        } else {
            versions
                .iter()
                .find_map(|v| candidates().find(|m| m.resource.version == *v))
        }
        .cloned()
        .ok_or_else(|| no_match(format!("kind {:?} in group {:?}", group_kind.kind, group_kind.group)))?;

        if versions.is_empty() {
            self.policy.check(&mapping.key())?;
        }
        Ok(mapping)
    }

    /// Every mapping for a kind, restricted to `versions` when given
    pub async fn rest_mappings(
        &self,
        group_kind: &GroupKind,
        versions: &[&str],
    ) -> Result<Vec<RestMapping>> {
        for version in versions {
            self.policy.check(&ResourceKey::new(
                group_kind.group.clone(),
                *version,
                group_kind.kind.clone(),
            ))?;
        }

        let cache = self.resolver.discovery().await?;
        let mappings: Vec<RestMapping> = cache
            .mappings()
            .iter()
            .filter(|m| m.resource.group == group_kind.group && m.resource.kind == group_kind.kind)
            .filter(|m| versions.is_empty() || versions.contains(&m.resource.version.as_str()))
            .cloned()
            .collect();

        if mappings.is_empty() {
            return Err(no_match(format!(
                "kind {:?} in group {:?}",
                group_kind.kind, group_kind.group
            )));
        }
        self.check_all(&mappings)?;
        Ok(mappings)
    }

    /// Mapping for an exact `{group, version, kind}`
    pub async fn resolve(&self, key: &ResourceKey) -> Result<RestMapping> {
        self.rest_mapping(&GroupKind::from(key), &[key.version.as_str()])
            .await
    }

    /// Singular name for a resource name; unknown names are returned unchanged
    pub async fn resource_singularizer(&self, resource: &str) -> Result<String> {
        let cache = self.resolver.discovery().await?;
        Ok(cache
            .mappings()
            .iter()
            .find(|m| m.matches_resource(resource))
            .map(RestMapping::singular)
            .unwrap_or_else(|| resource.to_string()))
    }

    /// Invalidate the underlying discovery cache
    pub async fn reset(&self) {
        self.resolver.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clients_for, mount_discovery};
    use kube::core::GroupVersionKind;
    use wiremock::MockServer;

    fn mapping(group: &str, version: &str, kind: &str, plural: &str) -> RestMapping {
        RestMapping {
            resource: ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(group, version, kind),
                plural,
            ),
            namespaced: true,
        }
    }

    fn mapper(denied: Vec<ResourceKey>) -> AccessControlMapper {
        let resolver = KindResolver::with_mappings(vec![
            mapping("", "v1", "Pod", "pods"),
            mapping("", "v1", "Secret", "secrets"),
            mapping("apps", "v1", "Deployment", "deployments"),
            mapping("apps", "v1beta1", "Deployment", "deployments"),
            mapping("extensions", "v1beta1", "Deployment", "deployments"),
        ]);
        AccessControlMapper::new(Arc::new(resolver), AccessPolicy::new(denied))
    }

    #[tokio::test]
    async fn kind_for_returns_preferred_allowed_kind() {
        let key = mapper(vec![])
            .kind_for(&ResourceRef::named("deployments"))
            .await
            .unwrap();
        assert_eq!(key, ResourceKey::new("apps", "v1", "Deployment"));
    }

    #[tokio::test]
    async fn kind_for_denied_kind_is_rejected() {
        let err = mapper(vec![ResourceKey::new("", "v1", "Secret")])
            .kind_for(&ResourceRef::named("secret"))
            .await
            .unwrap_err();
        assert!(err.is_policy_denied());
    }

    #[tokio::test]
    async fn kinds_for_rejects_when_any_candidate_is_denied() {
        let m = mapper(vec![ResourceKey::new("extensions", "v1beta1", "")]);
        let err = m.kinds_for(&ResourceRef::named("deployments")).await.unwrap_err();
        assert!(err.is_policy_denied());

        let narrowed = ResourceRef {
            group: Some("apps".into()),
            ..ResourceRef::named("deployments")
        };
        assert_eq!(m.kinds_for(&narrowed).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resource_for_denied_kind_is_rejected() {
        let m = mapper(vec![ResourceKey::new("", "v1", "Secret")]);
        let secrets = ResourceRef::named("secrets");
        assert!(m.resource_for(&secrets).await.unwrap_err().is_policy_denied());
        assert!(m.resources_for(&secrets).await.unwrap_err().is_policy_denied());

        let pods = m.resource_for(&ResourceRef::named("pods")).await.unwrap();
        assert_eq!(pods.kind, "Pod");
    }

    #[tokio::test]
    async fn resources_for_rejects_when_any_candidate_is_denied() {
        let m = mapper(vec![ResourceKey::new("extensions", "v1beta1", "")]);
        let err = m.resources_for(&ResourceRef::named("deployments")).await.unwrap_err();
        assert!(err.is_policy_denied());

        let narrowed = ResourceRef {
            group: Some("apps".into()),
            ..ResourceRef::named("deployments")
        };
        assert_eq!(m.resources_for(&narrowed).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rest_mapping_checks_each_requested_version() {
        let m = mapper(vec![ResourceKey::new("apps", "v1beta1", "Deployment")]);
        let gk = GroupKind::new("apps", "Deployment");

        let err = m.rest_mapping(&gk, &["v1", "v1beta1"]).await.unwrap_err();
        assert!(err.is_policy_denied());

        let ok = m.rest_mapping(&gk, &["v1"]).await.unwrap();
        assert_eq!(ok.resource.version, "v1");
    }

    #[tokio::test]
    async fn rest_mapping_without_versions_checks_resolved_version() {
        let m = mapper(vec![ResourceKey::new("apps", "v1", "Deployment")]);
        let err = m
            .rest_mapping(&GroupKind::new("apps", "Deployment"), &[])
            .await
            .unwrap_err();
        assert!(err.is_policy_denied());
    }

    #[tokio::test]
    async fn rest_mappings_rejects_partial_denial() {
        let m = mapper(vec![ResourceKey::new("apps", "v1beta1", "Deployment")]);
        let gk = GroupKind::new("apps", "Deployment");
        assert!(m.rest_mappings(&gk, &[]).await.unwrap_err().is_policy_denied());
        assert_eq!(m.rest_mappings(&gk, &["v1"]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_kind_is_invalid_argument() {
        let err = mapper(vec![])
            .resolve(&ResourceKey::new("example.com", "v1", "Widget"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn singularizer_is_passthrough_for_unknown_names() {
        let m = mapper(vec![ResourceKey::new("", "v1", "Pod")]);
        assert_eq!(m.resource_singularizer("pods").await.unwrap(), "pod");
        assert_eq!(m.resource_singularizer("widgets").await.unwrap(), "widgets");
    }

    async fn group_list_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/apis")
            .count()
    }

    #[tokio::test]
    async fn discovery_is_cached_until_reset() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;
        let clients = clients_for(&server);
        let m = AccessControlMapper::new(clients.resolver().clone(), AccessPolicy::allow_all());

        let key = m.kind_for(&ResourceRef::named("deployments")).await.unwrap();
        assert_eq!(key, ResourceKey::new("apps", "v1", "Deployment"));
        m.kind_for(&ResourceRef::named("pods")).await.unwrap();

        assert_eq!(group_list_requests(&server).await, 1);

        m.reset().await;
        m.kind_for(&ResourceRef::named("pods")).await.unwrap();
        assert_eq!(group_list_requests(&server).await, 2);
    }

    #[tokio::test]
    async fn discovery_reports_groups_and_scope() {
        let server = MockServer::start().await;
        mount_discovery(&server, true).await;
        let clients = clients_for(&server);

        assert!(clients.resolver().has_group("project.openshift.io").await.unwrap());
        let cache = clients.resolver().discovery().await.unwrap();
        let namespace = cache
            .mappings()
            .iter()
            .find(|m| m.resource.kind == "Namespace")
            .unwrap();
        assert!(!namespace.namespaced);
        assert!(!cache.mappings().iter().any(|m| m.resource.plural.contains('/')));
    }
}
