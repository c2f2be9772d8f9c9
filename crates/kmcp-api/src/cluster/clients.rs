//! Client sets and the credential derivation manager

use std::sync::Arc;

use kmcp_common::metrics::{record_derivation, DerivationOutcome};
use kube::Client;
use tracing::{debug, warn};

use crate::access::mapper::{AccessControlMapper, KindResolver};
use crate::access::policy::AccessPolicy;
use crate::access::resources::ResourceClient;
use crate::cluster::config::{derive_config, strip_users};
use crate::context::{BearerToken, CallContext};
use crate::error::{Error, Result};

/// A configuration with the clients built from it
///
/// Each set owns its own discovery cache. Caller-scoped sets are built per
/// call and dropped with it.
pub struct KubeClients {
    config: kube::Config,
    client: Client,
    resolver: Arc<KindResolver>,
    kubeconfig: Option<serde_yaml::Value>,
}

impl KubeClients {
    /// Build a client set from a configuration
    pub fn from_config(config: kube::Config, kubeconfig: Option<serde_yaml::Value>) -> Result<Self> {
        let client = Client::try_from(config.clone())?;
        let resolver = Arc::new(KindResolver::new(client.clone()));
        Ok(Self {
            config,
            client,
            resolver,
            kubeconfig,
        })
    }

    /// Configuration the clients were built from
    pub fn config(&self) -> &kube::Config {
        &self.config
    }

    /// Dynamic client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Discovery for this client set
    pub fn resolver(&self) -> &Arc<KindResolver> {
        &self.resolver
    }

    /// Kubeconfig document, if the configuration came from one
    pub fn kubeconfig(&self) -> Option<&serde_yaml::Value> {
        self.kubeconfig.as_ref()
    }

    /// Namespace used when a call names none
    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    /// Policy-checked type resolution over this set's discovery
    pub fn mapper(&self, policy: &AccessPolicy) -> AccessControlMapper {
        AccessControlMapper::new(self.resolver.clone(), policy.clone())
    }

    /// Policy-checked resource operations
    pub fn resources(self: &Arc<Self>, policy: &AccessPolicy) -> ResourceClient {
        ResourceClient::new(self.clone(), policy.clone())
    }

    /// Client set for one call
    ///
    /// Without a caller token the shared set is returned as is. With one, a
    /// fresh set authenticating only as the caller is built. If that fails
    /// the shared set is used and the failure is logged.
    pub fn derive(self: &Arc<Self>, ctx: &CallContext) -> Arc<KubeClients> {
        let Some(token) = ctx.token() else {
            record_derivation(DerivationOutcome::Shared);
            return self.clone();
        };

        match self.derive_with_token(token) {
            Ok(derived) => {
                debug!(
                    user = ctx.identity().map(|i| i.username.as_str()).unwrap_or(""),
                    "Built caller-scoped clients"
                );
                record_derivation(DerivationOutcome::Derived);
                Arc::new(derived)
            }
            Err(e) => {
                warn!(error = %e, "Falling back to shared clients");
                record_derivation(DerivationOutcome::Fallback);
                self.clone()
            }
        }
    }

    fn derive_with_token(&self, token: &BearerToken) -> Result<KubeClients> {
        let config = derive_config(&self.config, token);
        let kubeconfig = self.kubeconfig.clone().map(|mut doc| {
            strip_users(&mut doc);
            doc
        });
        KubeClients::from_config(config, kubeconfig)
            .map_err(|e| Error::CredentialDerivation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clients_for, config_for, mount_discovery};
    use secrecy::ExposeSecret;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn no_token_returns_the_shared_instance() {
        let server = MockServer::start().await;
        let base = clients_for(&server);
        let derived = base.derive(&CallContext::anonymous());
        assert!(Arc::ptr_eq(&base, &derived));
    }

    #[tokio::test]
    async fn token_builds_independent_clients() {
        let server = MockServer::start().await;
        let base = clients_for(&server);
        let derived = base.derive(&CallContext::with_token(BearerToken::new("caller-token")));

        assert!(!Arc::ptr_eq(&base, &derived));
        assert!(!Arc::ptr_eq(base.resolver(), derived.resolver()));
        assert_eq!(
            derived.config().auth_info.token.as_ref().map(|t| t.expose_secret()),
            Some("caller-token")
        );
        assert!(base.config().auth_info.token.is_none());
    }

    #[tokio::test]
    async fn derived_kubeconfig_has_no_users() {
        let server = MockServer::start().await;
        let doc: serde_yaml::Value =
            serde_yaml::from_str("users:\n- name: admin\n  user: {token: admin-token}\n").unwrap();
        let base = Arc::new(KubeClients::from_config(config_for(&server), Some(doc)).unwrap());

        let derived = base.derive(&CallContext::with_token(BearerToken::new("T")));
        let users = derived.kubeconfig().unwrap()["users"].as_sequence().unwrap();
        assert!(users.is_empty());
        assert_eq!(base.kubeconfig().unwrap()["users"].as_sequence().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn derived_clients_send_the_caller_token() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .and(header("authorization", "Bearer caller-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "PodList", "apiVersion": "v1", "metadata": {}, "items": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = clients_for(&server);
        let derived = base.derive(&CallContext::with_token(BearerToken::new("caller-token")));
        let pods: kube::Api<k8s_openapi::api::core::v1::Pod> =
            kube::Api::namespaced(derived.client().clone(), "default");
        pods.list(&Default::default()).await.unwrap();
    }
}
