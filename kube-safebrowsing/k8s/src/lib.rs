#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use k8s_openapi::api::{core::v1::Namespace, networking::v1::Ingress};
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use kube_safebrowsing_core::{extract_domain, DiscoverRoutes, LookupError, RoutingRule};
use tokio::time;
use tracing::debug;

/// Lists the Ingresses of every namespace in the cluster.
#[derive(Clone)]
pub struct ClusterRoutes {
    client: Client,
    timeout: time::Duration,
}

// === impl ClusterRoutes ===

impl ClusterRoutes {
    pub fn new(client: Client, timeout: time::Duration) -> Self {
        Self { client, timeout }
    }

    async fn list(&self) -> Result<Vec<RoutingRule>, LookupError> {
        let params = ListParams::default();
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&params)
            .await
            .map_err(|error| LookupError::List {
                kind: "namespaces",
                source: error.into(),
            })?;

        let mut rules = Vec::new();
        for ns in namespaces.items {
            let namespace = ns.name_unchecked();
            let ingresses = Api::<Ingress>::namespaced(self.client.clone(), &namespace)
                .list(&params)
                .await
                .map_err(|error| LookupError::ListNamespaced {
                    kind: "ingresses",
                    namespace: namespace.clone(),
                    source: error.into(),
                })?;

            for ingress in &ingresses.items {
                let rule = routing_rule(ingress, &namespace);
                debug!(namespace = %rule.namespace, name = %rule.name, domains = ?rule.domains, "Found ingress");
                rules.push(rule);
            }
        }

        Ok(rules)
    }
}

#[async_trait::async_trait]
impl DiscoverRoutes for ClusterRoutes {
    async fn list_routes(&self) -> Result<Vec<RoutingRule>, LookupError> {
        time::timeout(self.timeout, self.list())
            .await
            .map_err(|_| LookupError::Timeout {
                operation: "listing ingresses",
                timeout: self.timeout,
            })?
    }
}

/// Builds the routing rule for an Ingress listed in `namespace`.
///
/// Rules without a host do not contribute a domain.
pub fn routing_rule(ingress: &Ingress, namespace: &str) -> RoutingRule {
    let hosts = ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter_map(|rule| rule.host.as_deref())
        .filter_map(extract_domain);

    RoutingRule::new(
        ingress.namespace().as_deref().unwrap_or(namespace),
        ingress.name_unchecked(),
        hosts,
    )
}
