#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod domain;
mod error;
pub mod routes;

pub use self::{
    domain::extract_domain,
    error::{BoxError, LookupError},
    routes::{DomainSet, RoutingRule},
};

use std::collections::HashMap;

/// Maps each looked-up domain to whether the threat provider reported a match
/// for it.
pub type ThreatStatus = HashMap<String, bool>;

/// Enumerates the routing rules currently declared in a cluster.
#[async_trait::async_trait]
pub trait DiscoverRoutes: Send + Sync {
    async fn list_routes(&self) -> Result<Vec<RoutingRule>, LookupError>;
}

/// Checks a set of domains against a threat-intelligence provider.
///
/// Implementations must return an entry for every domain in the set.
#[async_trait::async_trait]
pub trait LookupThreats: Send + Sync {
    async fn lookup(&self, domains: &DomainSet) -> Result<ThreatStatus, LookupError>;
}
