//! Request Router - resolves which cluster (or "all clusters") a request targets
//!
//! Synchronous save for the single suspension point at `ClientPool::get`.
//! Resolution order: path param, then query param, then header, then (if
//! exactly one cluster is registered) that cluster as the default. An
//! ambiguous or unresolved selector is a client error, not a 404: the
//! caller gave an instruction the router cannot act on.

use std::sync::Arc;

use axum::http::HeaderMap;
use thiserror::Error;

use super::pool::ClientPool;
use super::registration::{is_all_clusters_selector, ALL_CLUSTERS_SENTINEL};

pub const CLUSTER_HEADER: &str = "x-cluster";
pub const CLUSTER_QUERY_PARAM: &str = "cluster";

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("no cluster selector given and more than one cluster is registered; available: {0:?}")]
    Ambiguous(Vec<String>),
    #[error("no clusters are registered")]
    NoClustersRegistered,
}

/// The resolved target of a routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// A single named cluster.
    Cluster(String),
    /// The `__all__` sentinel: route to the Global Aggregator instead.
    AllClusters,
}

pub struct RequestRouter {
    pool: Arc<ClientPool>,
}

impl RequestRouter {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Resolve a route target from a path param (highest precedence), a
    /// query param, and request headers, falling back to "the only
    /// registered cluster" when none of those are present.
    pub async fn resolve(
        &self,
        path_param: Option<&str>,
        query: &std::collections::HashMap<String, String>,
        headers: &HeaderMap,
    ) -> Result<RouteTarget, RouteError> {
        if let Some(name) = path_param {
            return Ok(Self::target_for(name));
        }
        if let Some(name) = query.get(CLUSTER_QUERY_PARAM) {
            return Ok(Self::target_for(name));
        }
        if let Some(value) = headers.get(CLUSTER_HEADER) {
            if let Ok(name) = value.to_str() {
                return Ok(Self::target_for(name));
            }
        }

        let names = self.pool.names().await;
        match names.len() {
            0 => Err(RouteError::NoClustersRegistered),
            1 => Ok(RouteTarget::Cluster(names.into_iter().next().unwrap())),
            _ => Err(RouteError::Ambiguous(names)),
        }
    }

    fn target_for(selector: &str) -> RouteTarget {
        if is_all_clusters_selector(selector) {
            RouteTarget::AllClusters
        } else {
            RouteTarget::Cluster(selector.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::credentials::CredentialStore;
    use crate::registry::store::RegistrationStore;
    use axum::http::HeaderValue;

    fn empty_query() -> std::collections::HashMap<String, String> {
        std::collections::HashMap::new()
    }

    #[tokio::test]
    async fn test_path_param_takes_precedence() {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store, creds));
        let router = RequestRouter::new(pool);

        let mut query = empty_query();
        query.insert(CLUSTER_QUERY_PARAM.to_string(), "ignored".to_string());

        let target = router
            .resolve(Some("gpu-east"), &query, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(target, RouteTarget::Cluster("gpu-east".to_string()));
    }

    #[tokio::test]
    async fn test_all_clusters_sentinel_in_path() {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store, creds));
        let router = RequestRouter::new(pool);

        let target = router
            .resolve(Some(ALL_CLUSTERS_SENTINEL), &empty_query(), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(target, RouteTarget::AllClusters);
    }

    #[tokio::test]
    async fn test_header_used_when_no_path_or_query() {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store, creds));
        let router = RequestRouter::new(pool);

        let mut headers = HeaderMap::new();
        headers.insert(CLUSTER_HEADER, HeaderValue::from_static("gpu-west"));

        let target = router.resolve(None, &empty_query(), &headers).await.unwrap();
        assert_eq!(target, RouteTarget::Cluster("gpu-west".to_string()));
    }

    #[tokio::test]
    async fn test_no_selector_no_clusters_fails() {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store, creds));
        let router = RequestRouter::new(pool);

        let err = router
            .resolve(None, &empty_query(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::NoClustersRegistered));
    }
}
