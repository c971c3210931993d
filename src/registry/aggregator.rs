//! Global Aggregator - fans a single logical query out across every cluster
//!
//! Takes a `Pool.List()` snapshot so a cluster registered mid-query is
//! simply absent from this round; each worker still does its own
//! `Pool.Get` so a breaker that trips between the snapshot and the worker
//! running is honored per-worker rather than baked into the snapshot.
//! Bounded by a semaphore the same way the Health Checker is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;

use super::client::ClusterClient;
use super::pool::ClientPool;

pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 16;

/// One cluster's contribution to an aggregate result: its whole payload for
/// this query, tagged with the cluster identity so the UI can attribute it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateItem<T> {
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_region: Option<String>,
    pub payload: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult<T> {
    pub items: Vec<AggregateItem<T>>,
    pub queried_clusters: Vec<String>,
    pub failed_clusters: Vec<FailedCluster>,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCluster {
    pub cluster_name: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_good_at: Option<DateTime<Utc>>,
}

pub struct AggregatorConfig {
    pub query_deadline: Duration,
    pub max_concurrent_queries: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            query_deadline: DEFAULT_QUERY_DEADLINE,
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
        }
    }
}

fn pool_last_known_good(err: &super::error::PoolError) -> Option<DateTime<Utc>> {
    match err {
        super::error::PoolError::Unhealthy {
            last_known_good_at, ..
        } => *last_known_good_at,
        _ => None,
    }
}

pub struct GlobalAggregator {
    pool: Arc<ClientPool>,
    config: AggregatorConfig,
}

impl GlobalAggregator {
    pub fn new(pool: Arc<ClientPool>, config: AggregatorConfig) -> Self {
        Self { pool, config }
    }

    /// Run `op` against every registered cluster, bounded by the semaphore
    /// and an overall deadline, and merge the per-cluster payloads.
    ///
    /// `op` is given the cluster's live client and returns that cluster's
    /// whole payload for this query; it is wrapped with the cluster's name
    /// and region into one `AggregateItem`. A breaker-open or erroring
    /// cluster contributes no item and is recorded in `failed_clusters`
    /// instead, so `queried_clusters.len() == items.len() +
    /// failed_clusters.len()` always holds.
    pub async fn query<T, F, Fut>(&self, op: F) -> AggregateResult<T>
    where
        T: Send + 'static,
        F: Fn(Arc<ClusterClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send,
    {
        let names = self.pool.names().await;
        let op = Arc::new(op);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_queries.max(1)));
        let deadline = self.config.query_deadline;

        let mut handles = Vec::with_capacity(names.len());
        for name in &names {
            let name = name.clone();
            let pool = self.pool.clone();
            let op = op.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                let outcome = tokio::time::timeout(deadline, async {
                    let (client, breaker, permit) = pool
                        .get(&name)
                        .await
                        .map_err(|e| (e.to_string(), pool_last_known_good(&e)))?;
                    let region = client.snapshot_meta().await.region;
                    match op(client).await {
                        Ok(payload) => {
                            breaker.record_success(permit).await;
                            Ok((region, payload))
                        }
                        Err(e) => {
                            breaker.record_failure(permit).await;
                            let last_known_good = pool.last_known_good_at(&name).await;
                            Err((e, last_known_good))
                        }
                    }
                })
                .await;

                match outcome {
                    Ok(Ok((region, payload))) => (name, Ok((region, payload))),
                    Ok(Err((reason, last_known_good_at))) => (name, Err((reason, last_known_good_at))),
                    Err(_) => (name, Err(("query deadline exceeded".to_string(), None))),
                }
            }));
        }

        let mut items = Vec::new();
        let mut queried_clusters = Vec::new();
        let mut failed_clusters = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((name, Ok((region, payload)))) => {
                    queried_clusters.push(name.clone());
                    items.push(AggregateItem {
                        cluster_name: name,
                        cluster_region: region,
                        payload,
                    });
                }
                Ok((name, Err((error, last_known_good_at)))) => {
                    queried_clusters.push(name.clone());
                    failed_clusters.push(FailedCluster {
                        cluster_name: name,
                        error,
                        last_known_good_at,
                    });
                }
                Err(_join_err) => {
                    // The spawned task panicked; treat as an unnamed failure
                    // rather than letting one worker crash the whole query.
                }
            }
        }

        AggregateResult {
            complete: failed_clusters.is_empty(),
            items,
            queried_clusters,
            failed_clusters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::credentials::{CredentialSource, CredentialStore};
    use crate::registry::registration::Registration;
    use crate::registry::store::RegistrationStore;

    const FAKE_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
  name: fake
contexts:
- context:
    cluster: fake
    user: fake
  name: fake
current-context: fake
users:
- name: fake
  user:
    token: fake-token
"#;

    fn make_registration(name: &str, cred_ref: &str) -> Registration {
        Registration {
            name: name.to_string(),
            display_name: None,
            region: None,
            environment: None,
            labels: Default::default(),
            credential_ref: Some(cred_ref.to_string()),
            is_local: false,
            heartbeat_interval_override: None,
            telemetry_forward_endpoint: None,
            capability_hint: None,
        }
    }

    async fn make_pool_with_clusters(names: &[&str]) -> Arc<ClientPool> {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store.clone(), creds.clone()));
        for name in names {
            let cred = format!("{}-kc", name);
            creds
                .load(
                    &cred,
                    &CredentialSource::Inline {
                        blob: FAKE_KUBECONFIG.as_bytes().to_vec(),
                    },
                )
                .await
                .unwrap();
            store.create(make_registration(name, &cred)).unwrap();
        }
        pool.sync().await;
        pool
    }

    #[tokio::test]
    async fn test_query_merges_items_across_clusters() {
        let pool = make_pool_with_clusters(&["a", "b"]).await;
        let aggregator = GlobalAggregator::new(pool, AggregatorConfig::default());

        let result: AggregateResult<String> = aggregator
            .query(|client| async move { Ok(format!("{}-item", client.cluster_name)) })
            .await;

        assert_eq!(result.items.len(), 2);
        assert!(result.complete);
        assert!(result.failed_clusters.is_empty());
        assert_eq!(result.queried_clusters.len(), 2);
        assert_eq!(result.queried_clusters.len(), result.items.len() + result.failed_clusters.len());
    }

    #[tokio::test]
    async fn test_query_records_per_cluster_failure() {
        let pool = make_pool_with_clusters(&["a", "b"]).await;
        let aggregator = GlobalAggregator::new(pool, AggregatorConfig::default());

        let result: AggregateResult<String> = aggregator
            .query(|client| async move {
                if client.cluster_name == "a" {
                    Err("boom".to_string())
                } else {
                    Ok("ok".to_string())
                }
            })
            .await;

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.failed_clusters.len(), 1);
        assert_eq!(result.failed_clusters[0].cluster_name, "a");
        assert!(!result.complete);
        assert_eq!(result.queried_clusters.len(), result.items.len() + result.failed_clusters.len());
    }

    #[tokio::test]
    async fn test_query_empty_pool_returns_complete_empty_result() {
        let pool = make_pool_with_clusters(&[]).await;
        let aggregator = GlobalAggregator::new(pool, AggregatorConfig::default());

        let result: AggregateResult<String> =
            aggregator.query(|_client| async move { Ok(String::new()) }).await;

        assert!(result.items.is_empty());
        assert!(result.complete);
        assert!(result.queried_clusters.is_empty());
    }

    #[tokio::test]
    async fn test_query_wraps_payload_with_cluster_identity() {
        let pool = make_pool_with_clusters(&["a"]).await;
        let aggregator = GlobalAggregator::new(pool, AggregatorConfig::default());

        let result: AggregateResult<String> =
            aggregator.query(|_client| async move { Ok("payload".to_string()) }).await;

        assert_eq!(result.items[0].cluster_name, "a");
        assert_eq!(result.items[0].payload, "payload");
    }
}
