//! Health Checker - background prober that verifies cluster reachability
//!
//! Runs a single scheduler loop on a tick interval, dispatching per-cluster
//! probes with bounded concurrency via a semaphore, capping how many probes
//! run in flight at once instead of firing every cluster's check at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::pool::ClientPool;
use super::registration::Phase;
use super::store::RegistrationStore;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 10;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct HealthCheckerConfig {
    pub tick_interval: Duration,
    pub max_concurrent_checks: usize,
    pub probe_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Outcome of the per-cluster check sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// All steps passed.
    Ready,
    /// Reachable, but not every step passed (e.g. product probe failed).
    Degraded(String),
    /// Not reachable at all.
    Unreachable(String),
}

pub struct HealthChecker {
    store: Arc<RegistrationStore>,
    pool: Arc<ClientPool>,
    config: HealthCheckerConfig,
}

impl HealthChecker {
    pub fn new(store: Arc<RegistrationStore>, pool: Arc<ClientPool>, config: HealthCheckerConfig) -> Self {
        Self { store, pool, config }
    }

    /// Run the scheduler loop until `cancel` fires. Partial ticks may be
    /// interrupted; the loop itself never suspends indefinitely.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("health checker shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick(cancel.clone()).await;
                }
            }
        }
    }

    /// Run exactly one tick: snapshot the pool, probe each cluster with
    /// bounded concurrency, and feed outcomes back into the Pool and Store.
    pub async fn tick(&self, cancel: CancellationToken) {
        let clients = self.pool.list().await;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1)));

        let mut handles = Vec::with_capacity(clients.len());
        for client in clients {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let pool = self.pool.clone();
            let timeout = self.config.probe_timeout;
            let heartbeat_interval = self.config.heartbeat_interval;
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }

                let outcome = probe_cluster(&client.client, timeout).await;
                apply_outcome(&store, &pool, &client.cluster_name, outcome, heartbeat_interval).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Platform API version discovery defines "reachable". A product-specific
/// probe (omitted here; this control plane is generic over whatever CRDs the
/// deployment defines) would define "product installed". Agent presence,
/// resource counts, and metrics are populated by the heartbeat ingester
/// instead: the two sources write disjoint status field sets.
async fn probe_cluster(client: &kube::Client, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, client.apiserver_version()).await {
        Ok(Ok(_version)) => ProbeOutcome::Ready,
        Ok(Err(e)) => ProbeOutcome::Unreachable(e.to_string()),
        Err(_) => ProbeOutcome::Unreachable("probe timed out".to_string()),
    }
}

async fn apply_outcome(
    store: &RegistrationStore,
    pool: &ClientPool,
    cluster_name: &str,
    outcome: ProbeOutcome,
    heartbeat_interval: Duration,
) {
    match outcome {
        ProbeOutcome::Ready => {
            pool.report_probe_outcome(cluster_name, true, None).await;
            let _ = store.update_status(cluster_name, |s| {
                s.phase = Phase::Ready;
                s.last_connected_at = Some(chrono::Utc::now());
                s.last_error = None;
            });
        }
        ProbeOutcome::Degraded(reason) => {
            pool.report_probe_outcome(cluster_name, true, None).await;
            let _ = store.update_status(cluster_name, |s| {
                s.phase = Phase::Degraded;
                s.last_error = Some(reason);
            });
        }
        ProbeOutcome::Unreachable(reason) => {
            pool.report_probe_outcome(cluster_name, false, Some(reason.clone())).await;

            let suppress = store
                .get(cluster_name)
                .ok()
                .and_then(|r| r.status.last_heartbeat)
                .map(|last| {
                    chrono::Utc::now().signed_duration_since(last)
                        < chrono::Duration::from_std(heartbeat_interval * 2).unwrap_or_default()
                })
                .unwrap_or(false);

            if !suppress {
                let _ = store.update_status(cluster_name, |s| {
                    s.phase = Phase::Unreachable;
                    s.last_error = Some(reason);
                });
            }
        }
    }
}
