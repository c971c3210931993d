//! Client Pool - owns one ready-to-use Cluster Client per registered cluster
//!
//! `Sync` reconciles the in-memory client set against the Registration
//! Store. A single reader-writer lock guards the name→entry map; client
//! builds (which may do I/O) happen outside the lock, and the swap-in is
//! atomic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use super::breaker::{BreakerState, CircuitBreaker, Permit};
use super::client::{BuildError, ClusterClient};
use super::credentials::CredentialStore;
use super::error::PoolError;
use super::registration::{Phase, Registration};
use super::store::RegistrationStore;

/// One pool-resident cluster: its client plus the breaker guarding it.
pub struct PoolEntry {
    pub client: Arc<ClusterClient>,
    pub breaker: Arc<CircuitBreaker>,
}

pub struct ClientPool {
    entries: RwLock<HashMap<String, PoolEntry>>,
    store: Arc<RegistrationStore>,
    credentials: Arc<CredentialStore>,
    /// Serializes `Sync` calls so one completes before another begins.
    sync_lock: tokio::sync::Mutex<()>,
}

impl ClientPool {
    pub fn new(store: Arc<RegistrationStore>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            credentials,
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reconcile the pool against `RegistrationStore.List()`. Idempotent.
    pub async fn sync(&self) {
        let _guard = self.sync_lock.lock().await;

        let registrations = self.store.list();
        let current_names: Vec<String> = {
            let entries = self.entries.read().await;
            entries.keys().cloned().collect()
        };
        let desired_names: std::collections::HashSet<String> = registrations
            .iter()
            .map(|r| r.registration.name.clone())
            .collect();

        // Step 3: remove entries whose Registration disappeared.
        for name in &current_names {
            if !desired_names.contains(name) {
                self.entries.write().await.remove(name);
            }
        }

        for record in &registrations {
            let reg = &record.registration;
            let existing_hash = {
                let entries = self.entries.read().await;
                entries.get(&reg.name).and_then(|e| e.client.credential_hash.clone())
            };

            let needs_build = match (&reg.is_local, &existing_hash) {
                (true, _) => !self.entries.read().await.contains_key(&reg.name),
                (false, None) => true, // never built, or previously ambient
                (false, Some(hash)) => {
                    match self.resolve_hash(reg) {
                        Some(new_hash) => new_hash != *hash,
                        None => false,
                    }
                }
            };

            if !needs_build {
                // Step 5: metadata-only changes (display name, region) are
                // applied in place without rebuilding the client.
                let entries = self.entries.read().await;
                if let Some(entry) = entries.get(&reg.name) {
                    entry
                        .client
                        .update_meta(reg.display_name.clone(), reg.region.clone())
                        .await;
                }
                continue;
            }

            let _ = self.store.update_status(&reg.name, |s| {
                s.phase = Phase::Connecting;
            });

            match self.build_client(reg).await {
                Ok(client) => {
                    let entry = PoolEntry {
                        client: Arc::new(client),
                        breaker: Arc::new(CircuitBreaker::default()),
                    };
                    self.entries.write().await.insert(reg.name.clone(), entry);
                }
                Err(e) => {
                    let _ = self.store.update_status(&reg.name, |s| {
                        s.phase = Phase::Error;
                        s.last_error = Some(e.to_string());
                    });
                }
            }
        }
    }

    fn resolve_hash(&self, reg: &Registration) -> Option<String> {
        reg.credential_ref
            .as_ref()
            .and_then(|name| self.credentials.resolve(name).ok())
            .map(|blob| blob.content_hash)
    }

    async fn build_client(&self, reg: &Registration) -> Result<ClusterClient, BuildError> {
        if reg.is_local {
            return ClusterClient::from_ambient(
                &reg.name,
                reg.display_name.clone(),
                reg.region.clone(),
            )
            .await;
        }

        let cred_name = reg.credential_ref.clone().ok_or_else(|| {
            BuildError::InvalidKubeconfig("registration has no credential_ref".to_string())
        })?;
        let blob = self.credentials.resolve(&cred_name).map_err(|e| {
            BuildError::InvalidKubeconfig(format!("credential '{}': {}", cred_name, e))
        })?;

        ClusterClient::from_kubeconfig_bytes(
            &reg.name,
            reg.display_name.clone(),
            reg.region.clone(),
            &blob.bytes,
            blob.content_hash,
        )
        .await
    }

    /// Returns the client if present AND the breaker permits a call. The
    /// returned `Permit` is the one and only permit `allow()` grants for
    /// this call; the caller MUST feed its outcome back via
    /// `breaker.record_success`/`record_failure` rather than calling
    /// `allow()` again; a second `allow()` would either hand out a separate
    /// (incorrect) `Closed` permit or, worse, find the breaker still
    /// `HalfOpen` with the real probe permit never resolved and wedge it
    /// there forever.
    pub async fn get(&self, name: &str) -> Result<(Arc<ClusterClient>, Arc<CircuitBreaker>, Permit), PoolError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| PoolError::NotRegistered(name.to_string()))?;

        let Some(permit) = entry.breaker.allow().await else {
            let health = entry.client.snapshot_health().await;
            return Err(PoolError::Unhealthy {
                name: name.to_string(),
                last_error: health.last_error,
                last_known_good_at: health.last_known_good_at,
            });
        };

        Ok((entry.client.clone(), entry.breaker.clone(), permit))
    }

    /// Snapshot of every pool-resident client, regardless of breaker state.
    /// Used by fan-out consumers, which make their own per-cluster Get calls.
    pub async fn list(&self) -> Vec<Arc<ClusterClient>> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.client.clone())
            .collect()
    }

    /// Names of clusters whose breaker is currently Closed or HalfOpen.
    pub async fn names(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names = Vec::with_capacity(entries.len());
        for (name, entry) in entries.iter() {
            if entry.breaker.state().await != BreakerState::Open {
                names.push(name.clone());
            }
        }
        names
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Touch the Pool's health view for a cluster and feed the breaker, used
    /// by the Health Checker after each probe.
    pub async fn report_probe_outcome(&self, name: &str, success: bool, error: Option<String>) {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(name) else {
            return;
        };

        if let Some(permit) = entry.breaker.allow().await {
            if success {
                entry.breaker.record_success(permit).await;
            } else {
                entry.breaker.record_failure(permit).await;
            }
        }

        if success {
            entry.client.mark_healthy().await;
        } else {
            entry
                .client
                .mark_unhealthy(error.unwrap_or_else(|| "probe failed".to_string()))
                .await;
        }
    }

    pub async fn last_known_good_at(&self, name: &str) -> Option<chrono::DateTime<Utc>> {
        let entries = self.entries.read().await;
        let entry = entries.get(name)?;
        entry.client.snapshot_health().await.last_known_good_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::credentials::CredentialSource;

    fn make_registration(name: &str, cred_ref: &str) -> Registration {
        Registration {
            name: name.to_string(),
            display_name: None,
            region: Some("us-east-1".to_string()),
            environment: Some("production".to_string()),
            labels: Default::default(),
            credential_ref: Some(cred_ref.to_string()),
            is_local: false,
            heartbeat_interval_override: None,
            telemetry_forward_endpoint: None,
            capability_hint: None,
        }
    }

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

    async fn make_pool() -> (Arc<RegistrationStore>, Arc<CredentialStore>, ClientPool) {
        let store = Arc::new(RegistrationStore::new());
        let creds = Arc::new(CredentialStore::new());
        let pool = ClientPool::new(store.clone(), creds.clone());
        (store, creds, pool)
    }

    #[tokio::test]
    async fn test_sync_builds_client_for_new_registration() {
        let (store, creds, pool) = make_pool().await;
        creds
            .load(
                "gpu-east-kc",
                &CredentialSource::Inline {
                    blob: FAKE_KUBECONFIG.as_bytes().to_vec(),
                },
            )
            .await
            .unwrap();
        store.create(make_registration("gpu-east", "gpu-east-kc")).unwrap();

        pool.sync().await;

        assert!(pool.contains("gpu-east").await);
        let (client, _breaker, _permit) = pool.get("gpu-east").await.unwrap();
        assert_eq!(client.cluster_name, "gpu-east");
    }

    #[tokio::test]
    async fn test_sync_removes_client_for_deleted_registration() {
        let (store, creds, pool) = make_pool().await;
        creds
            .load(
                "gpu-east-kc",
                &CredentialSource::Inline {
                    blob: FAKE_KUBECONFIG.as_bytes().to_vec(),
                },
            )
            .await
            .unwrap();
        store.create(make_registration("gpu-east", "gpu-east-kc")).unwrap();
        pool.sync().await;
        assert!(pool.contains("gpu-east").await);

        store.delete("gpu-east");
        pool.sync().await;
        assert!(!pool.contains("gpu-east").await);
    }

    #[tokio::test]
    async fn test_get_missing_returns_not_registered() {
        let (_store, _creds, pool) = make_pool().await;
        let err = pool.get("missing").await.unwrap_err();
        assert!(matches!(err, PoolError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_build_error_sets_status_error_and_no_client_retained() {
        let (store, _creds, pool) = make_pool().await;
        // credential_ref points at a name never loaded into the store.
        store.create(make_registration("gpu-east", "missing-cred")).unwrap();

        pool.sync().await;

        assert!(!pool.contains("gpu-east").await);
        let record = store.get("gpu-east").unwrap();
        assert_eq!(record.status.phase, Phase::Error);
        assert!(record.status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_credential_rotation_triggers_rebuild() {
        let (store, creds, pool) = make_pool().await;
        creds
            .load(
                "prod-kc",
                &CredentialSource::Inline {
                    blob: FAKE_KUBECONFIG.as_bytes().to_vec(),
                },
            )
            .await
            .unwrap();
        store.create(make_registration("prod", "prod-kc")).unwrap();
        pool.sync().await;

        let (old_client, _, _permit) = pool.get("prod").await.unwrap();
        let old_hash = old_client.credential_hash.clone();

        creds.put_inline("prod-kc", format!("{}\n# rotated", FAKE_KUBECONFIG).into_bytes());
        pool.sync().await;

        let (new_client, _, _permit) = pool.get("prod").await.unwrap();
        assert_ne!(old_client.credential_hash, new_client.credential_hash);
        assert_ne!(old_hash, new_client.credential_hash);
        // The old Arc is still valid; in-flight holders of `old_client` are unaffected.
        assert_eq!(old_client.cluster_name, "prod");
    }

    #[tokio::test]
    async fn test_metadata_only_change_updates_in_place_without_rebuild() {
        let (store, creds, pool) = make_pool().await;
        creds
            .load(
                "gpu-east-kc",
                &CredentialSource::Inline {
                    blob: FAKE_KUBECONFIG.as_bytes().to_vec(),
                },
            )
            .await
            .unwrap();
        store.create(make_registration("gpu-east", "gpu-east-kc")).unwrap();
        pool.sync().await;

        let (old_client, _, _permit) = pool.get("gpu-east").await.unwrap();
        let old_hash = old_client.credential_hash.clone();

        let mut updated = make_registration("gpu-east", "gpu-east-kc");
        updated.region = Some("us-west-2".to_string());
        updated.display_name = Some("GPU East (renamed)".to_string());
        store.update("gpu-east", updated, None).unwrap();
        pool.sync().await;

        let (new_client, _, _permit) = pool.get("gpu-east").await.unwrap();
        assert_eq!(new_client.credential_hash, old_hash);
        let meta = new_client.snapshot_meta().await;
        assert_eq!(meta.region.as_deref(), Some("us-west-2"));
        assert_eq!(meta.display_name.as_deref(), Some("GPU East (renamed)"));
    }

    // `is_local` builds against ambient credentials via `Config::infer()`,
    // which requires a real kubeconfig or in-cluster environment and so
    // cannot be exercised deterministically here; the rebuild-avoidance
    // branch (`needs_build` short-circuits on `is_local`) is covered by
    // inspection rather than by driving a real ambient build to success.
}
