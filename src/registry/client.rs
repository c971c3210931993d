//! Cluster Client - the live Pool-owned connection object for one cluster
//!
//! Wraps a typed `kube::Client`, a REST `kube::Config`, and per-cluster
//! health fields. The "dynamic (schema-less) client" in the data model is
//! the same `kube::Client` paired with `kube::discovery` at call time to
//! resolve an `ApiResource`/`Api<DynamicObject>` for an arbitrary GVK. This
//! mirrors the client-construction shape of the reference multi-cluster
//! orchestrator (`Config::from_kubeconfig` + `Client::try_from`), which is
//! the only example in this pack that talks to a real Kubernetes API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::{Client, Config};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to parse kubeconfig: {0}")]
    InvalidKubeconfig(String),
    #[error("failed to build kubernetes client: {0}")]
    ClientBuild(String),
    #[error("failed to infer ambient credentials: {0}")]
    AmbientInference(String),
}

/// Health fields mutated under a lock; everything else on `ClusterClient` is
/// immutable for the object's lifetime (rebuild-and-swap, never in-place
/// mutation of the connection itself).
#[derive(Debug, Clone)]
pub struct ClientHealth {
    pub healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_known_good_at: Option<DateTime<Utc>>,
}

impl Default for ClientHealth {
    fn default() -> Self {
        Self {
            healthy: false,
            last_health_check: None,
            last_error: None,
            last_known_good_at: None,
        }
    }
}

/// Display metadata mirrored from the owning Registration. Mutated in place
/// by `ClientPool::sync` when only display name/region change — the
/// specification's step 5 ("metadata-only changes are applied in place
/// without rebuilding the client").
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub display_name: Option<String>,
    pub region: Option<String>,
}

/// The live object in the Pool wrapping one Kubernetes API connection.
/// Exclusively owned by the Client Pool.
pub struct ClusterClient {
    pub cluster_name: String,
    pub meta: RwLock<ClientMeta>,

    /// Typed client, also used as the base for dynamic (schema-less) access
    /// via `kube::discovery` at the call site.
    pub client: Client,
    pub rest_config: Config,

    /// Hash of the credential blob this client was built from; `None` for
    /// `isLocal` clients, which never rebuild on credential change.
    pub credential_hash: Option<String>,

    pub health: Arc<RwLock<ClientHealth>>,
}

impl ClusterClient {
    /// Build from a raw kubeconfig blob.
    pub async fn from_kubeconfig_bytes(
        cluster_name: &str,
        display_name: Option<String>,
        region: Option<String>,
        kubeconfig_bytes: &[u8],
        credential_hash: String,
    ) -> Result<Self, BuildError> {
        let text = String::from_utf8_lossy(kubeconfig_bytes);
        let kubeconfig = kube::config::Kubeconfig::from_yaml(&text)
            .map_err(|e| BuildError::InvalidKubeconfig(e.to_string()))?;
        let rest_config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| BuildError::InvalidKubeconfig(e.to_string()))?;
        let client = Client::try_from(rest_config.clone())
            .map_err(|e| BuildError::ClientBuild(e.to_string()))?;

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            meta: RwLock::new(ClientMeta { display_name, region }),
            client,
            rest_config,
            credential_hash: Some(credential_hash),
            health: Arc::new(RwLock::new(ClientHealth::default())),
        })
    }

    /// Build using the control plane's own ambient credentials
    /// (`isLocal=true`). Never rebuilds on a credential-hash change because
    /// there is no tracked credential reference.
    pub async fn from_ambient(
        cluster_name: &str,
        display_name: Option<String>,
        region: Option<String>,
    ) -> Result<Self, BuildError> {
        let rest_config = Config::infer()
            .await
            .map_err(|e| BuildError::AmbientInference(e.to_string()))?;
        let client = Client::try_from(rest_config.clone())
            .map_err(|e| BuildError::ClientBuild(e.to_string()))?;

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            meta: RwLock::new(ClientMeta { display_name, region }),
            client,
            rest_config,
            credential_hash: None,
            health: Arc::new(RwLock::new(ClientHealth::default())),
        })
    }

    /// Apply a metadata-only update (display name, region) in place,
    /// without rebuilding the underlying connection.
    pub async fn update_meta(&self, display_name: Option<String>, region: Option<String>) {
        let mut meta = self.meta.write().await;
        meta.display_name = display_name;
        meta.region = region;
    }

    pub async fn snapshot_meta(&self) -> ClientMeta {
        self.meta.read().await.clone()
    }

    pub async fn mark_healthy(&self) {
        let mut health = self.health.write().await;
        let now = Utc::now();
        health.healthy = true;
        health.last_health_check = Some(now);
        health.last_known_good_at = Some(now);
        health.last_error = None;
    }

    pub async fn mark_unhealthy(&self, error: impl Into<String>) {
        let mut health = self.health.write().await;
        health.healthy = false;
        health.last_health_check = Some(Utc::now());
        health.last_error = Some(error.into());
    }

    pub async fn snapshot_health(&self) -> ClientHealth {
        self.health.read().await.clone()
    }
}
