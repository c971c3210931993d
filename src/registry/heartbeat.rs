//! Heartbeat Ingester - accepts periodic liveness reports pushed by agents
//!
//! A heartbeat is the agent's side of the health picture: the Health Checker
//! probes outward from the control plane, this accepts what the managed
//! cluster volunteers about itself. Both write disjoint fields on the same
//! `RegistrationStatus` via `RegistrationStore::update_status`.

use std::sync::Arc;

use serde::Deserialize;

use super::error::HeartbeatError;
use super::registration::Phase;
use super::store::RegistrationStore;

/// Hard cap on a heartbeat body, enforced before JSON parsing.
pub const MAX_HEARTBEAT_BODY_BYTES: usize = 64 * 1024;

/// The control plane's own version, compared against an agent's reported
/// version to detect skew. Not a Cargo/crate version: the product version
/// this control plane implements.
pub const CONTROL_PLANE_PRODUCT_VERSION: &str = "1.4.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub cluster_name: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub agent_installed: bool,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub product_version: Option<String>,
    #[serde(default)]
    pub product_edition: Option<String>,
    /// Self-reported health of the agent's in-cluster operator; degrades the
    /// phase to `Degraded` rather than `Ready` when false.
    #[serde(default = "default_operator_healthy")]
    pub operator_healthy: bool,
    #[serde(default)]
    pub resource_counts: std::collections::HashMap<String, i64>,
    #[serde(default)]
    pub capacity: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_operator_healthy() -> bool {
    true
}

pub struct HeartbeatIngester {
    store: Arc<RegistrationStore>,
}

impl HeartbeatIngester {
    pub fn new(store: Arc<RegistrationStore>) -> Self {
        Self { store }
    }

    /// Validate body size before the caller even deserializes it.
    pub fn check_body_size(raw_len: usize) -> Result<(), HeartbeatError> {
        if raw_len > MAX_HEARTBEAT_BODY_BYTES {
            return Err(HeartbeatError::PayloadTooLarge);
        }
        Ok(())
    }

    /// Ingest one heartbeat: validate the path name matches the body's own
    /// claim, check the per-registration auth token (if one was configured),
    /// then atomically update the status mirror.
    pub fn ingest(
        &self,
        path_cluster_name: &str,
        expected_token: Option<&str>,
        payload: HeartbeatPayload,
    ) -> Result<(), HeartbeatError> {
        if payload.cluster_name != path_cluster_name {
            return Err(HeartbeatError::BadRequest(format!(
                "path cluster '{}' does not match body cluster '{}'",
                path_cluster_name, payload.cluster_name
            )));
        }

        if let Some(expected) = expected_token {
            match &payload.auth_token {
                Some(given) if given == expected => {}
                _ => return Err(HeartbeatError::Unauthorized),
            }
        }

        let skew = payload
            .agent_version
            .as_deref()
            .and_then(|v| detect_version_skew(CONTROL_PLANE_PRODUCT_VERSION, v));

        let now = chrono::Utc::now();
        self.store
            .update_status(path_cluster_name, |status| {
                status.phase = if payload.operator_healthy {
                    Phase::Ready
                } else {
                    Phase::Degraded
                };
                status.last_heartbeat = Some(now);
                status.last_connected_at = Some(now);
                status.agent_installed = payload.agent_installed;
                status.agent_version = payload.agent_version.clone();
                if payload.platform_version.is_some() {
                    status.platform_version = payload.platform_version.clone();
                }
                if payload.product_version.is_some() {
                    status.product_version = payload.product_version.clone();
                }
                if payload.product_edition.is_some() {
                    status.product_edition = payload.product_edition.clone();
                }
                status.resource_counts = payload.resource_counts.clone();
                status.capacity = payload.capacity.clone();
                status.version_skew = skew.clone();
            })
            .map_err(|e| HeartbeatError::NotFound(e.to_string()))?;

        Ok(())
    }
}

/// Parse a `major.minor[.patch]` version string into `(major, minor)`.
fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Skew is flagged when the agent's major differs, or its minor is newer
/// than the control plane's own. An older minor on a matching major is
/// normal during a staged rollout and is not flagged.
fn detect_version_skew(control_plane_version: &str, agent_version: &str) -> Option<String> {
    let (cp_major, cp_minor) = parse_major_minor(control_plane_version)?;
    let (agent_major, agent_minor) = parse_major_minor(agent_version)?;

    if agent_major != cp_major || agent_minor > cp_minor {
        Some(format!(
            "agent version {} diverges from control plane version {}",
            agent_version, control_plane_version
        ))
    } else {
        None
    }
}
