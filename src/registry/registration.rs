//! Cluster Registration - the declarative record describing a managed cluster
//!
//! A Registration is the unit of administration for the control plane: it
//! names a remote cluster, points at a credential blob by reference, and
//! carries display metadata. The live Status mirror is a separate struct so
//! that spec edits and status writes never conflict with each other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length of a cluster name, per the DNS-subdomain rule.
pub const MAX_NAME_LEN: usize = 63;

/// Reserved cluster selector meaning "fan out to every registered cluster".
pub const ALL_CLUSTERS_SENTINEL: &str = "__all__";

/// A declarative record describing one managed cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// DNS-subdomain name, immutable after creation.
    pub name: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Name of the credential blob in the secondary credential store.
    /// Ignored when `is_local` is true.
    #[serde(default)]
    pub credential_ref: Option<String>,

    /// Use the control plane's own ambient credentials instead of a blob.
    #[serde(default)]
    pub is_local: bool,

    /// Per-cluster override of the default heartbeat interval (seconds).
    #[serde(default)]
    pub heartbeat_interval_override: Option<u64>,

    #[serde(default)]
    pub telemetry_forward_endpoint: Option<String>,

    /// Advertised feature set, e.g. "enterprise" or "oss". UI/pre-flight hint only.
    #[serde(default)]
    pub capability_hint: Option<String>,
}

/// Operational phase of a Registration, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Pending,
    Connecting,
    Ready,
    Degraded,
    Unreachable,
    Error,
}

/// Last observed operational facts for a Registration.
///
/// Written by both the Health Checker and the Heartbeat Ingester. Never
/// read-before-write by clients; it is a monotonically-updated mirror used
/// for UI display, not for correctness decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub phase: Phase,

    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub product_version: Option<String>,
    #[serde(default)]
    pub product_edition: Option<String>,

    #[serde(default)]
    pub agent_installed: bool,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resource_counts: HashMap<String, i64>,
    #[serde(default)]
    pub capacity: HashMap<String, Value>,

    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,

    /// Set when an agent's version diverges from the control plane's; does
    /// not cause heartbeat rejection.
    #[serde(default)]
    pub version_skew: Option<String>,
}

impl Default for RegistrationStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Pending,
            platform_version: None,
            product_version: None,
            product_edition: None,
            agent_installed: false,
            agent_version: None,
            last_heartbeat: None,
            resource_counts: HashMap::new(),
            capacity: HashMap::new(),
            last_connected_at: None,
            last_error: None,
            version_skew: None,
        }
    }
}

/// A Registration plus its Status, as kept in the store. `version` is bumped
/// on every spec or status write and backs optimistic-concurrency `Conflict`
/// detection on `Update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub registration: Registration,
    pub status: RegistrationStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Validate a cluster name against the DNS-subdomain rule: 1-63 chars,
/// lowercase alphanumeric and hyphen, anchored alphanumeric at both ends.
pub fn validate_cluster_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name must be 1-{} characters, got {}",
            MAX_NAME_LEN,
            name.len()
        ));
    }
    if name == ALL_CLUSTERS_SENTINEL {
        return Err(format!("name '{}' is reserved", ALL_CLUSTERS_SENTINEL));
    }
    let pattern = Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static regex");
    if !pattern.is_match(name) {
        return Err(format!(
            "name '{}' must be lowercase alphanumeric or '-', and start/end with alphanumeric",
            name
        ));
    }
    Ok(())
}

/// Whether a cluster selector refers to "every registered cluster".
pub fn is_all_clusters_selector(selector: &str) -> bool {
    selector == ALL_CLUSTERS_SENTINEL
}
