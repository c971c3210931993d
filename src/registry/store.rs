//! Registration Store - durable storage of Cluster Registrations
//!
//! This implementation backs the store with an in-process `DashMap`, one of
//! the backings the contract explicitly permits ("filesystem, control-plane-
//! local KV, ..."). Change notification is push-based: every mutating call
//! feeds a `tokio::sync::broadcast` channel that `watch()` subscribes to.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use super::error::StoreError;
use super::registration::{validate_cluster_name, Registration, RegistrationRecord, RegistrationStatus};

/// The kind of change a watch event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A single change notification emitted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub name: String,
}

const WATCH_CHANNEL_CAPACITY: usize = 256;

/// In-process, DashMap-backed Registration Store.
pub struct RegistrationStore {
    records: Arc<DashMap<String, RegistrationRecord>>,
    changes: broadcast::Sender<WatchEvent>,
}

impl RegistrationStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            records: Arc::new(DashMap::new()),
            changes,
        }
    }

    /// Stable snapshot of the current registration set.
    pub fn list(&self) -> Vec<RegistrationRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Result<RegistrationRecord, StoreError> {
        self.records
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn create(&self, registration: Registration) -> Result<RegistrationRecord, StoreError> {
        validate_cluster_name(&registration.name).map_err(StoreError::Invalid)?;

        if registration.is_local && self.has_local_registration() {
            return Err(StoreError::Invalid(
                "at most one registration may have isLocal=true".to_string(),
            ));
        }

        let name = registration.name.clone();
        let now = Utc::now();
        let record = RegistrationRecord {
            registration,
            status: RegistrationStatus::default(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        match self.records.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::AlreadyExists(name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.notify(WatchEventType::Added, &name);
                Ok(record)
            }
        }
    }

    /// Update the declarative spec. `expected_version`, if supplied, must
    /// match the stored version or the call fails with `Conflict`.
    pub fn update(
        &self,
        name: &str,
        registration: Registration,
        expected_version: Option<u64>,
    ) -> Result<RegistrationRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if let Some(expected) = expected_version {
            if entry.version != expected {
                return Err(StoreError::Conflict(name.to_string()));
            }
        }

        entry.registration = registration;
        entry.version += 1;
        entry.updated_at = Utc::now();
        let snapshot = entry.clone();
        drop(entry);
        self.notify(WatchEventType::Modified, name);
        Ok(snapshot)
    }

    /// Separate path for status writes; never conflicts with spec edits.
    pub fn update_status<F>(&self, name: &str, apply: F) -> Result<RegistrationRecord, StoreError>
    where
        F: FnOnce(&mut RegistrationStatus),
    {
        let mut entry = self
            .records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        apply(&mut entry.status);
        entry.updated_at = Utc::now();
        let snapshot = entry.clone();
        drop(entry);
        self.notify(WatchEventType::Modified, name);
        Ok(snapshot)
    }

    /// Idempotent: deleting an absent registration succeeds.
    pub fn delete(&self, name: &str) {
        if self.records.remove(name).is_some() {
            self.notify(WatchEventType::Deleted, name);
        }
    }

    fn has_local_registration(&self) -> bool {
        self.records.iter().any(|e| e.value().registration.is_local)
    }

    fn notify(&self, event_type: WatchEventType, name: &str) {
        // No receivers is not an error: Sync's watch loop may not have started yet.
        let _ = self.changes.send(WatchEvent {
            event_type,
            name: name.to_string(),
        });
    }

    /// A finite stream of change events. Ends only when the sender (the
    /// store itself) is dropped, or the caller stops polling it; a lagging
    /// watcher observes a dropped-messages gap and should fall back to
    /// `list()` to resynchronize.
    pub fn watch(&self) -> impl Stream<Item = Result<WatchEvent, BroadcastStreamRecvError>> {
        BroadcastStream::new(self.changes.subscribe())
    }
}

impl Default for RegistrationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registration(name: &str) -> Registration {
        Registration {
            name: name.to_string(),
            display_name: None,
            region: Some("us-east-1".to_string()),
            environment: Some("production".to_string()),
            labels: Default::default(),
            credential_ref: Some(format!("{}-kc", name)),
            is_local: false,
            heartbeat_interval_override: None,
            telemetry_forward_endpoint: None,
            capability_hint: None,
        }
    }

    #[test]
    fn test_create_then_get() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        let record = store.get("gpu-east").unwrap();
        assert_eq!(record.registration.name, "gpu-east");
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        let err = store.create(make_registration("gpu-east")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_create_invalid_name_fails() {
        let store = RegistrationStore::new();
        let err = store.create(make_registration("Gpu-East")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn test_get_missing_fails() {
        let store = RegistrationStore::new();
        assert!(matches!(store.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        store.delete("gpu-east");
        store.delete("gpu-east"); // does not panic or error
        assert!(store.get("gpu-east").is_err());
    }

    #[test]
    fn test_create_delete_create_has_no_ghost_status() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        store
            .update_status("gpu-east", |s| {
                s.phase = crate::registry::registration::Phase::Ready;
                s.agent_installed = true;
            })
            .unwrap();
        store.delete("gpu-east");

        store.create(make_registration("gpu-east")).unwrap();
        let record = store.get("gpu-east").unwrap();
        assert_eq!(record.status.phase, crate::registry::registration::Phase::Pending);
        assert!(!record.status.agent_installed);
    }

    #[test]
    fn test_update_status_is_noop_when_identical() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        let before = store.get("gpu-east").unwrap();

        let after = store
            .update_status("gpu-east", |s| {
                *s = before.status.clone();
            })
            .unwrap();

        assert_eq!(after.status.phase, before.status.phase);
        assert_eq!(after.status.agent_installed, before.status.agent_installed);
    }

    #[test]
    fn test_update_conflict_on_stale_version() {
        let store = RegistrationStore::new();
        store.create(make_registration("gpu-east")).unwrap();
        let err = store
            .update("gpu-east", make_registration("gpu-east"), Some(999))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_only_one_local_registration_allowed() {
        let store = RegistrationStore::new();
        let mut local_a = make_registration("a");
        local_a.is_local = true;
        store.create(local_a).unwrap();

        let mut local_b = make_registration("b");
        local_b.is_local = true;
        let err = store.create(local_b).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
