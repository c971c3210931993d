//! Credential store - the secondary secret space a Registration references
//!
//! A Registration never embeds credential bytes; it carries a `credential_ref`
//! name that is looked up here at Sync time. Sources are env-file, env-var, or
//! Vault, loaded into a flat `DashMap` of whole opaque blobs (kubeconfig-shaped
//! YAML in the common case), each with a content hash computed at read time so
//! the Pool can detect rotation without relying on the backing store to expose
//! one itself.

use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),
    #[error("failed to read credential file: {0}")]
    ReadError(String),
    #[error("environment variable not set: {0}")]
    EnvVarNotFound(String),
}

/// Where a named credential blob's bytes come from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum CredentialSource {
    /// Read the raw blob from a file on disk (tilde-expanded).
    File { path: String },
    /// Read the raw blob from an environment variable.
    Env { variable: String },
    /// Literal bytes, supplied inline (e.g. from the `POST /clusters` body).
    Inline { blob: Vec<u8> },
}

/// A resolved credential blob: its bytes plus a content hash computed at
/// read time. The hash, not byte-equality, is what the Pool compares.
#[derive(Debug, Clone)]
pub struct CredentialBlob {
    pub bytes: Vec<u8>,
    pub content_hash: String,
}

/// Compute the rotation-detection hash of a credential blob's raw bytes.
pub fn hash_credential_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Named store of credential blobs, keyed by the name a Registration's
/// `credential_ref` points at.
pub struct CredentialStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }

    /// Register/replace a named credential blob from one source.
    pub async fn load(&self, name: &str, source: &CredentialSource) -> Result<(), CredentialError> {
        let bytes = match source {
            CredentialSource::File { path } => {
                let expanded = shellexpand::tilde(path);
                tokio::fs::read(Path::new(expanded.as_ref()))
                    .await
                    .map_err(|e| CredentialError::ReadError(format!("{}: {}", path, e)))?
            }
            CredentialSource::Env { variable } => std::env::var(variable)
                .map_err(|_| CredentialError::EnvVarNotFound(variable.clone()))?
                .into_bytes(),
            CredentialSource::Inline { blob } => blob.clone(),
        };

        self.blobs.insert(name.to_string(), bytes);
        Ok(())
    }

    /// Store a raw blob directly (e.g. decoded from a base64 body field).
    pub fn put_inline(&self, name: &str, bytes: Vec<u8>) {
        self.blobs.insert(name.to_string(), bytes);
    }

    /// Resolve a named blob, computing its content hash at read time.
    pub fn resolve(&self, name: &str) -> Result<CredentialBlob, CredentialError> {
        let bytes = self
            .blobs
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;
        let content_hash = hash_credential_bytes(&bytes);
        Ok(CredentialBlob { bytes, content_hash })
    }

    pub fn remove(&self, name: &str) {
        self.blobs.remove(name);
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = hash_credential_bytes(b"hello");
        let b = hash_credential_bytes(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = hash_credential_bytes(b"hello");
        let b = hash_credential_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn test_put_inline_and_resolve() {
        let store = CredentialStore::new();
        store.put_inline("gpu-east-kc", b"kubeconfig-bytes".to_vec());
        let blob = store.resolve("gpu-east-kc").unwrap();
        assert_eq!(blob.bytes, b"kubeconfig-bytes");
    }

    #[test]
    fn test_resolve_missing_fails() {
        let store = CredentialStore::new();
        assert!(matches!(store.resolve("missing"), Err(CredentialError::NotFound(_))));
    }

    #[test]
    fn test_rotation_changes_hash() {
        let store = CredentialStore::new();
        store.put_inline("prod", b"v1".to_vec());
        let before = store.resolve("prod").unwrap();
        store.put_inline("prod", b"v2".to_vec());
        let after = store.resolve("prod").unwrap();
        assert_ne!(before.content_hash, after.content_hash);
    }

    #[tokio::test]
    async fn test_load_from_env() {
        std::env::set_var("TEST_CRED_VAR", "super-secret-kubeconfig");
        let store = CredentialStore::new();
        store
            .load("from-env", &CredentialSource::Env {
                variable: "TEST_CRED_VAR".to_string(),
            })
            .await
            .unwrap();
        let blob = store.resolve("from-env").unwrap();
        assert_eq!(blob.bytes, b"super-secret-kubeconfig");
        std::env::remove_var("TEST_CRED_VAR");
    }
}
