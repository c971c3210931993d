//! Registration-seed file loading
//!
//! A pure parse function plus a thin I/O wrapper, so the `validate-config`
//! CLI subcommand can exercise the parse path without touching the filesystem.
//! A seed file is how an operator bootstraps a control plane with a known set of
//! clusters instead of registering each one by hand via `POST /clusters`.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::credentials::CredentialSource;
use crate::registry::registration::{validate_cluster_name, Registration};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read seed file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse seed file: {0}")]
    Parse(String),
    #[error("seed entry '{0}' is invalid: {1}")]
    InvalidEntry(String, String),
}

/// One entry in a registration-seed file: a Registration plus where to load
/// its credential blob from, if it isn't `isLocal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEntry {
    #[serde(flatten)]
    pub registration: Registration,
    #[serde(default)]
    pub credential_source: Option<CredentialSource>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    #[serde(default)]
    pub clusters: Vec<SeedEntry>,
}

// ============================================================================
// SBIO: pure parse/validate (no I/O)
// ============================================================================

/// Parse a seed file body. Accepts YAML, which is a superset of JSON, so
/// both `.yaml` and `.json` seed files go through the same path.
pub fn parse_seed_file(content: &str) -> Result<SeedFile, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Validate every entry of a parsed seed file: cluster name shape, at most
/// one `isLocal`, and a non-local entry must name a credential source.
pub fn validate_seed_file(seed: &SeedFile) -> Result<(), ConfigError> {
    let mut local_count = 0;
    for entry in &seed.clusters {
        validate_cluster_name(&entry.registration.name)
            .map_err(|e| ConfigError::InvalidEntry(entry.registration.name.clone(), e))?;

        if entry.registration.is_local {
            local_count += 1;
        } else if entry.credential_source.is_none() {
            return Err(ConfigError::InvalidEntry(
                entry.registration.name.clone(),
                "non-local cluster must set credentialSource".to_string(),
            ));
        }
    }
    if local_count > 1 {
        return Err(ConfigError::InvalidEntry(
            "<seed file>".to_string(),
            "at most one cluster may set isLocal=true".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Load and validate a seed file from disk.
pub async fn load_seed_file(path: &Path) -> Result<SeedFile, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
    let seed = parse_seed_file(&content)?;
    validate_seed_file(&seed)?;
    Ok(seed)
}

/// Default config directory, `~/.cluster-gateway-console`.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".cluster-gateway-console")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_seed_file() {
        let seed = parse_seed_file("clusters: []").unwrap();
        assert!(seed.clusters.is_empty());
    }

    #[test]
    fn test_parse_local_and_remote_entries() {
        let yaml = r#"
clusters:
  - name: local
    isLocal: true
  - name: gpu-east
    credentialSource:
      source: env
      variable: GPU_EAST_KUBECONFIG
"#;
        let seed = parse_seed_file(yaml).unwrap();
        assert_eq!(seed.clusters.len(), 2);
        assert!(seed.clusters[0].registration.is_local);
        assert!(matches!(
            seed.clusters[1].credential_source,
            Some(CredentialSource::Env { .. })
        ));
        assert!(validate_seed_file(&seed).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credential_source() {
        let yaml = r#"
clusters:
  - name: gpu-east
"#;
        let seed = parse_seed_file(yaml).unwrap();
        assert!(validate_seed_file(&seed).is_err());
    }

    #[test]
    fn test_validate_rejects_two_local_entries() {
        let yaml = r#"
clusters:
  - name: a
    isLocal: true
  - name: b
    isLocal: true
"#;
        let seed = parse_seed_file(yaml).unwrap();
        assert!(validate_seed_file(&seed).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let yaml = r#"
clusters:
  - name: Bad-Name
    isLocal: true
"#;
        let seed = parse_seed_file(yaml).unwrap();
        assert!(validate_seed_file(&seed).is_err());
    }

    #[tokio::test]
    async fn test_load_seed_file_reads_and_validates() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clusters:\n  - name: local\n    isLocal: true").unwrap();

        let seed = load_seed_file(file.path()).await.unwrap();
        assert_eq!(seed.clusters.len(), 1);
        assert_eq!(seed.clusters[0].registration.name, "local");
    }

    #[tokio::test]
    async fn test_load_seed_file_missing_path() {
        let result = load_seed_file(Path::new("/nonexistent/seed.yaml")).await;
        assert!(matches!(result, Err(ConfigError::Read(_, _))));
    }
}
