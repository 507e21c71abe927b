//! Append-only versioned model store on local disk.
//!
//! One subtree per version: `model.json` (parameters), `scaler.json`
//! (standardization), `metadata.json` (state), `manifest.json` (hashes).
//! The `ACTIVE.json` pointer at the root names the active version and the
//! previous one kept for rollback; it is replaced by tmp+rename so a crash
//! never leaves a torn pointer. Version subtrees are never deleted on
//! supersede.

use super::transport::sha256_hex;
use super::{LifecycleError, ModelState};
use crate::scoring::ModelVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
const POINTER_FILE: &str = "ACTIVE.json";

/// Hash-covered artifact files. Metadata is excluded: state transitions
/// rewrite it after the manifest exists, so hashing it would invalidate
/// every activated version.
pub const ARTIFACT_FILES: [&str; 2] = [MODEL_FILE, SCALER_FILE];

/// Model parameters without the scaler.
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    version_id: String,
    trained_at: DateTime<Utc>,
    feature_names: Vec<String>,
    threshold: f64,
    score_percentile: f64,
    score_std: f64,
    delta_low: f64,
    delta_high: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScalerArtifact {
    means: Vec<f64>,
    stds: Vec<f64>,
}

/// Per-version lifecycle state and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version_id: String,
    pub state: ModelState,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub holdout_count: usize,
}

/// Written at validation time; verified before any activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub model_version_id: String,
    pub file_hashes: BTreeMap<String, String>,
    pub deployed_at: DateTime<Utc>,
    pub validation_result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePointer {
    pub active: String,
    pub previous: Option<String>,
}

pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn version_dir(&self, version_id: &str) -> PathBuf {
        self.root.join(version_id)
    }

    /// Persist a freshly trained candidate (model, scaler, metadata).
    pub fn write_candidate(
        &self,
        model: &ModelVersion,
        metadata: &VersionMetadata,
    ) -> Result<(), LifecycleError> {
        let dir = self.version_dir(&model.version_id);
        fs::create_dir_all(&dir)?;

        let artifact = ModelArtifact {
            version_id: model.version_id.clone(),
            trained_at: model.trained_at,
            feature_names: model.feature_names.clone(),
            threshold: model.threshold,
            score_percentile: model.score_percentile,
            score_std: model.score_std,
            delta_low: model.delta_low,
            delta_high: model.delta_high,
        };
        let scaler = ScalerArtifact {
            means: model.means.clone(),
            stds: model.stds.clone(),
        };

        write_atomic(&dir.join(MODEL_FILE), &serde_json::to_vec_pretty(&artifact)?)?;
        write_atomic(&dir.join(SCALER_FILE), &serde_json::to_vec_pretty(&scaler)?)?;
        write_atomic(&dir.join(METADATA_FILE), &serde_json::to_vec_pretty(metadata)?)?;
        Ok(())
    }

    /// Record a state transition in the version's metadata.
    pub fn set_state(&self, version_id: &str, state: ModelState) -> Result<(), LifecycleError> {
        let path = self.version_dir(version_id).join(METADATA_FILE);
        let mut metadata: VersionMetadata = read_json(&path)?;
        tracing::info!(version = %version_id, from = %metadata.state, to = %state, "Model state transition");
        metadata.state = state;
        write_atomic(&path, &serde_json::to_vec_pretty(&metadata)?)?;
        Ok(())
    }

    pub fn metadata(&self, version_id: &str) -> Result<VersionMetadata, LifecycleError> {
        read_json(&self.version_dir(version_id).join(METADATA_FILE))
    }

    /// SHA-256 every artifact file of a version.
    pub fn hash_artifacts(
        &self,
        version_id: &str,
    ) -> Result<BTreeMap<String, String>, LifecycleError> {
        let dir = self.version_dir(version_id);
        let mut hashes = BTreeMap::new();
        for name in ARTIFACT_FILES {
            let bytes = fs::read(dir.join(name))?;
            hashes.insert(name.to_string(), sha256_hex(&bytes));
        }
        Ok(hashes)
    }

    pub fn write_manifest(&self, manifest: &DeploymentManifest) -> Result<(), LifecycleError> {
        let path = self
            .version_dir(&manifest.model_version_id)
            .join(MANIFEST_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    pub fn manifest(&self, version_id: &str) -> Result<DeploymentManifest, LifecycleError> {
        read_json(&self.version_dir(version_id).join(MANIFEST_FILE))
    }

    /// Recompute artifact hashes and compare against the manifest. Integrity
    /// failures are structural and never retried.
    pub fn verify(&self, version_id: &str) -> Result<(), LifecycleError> {
        let manifest = self.manifest(version_id)?;
        let actual = self.hash_artifacts(version_id)?;
        for (file, expected) in &manifest.file_hashes {
            match actual.get(file) {
                Some(hash) if hash == expected => {}
                Some(hash) => {
                    return Err(LifecycleError::IntegrityMismatch {
                        file: file.clone(),
                        expected: expected.clone(),
                        actual: hash.clone(),
                    })
                }
                None => {
                    return Err(LifecycleError::IntegrityMismatch {
                        file: file.clone(),
                        expected: expected.clone(),
                        actual: "missing".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Reload a version from its artifacts.
    pub fn load_version(&self, version_id: &str) -> Result<ModelVersion, LifecycleError> {
        let dir = self.version_dir(version_id);
        let artifact: ModelArtifact = read_json(&dir.join(MODEL_FILE))?;
        let scaler: ScalerArtifact = read_json(&dir.join(SCALER_FILE))?;
        let integrity_hash = self
            .manifest(version_id)
            .map(|m| combined_hash(&m.file_hashes))
            .unwrap_or_default();
        Ok(ModelVersion {
            version_id: artifact.version_id,
            trained_at: artifact.trained_at,
            feature_names: artifact.feature_names,
            means: scaler.means,
            stds: scaler.stds,
            threshold: artifact.threshold,
            score_percentile: artifact.score_percentile,
            score_std: artifact.score_std,
            delta_low: artifact.delta_low,
            delta_high: artifact.delta_high,
            integrity_hash,
        })
    }

    pub fn pointer(&self) -> Result<Option<ActivePointer>, LifecycleError> {
        let path = self.root.join(POINTER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }

    /// Replace the active pointer atomically.
    pub fn set_pointer(&self, pointer: &ActivePointer) -> Result<(), LifecycleError> {
        fs::create_dir_all(&self.root)?;
        write_atomic(
            &self.root.join(POINTER_FILE),
            &serde_json::to_vec_pretty(pointer)?,
        )?;
        Ok(())
    }

    /// All artifact files of a version as publishable payloads.
    pub fn publish_files(
        &self,
        version_id: &str,
    ) -> Result<Vec<super::transport::PublishFile>, LifecycleError> {
        let dir = self.version_dir(version_id);
        let mut files = Vec::new();
        for name in [MODEL_FILE, SCALER_FILE, METADATA_FILE, MANIFEST_FILE] {
            let bytes = fs::read(dir.join(name))?;
            let sha256 = sha256_hex(&bytes);
            files.push(super::transport::PublishFile {
                name: name.to_string(),
                bytes,
                sha256,
            });
        }
        Ok(files)
    }
}

/// Single hash over the per-file hashes, stable under file order.
fn combined_hash(file_hashes: &BTreeMap<String, String>) -> String {
    let mut joined = String::new();
    for (file, hash) in file_hashes {
        joined.push_str(file);
        joined.push(':');
        joined.push_str(hash);
        joined.push('\n');
    }
    sha256_hex(joined.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LifecycleError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_model(id: &str) -> ModelVersion {
        ModelVersion {
            version_id: id.to_string(),
            trained_at: Utc::now(),
            feature_names: vec!["a".into(), "b".into()],
            means: vec![1.0, 2.0],
            stds: vec![0.5, 0.5],
            threshold: 3.0,
            score_percentile: 0.9,
            score_std: 1.0,
            delta_low: 1.0,
            delta_high: 2.0,
            integrity_hash: String::new(),
        }
    }

    fn sample_metadata(id: &str) -> VersionMetadata {
        VersionMetadata {
            version_id: id.to_string(),
            state: ModelState::Training,
            trained_at: Utc::now(),
            sample_count: 100,
            holdout_count: 10,
        }
    }

    #[test]
    fn test_candidate_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let model = sample_model("v1");
        registry.write_candidate(&model, &sample_metadata("v1")).unwrap();

        let loaded = registry.load_version("v1").unwrap();
        assert_eq!(loaded.version_id, "v1");
        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.means, model.means);
        assert_eq!(loaded.threshold, model.threshold);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        registry
            .write_candidate(&sample_model("v1"), &sample_metadata("v1"))
            .unwrap();

        let manifest = DeploymentManifest {
            model_version_id: "v1".to_string(),
            file_hashes: registry.hash_artifacts("v1").unwrap(),
            deployed_at: Utc::now(),
            validation_result: "passed".to_string(),
        };
        registry.write_manifest(&manifest).unwrap();
        registry.verify("v1").unwrap();

        // Tamper with the scaler.
        std::fs::write(registry.version_dir("v1").join(SCALER_FILE), b"{}").unwrap();
        let err = registry.verify("v1").unwrap_err();
        assert!(matches!(err, LifecycleError::IntegrityMismatch { .. }));
    }

    #[test]
    fn test_pointer_swap_and_rollback_target() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(registry.pointer().unwrap().is_none());

        registry
            .set_pointer(&ActivePointer {
                active: "v1".to_string(),
                previous: None,
            })
            .unwrap();
        registry
            .set_pointer(&ActivePointer {
                active: "v2".to_string(),
                previous: Some("v1".to_string()),
            })
            .unwrap();

        let ptr = registry.pointer().unwrap().unwrap();
        assert_eq!(ptr.active, "v2");
        assert_eq!(ptr.previous.as_deref(), Some("v1"));
    }

    #[test]
    fn test_verify_survives_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        registry
            .write_candidate(&sample_model("v1"), &sample_metadata("v1"))
            .unwrap();
        registry
            .write_manifest(&DeploymentManifest {
                model_version_id: "v1".to_string(),
                file_hashes: registry.hash_artifacts("v1").unwrap(),
                deployed_at: Utc::now(),
                validation_result: "passed".to_string(),
            })
            .unwrap();

        // Activation and retirement rewrite metadata after the manifest
        // exists; integrity must still hold for restore and rollback.
        registry.set_state("v1", ModelState::Staged).unwrap();
        registry.set_state("v1", ModelState::Active).unwrap();
        registry.verify("v1").unwrap();
        registry.set_state("v1", ModelState::Retired).unwrap();
        registry.verify("v1").unwrap();
    }

    #[test]
    fn test_state_transitions_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        registry
            .write_candidate(&sample_model("v1"), &sample_metadata("v1"))
            .unwrap();
        registry.set_state("v1", ModelState::Validating).unwrap();
        registry.set_state("v1", ModelState::Active).unwrap();
        assert_eq!(registry.metadata("v1").unwrap().state, ModelState::Active);
    }
}
