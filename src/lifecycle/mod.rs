//! Model lifecycle: retrain, validate, deploy, rollback.
//!
//! Candidate versions move through
//! `Training -> Validating -> Staged -> Active -> Retired`, with
//! `Validating -> Rejected` as the terminal failure branch. Every failure mode
//! degrades to "keep the previous good state": a rejected candidate or an
//! exhausted publication never interrupts serving.

pub mod registry;
pub mod train;
pub mod transport;

pub use registry::{ActivePointer, DeploymentManifest, ModelRegistry, VersionMetadata};
pub use train::{TrainingConfig, TrainingOutcome};
pub use transport::{DirTransport, ModelTransport, PublishFile};

use crate::features::{FeatureSchema, FeatureVector};
use crate::notify::{Exhausted, RetryPolicy};
use crate::scoring::{self, ActiveModel};
use crate::storage::{self, Pool};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Training,
    Validating,
    Staged,
    Active,
    Retired,
    Rejected,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelState::Training => "training",
            ModelState::Validating => "validating",
            ModelState::Staged => "staged",
            ModelState::Active => "active",
            ModelState::Retired => "retired",
            ModelState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("not enough training samples: have {have}, need {need}")]
    InsufficientSamples { have: usize, need: usize },
    #[error("candidate validation failed: {0}")]
    ValidationFailed(String),
    #[error("artifact integrity mismatch for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("model publication exhausted: {0}")]
    PublishExhausted(#[from] Exhausted),
    #[error("no previous version available for rollback")]
    NoPreviousVersion,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Drives the retrain/validate/deploy/rollback cycle and owns the deployment
/// directory. Publishes new versions to the scorer by atomic pointer swap.
pub struct LifecycleManager {
    registry: ModelRegistry,
    transport: Box<dyn ModelTransport>,
    active: Arc<ActiveModel>,
    schema: Arc<FeatureSchema>,
    training: TrainingConfig,
    batch_size: usize,
    publish_policy: RetryPolicy,
}

impl LifecycleManager {
    pub fn new(
        registry: ModelRegistry,
        transport: Box<dyn ModelTransport>,
        active: Arc<ActiveModel>,
        schema: Arc<FeatureSchema>,
        training: TrainingConfig,
        batch_size: usize,
        publish_policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            transport,
            active,
            schema,
            training,
            batch_size,
            publish_policy,
        }
    }

    /// On startup, restore the pointed-to active version into the scorer's
    /// slot. Returns false when no version has ever been deployed.
    pub fn restore_active(&self) -> Result<bool, LifecycleError> {
        let Some(pointer) = self.registry.pointer()? else {
            return Ok(false);
        };
        self.registry.verify(&pointer.active)?;
        let model = self.registry.load_version(&pointer.active)?;
        info!(version = %model.version_id, "Restored active model from registry");
        self.active.swap(Arc::new(model));
        Ok(true)
    }

    /// One full lifecycle cycle: pull accumulated vectors, train, validate,
    /// publish, activate. Returns the new active version id.
    pub async fn run_cycle(&self, pool: &Pool) -> Result<String, LifecycleError> {
        let pool = pool.clone();
        let batch = self.batch_size;
        let samples = tokio::task::spawn_blocking(move || storage::training_vectors(&pool, batch))
            .await
            .map_err(|e| LifecycleError::Storage(e.to_string()))?
            .map_err(|e| LifecycleError::Storage(e.to_string()))?;

        // TRAINING
        let outcome = train::train(&samples, &self.schema, &self.training)?;
        let version_id = outcome.model.version_id.clone();
        let metadata = VersionMetadata {
            version_id: version_id.clone(),
            state: ModelState::Training,
            trained_at: outcome.model.trained_at,
            sample_count: outcome.sample_count,
            holdout_count: outcome.holdout.len(),
        };
        self.registry.write_candidate(&outcome.model, &metadata)?;

        // VALIDATING
        self.registry.set_state(&version_id, ModelState::Validating)?;
        let validated = match self.validate(&version_id, &outcome.holdout) {
            Ok(model) => model,
            Err(e) => {
                self.registry.set_state(&version_id, ModelState::Rejected)?;
                warn!(version = %version_id, error = %e, "Candidate rejected, active model unchanged");
                return Err(e);
            }
        };

        // STAGED -> ACTIVE
        self.registry.set_state(&version_id, ModelState::Staged)?;
        let files = self.registry.publish_files(&version_id)?;
        let vid = version_id.as_str();
        let files = &files;
        self.publish_policy
            .run("publish-model", move || async move {
                self.transport.publish(vid, files).await
            })
            .await?;

        self.activate(validated)?;
        Ok(version_id)
    }

    /// Hash the artifacts, write the deployment manifest, then reload the
    /// candidate from disk and confirm it scores the held-out set sanely.
    fn validate(
        &self,
        version_id: &str,
        holdout: &[Vec<f64>],
    ) -> Result<scoring::ModelVersion, LifecycleError> {
        let manifest = DeploymentManifest {
            model_version_id: version_id.to_string(),
            file_hashes: self.registry.hash_artifacts(version_id)?,
            deployed_at: Utc::now(),
            validation_result: "passed".to_string(),
        };
        self.registry.write_manifest(&manifest)?;
        self.registry.verify(version_id)?;

        let model = self.registry.load_version(version_id)?;
        if model.feature_names.len() != self.schema.len() {
            return Err(LifecycleError::ValidationFailed(format!(
                "reloaded candidate expects {} features, schema has {}",
                model.feature_names.len(),
                self.schema.len()
            )));
        }
        for sample in holdout {
            if sample.len() != model.feature_names.len() {
                return Err(LifecycleError::ValidationFailed(
                    "holdout sample width differs from feature count".to_string(),
                ));
            }
            let score = model.raw_score(sample);
            if !score.is_finite() {
                return Err(LifecycleError::ValidationFailed(format!(
                    "holdout score is not finite: {}",
                    score
                )));
            }
        }
        if !model.threshold.is_finite() || !model.score_std.is_finite() {
            return Err(LifecycleError::ValidationFailed(
                "threshold or score std is not finite".to_string(),
            ));
        }
        Ok(model)
    }

    /// Swap the scorer's active reference and advance the pointer file. The
    /// superseded version is retired, not deleted, so rollback stays possible.
    fn activate(&self, model: scoring::ModelVersion) -> Result<(), LifecycleError> {
        let version_id = model.version_id.clone();
        let previous = self.active.load().map(|m| m.version_id.clone());

        self.registry.set_pointer(&ActivePointer {
            active: version_id.clone(),
            previous: previous.clone(),
        })?;
        self.registry.set_state(&version_id, ModelState::Active)?;
        if let Some(prev) = &previous {
            self.registry.set_state(prev, ModelState::Retired)?;
        }
        self.active.swap(Arc::new(model));
        info!(version = %version_id, previous = ?previous, "Activated model version");
        Ok(())
    }

    /// Re-activate the most recently retired version.
    pub fn rollback(&self) -> Result<String, LifecycleError> {
        let pointer = self.registry.pointer()?.ok_or(LifecycleError::NoPreviousVersion)?;
        let previous = pointer.previous.ok_or(LifecycleError::NoPreviousVersion)?;

        self.registry.verify(&previous)?;
        let model = self.registry.load_version(&previous)?;

        self.registry.set_pointer(&ActivePointer {
            active: previous.clone(),
            previous: Some(pointer.active.clone()),
        })?;
        self.registry.set_state(&previous, ModelState::Active)?;
        self.registry.set_state(&pointer.active, ModelState::Retired)?;
        self.active.swap(Arc::new(model));
        info!(version = %previous, unhealthy = %pointer.active, "Rolled back to previous model version");
        Ok(previous)
    }

    /// Score one vector against the active version; thin pass-through for
    /// callers that only hold the manager.
    pub fn score(&self, vector: &FeatureVector) -> Result<scoring::Scored, scoring::ScoreError> {
        self.active.score(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FailingTransport {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ModelTransport for FailingTransport {
        async fn publish(&self, _version_id: &str, _files: &[PublishFile]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("remote store unreachable")
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1))
    }

    fn training_cfg() -> TrainingConfig {
        TrainingConfig {
            min_training_samples: 20,
            score_percentile: 0.90,
            severity_low_sigma: 1.0,
            severity_high_sigma: 2.0,
        }
    }

    fn seeded_pool(dir: &std::path::Path, n: usize, schema: &FeatureSchema) -> Pool {
        let pool = storage::open_pool(dir.join("test.db").to_str().unwrap()).unwrap();
        let schema = Arc::new(schema.clone());
        for i in 0..n {
            let wobble = (i % 5) as f64;
            storage::save_vector(
                &pool,
                &FeatureVector {
                    timestamp: Utc::now(),
                    values: vec![10.0 + wobble, 50.0 - wobble],
                    schema: schema.clone(),
                },
            )
            .unwrap();
        }
        pool
    }

    fn manager(
        dir: &std::path::Path,
        transport: Box<dyn ModelTransport>,
        schema: Arc<FeatureSchema>,
    ) -> LifecycleManager {
        LifecycleManager::new(
            ModelRegistry::new(dir.join("models")),
            transport,
            Arc::new(ActiveModel::new()),
            schema,
            training_cfg(),
            1000,
            quick_policy(),
        )
    }

    #[tokio::test]
    async fn test_full_cycle_activates_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(FeatureSchema::new(vec!["a".into(), "b".into()]));
        let pool = seeded_pool(dir.path(), 60, &schema);
        let mgr = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema.clone(),
        );

        let version = mgr.run_cycle(&pool).await.unwrap();
        assert_eq!(mgr.active.load().unwrap().version_id, version);
        assert_eq!(
            mgr.registry.metadata(&version).unwrap().state,
            ModelState::Active
        );
        // Artifact set landed at the serving location.
        assert!(dir.path().join("serving").join(&version).join("model.json").exists());

        // Scoring works against the activated version.
        let fv = FeatureVector {
            timestamp: Utc::now(),
            values: vec![10.0, 50.0],
            schema,
        };
        assert!(mgr.score(&fv).is_ok());
    }

    #[tokio::test]
    async fn test_second_cycle_retires_first_and_rollback_restores_it() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(FeatureSchema::new(vec!["a".into(), "b".into()]));
        let pool = seeded_pool(dir.path(), 60, &schema);
        let mgr = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema,
        );

        let v1 = mgr.run_cycle(&pool).await.unwrap();
        let v2 = mgr.run_cycle(&pool).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(mgr.registry.metadata(&v1).unwrap().state, ModelState::Retired);
        assert_eq!(mgr.active.load().unwrap().version_id, v2);

        let restored = mgr.rollback().unwrap();
        assert_eq!(restored, v1);
        assert_eq!(mgr.active.load().unwrap().version_id, v1);
        assert_eq!(mgr.registry.metadata(&v2).unwrap().state, ModelState::Retired);
    }

    #[tokio::test]
    async fn test_publish_exhaustion_keeps_previous_active() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(FeatureSchema::new(vec!["a".into(), "b".into()]));
        let pool = seeded_pool(dir.path(), 60, &schema);

        // First deploy through a working transport.
        let mgr = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema.clone(),
        );
        let v1 = mgr.run_cycle(&pool).await.unwrap();

        // Second cycle against a dead remote store.
        let failing = Box::new(FailingTransport {
            calls: AtomicU32::new(0),
        });
        let mgr2 = LifecycleManager::new(
            ModelRegistry::new(dir.path().join("models")),
            failing,
            mgr.active.clone(),
            schema.clone(),
            training_cfg(),
            1000,
            quick_policy(),
        );
        let err = mgr2.run_cycle(&pool).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PublishExhausted(_)));

        // Prior version still serves.
        assert_eq!(mgr2.active.load().unwrap().version_id, v1);
        let fv = FeatureVector {
            timestamp: Utc::now(),
            values: vec![10.0, 50.0],
            schema,
        };
        assert!(mgr2.score(&fv).is_ok());
    }

    #[tokio::test]
    async fn test_restore_active_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(FeatureSchema::new(vec!["a".into(), "b".into()]));
        let pool = seeded_pool(dir.path(), 60, &schema);
        let mgr = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema.clone(),
        );
        let v1 = mgr.run_cycle(&pool).await.unwrap();

        // Fresh manager, empty slot, as after a process restart.
        let mgr2 = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema,
        );
        assert!(mgr2.active.load().is_none());
        assert!(mgr2.restore_active().unwrap());
        assert_eq!(mgr2.active.load().unwrap().version_id, v1);
    }

    #[tokio::test]
    async fn test_rollback_without_previous() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(FeatureSchema::new(vec!["a".into()]));
        let mgr = manager(
            dir.path(),
            Box::new(DirTransport::new(dir.path().join("serving"))),
            schema,
        );
        assert!(matches!(
            mgr.rollback().unwrap_err(),
            LifecycleError::NoPreviousVersion
        ));
    }
}
