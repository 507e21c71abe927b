//! Anomaly scoring against the active model version.

pub mod model;

pub use model::ModelVersion;

use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("feature schema mismatch: vector has {vector_fields} fields, model expects {model_fields} ({detail})")]
    SchemaMismatch {
        vector_fields: usize,
        model_fields: usize,
        detail: String,
    },
    #[error("no active model version loaded")]
    ModelUnavailable,
}

/// Severity bands above the anomaly threshold, in training-score
/// standard-deviation offsets frozen into the model at training time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl Severity {
    pub fn parse(s: &str) -> Severity {
        match s {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Outcome of scoring one feature vector.
#[derive(Debug, Clone, Copy)]
pub struct Scored {
    pub raw_score: f64,
    pub is_anomaly: bool,
    pub severity: Severity,
}

/// Score a vector against a model version. Stateless; safe to call
/// concurrently for independent vectors.
///
/// Fails with `SchemaMismatch` unless the vector's feature names match the
/// model's expected names field-for-field in the same order.
pub fn score(vector: &FeatureVector, model: &ModelVersion) -> Result<Scored, ScoreError> {
    model.check_schema(vector.schema.names())?;

    let raw_score = model.raw_score(&vector.values);
    let is_anomaly = raw_score >= model.threshold;
    let severity = model.severity(raw_score);
    Ok(Scored {
        raw_score,
        is_anomaly,
        severity,
    })
}

/// The shared "active model" slot: read on every analysis tick, written only
/// when the lifecycle manager activates a version. The lock is held only for
/// the instant of the pointer clone or assignment, so readers always see
/// either the fully-old or fully-new version.
pub struct ActiveModel {
    slot: RwLock<Option<Arc<ModelVersion>>>,
}

impl Default for ActiveModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveModel {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Current active version, if any.
    pub fn load(&self) -> Option<Arc<ModelVersion>> {
        self.slot.read().expect("active model lock poisoned").clone()
    }

    /// Swap in a new version, returning the one it supersedes.
    pub fn swap(&self, model: Arc<ModelVersion>) -> Option<Arc<ModelVersion>> {
        let mut guard = self.slot.write().expect("active model lock poisoned");
        guard.replace(model)
    }

    /// Score against the active version, or fail with `ModelUnavailable`.
    pub fn score(&self, vector: &FeatureVector) -> Result<Scored, ScoreError> {
        match self.load() {
            Some(model) => score(vector, &model),
            None => Err(ScoreError::ModelUnavailable),
        }
    }
}
