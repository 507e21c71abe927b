//! Immutable trained model versions.

use super::{ScoreError, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MIN_STD: f64 = 1e-9;

/// One trained model: standardization scaler, anomaly threshold, and severity
/// band offsets. Immutable once deployed; superseded, never mutated.
///
/// The raw score is the mean squared z-score of the standardized features,
/// so higher is always more anomalous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version_id: String,
    pub trained_at: DateTime<Utc>,
    /// Expected feature names, in scoring order.
    pub feature_names: Vec<String>,
    /// Per-feature training means, aligned with `feature_names`.
    pub means: Vec<f64>,
    /// Per-feature training standard deviations, aligned with `feature_names`.
    pub stds: Vec<f64>,
    /// Anomaly cutoff: the training-score value at `score_percentile`.
    pub threshold: f64,
    pub score_percentile: f64,
    /// Standard deviation of the training score distribution.
    pub score_std: f64,
    /// Severity band offsets above the threshold (sigma multiples, absolute).
    pub delta_low: f64,
    pub delta_high: f64,
    /// Hex SHA-256 over the model + scaler artifacts, filled at validation.
    #[serde(default)]
    pub integrity_hash: String,
}

impl ModelVersion {
    /// Field-for-field, in-order comparison against a vector's schema.
    pub fn check_schema(&self, names: &[String]) -> Result<(), ScoreError> {
        if names.len() != self.feature_names.len() {
            return Err(ScoreError::SchemaMismatch {
                vector_fields: names.len(),
                model_fields: self.feature_names.len(),
                detail: "field count differs".to_string(),
            });
        }
        for (i, (got, want)) in names.iter().zip(&self.feature_names).enumerate() {
            if got != want {
                return Err(ScoreError::SchemaMismatch {
                    vector_fields: names.len(),
                    model_fields: self.feature_names.len(),
                    detail: format!("field {} is '{}', expected '{}'", i, got, want),
                });
            }
        }
        Ok(())
    }

    /// Mean squared z-score over the standardized features.
    pub fn raw_score(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0;
        for (i, &v) in values.iter().enumerate() {
            let std = self.stds[i].max(MIN_STD);
            let z = (v - self.means[i]) / std;
            sum += z * z;
        }
        sum / values.len() as f64
    }

    /// Severity band for a score at or above the threshold.
    pub fn severity(&self, score: f64) -> Severity {
        if score >= self.threshold + self.delta_high {
            Severity::High
        } else if score >= self.threshold + self.delta_low {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_feature_does_not_blow_up() {
        let model = ModelVersion {
            version_id: "v".into(),
            trained_at: Utc::now(),
            feature_names: vec!["a".into()],
            means: vec![5.0],
            stds: vec![0.0],
            threshold: 1.0,
            score_percentile: 0.9,
            score_std: 0.0,
            delta_low: 0.0,
            delta_high: 0.0,
            integrity_hash: String::new(),
        };
        // Matching value scores 0; deviation from a constant baseline is huge
        // but finite, never NaN.
        assert_eq!(model.raw_score(&[5.0]), 0.0);
        let s = model.raw_score(&[6.0]);
        assert!(s.is_finite());
        assert!(s > 1.0);
    }
}
