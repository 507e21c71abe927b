//! Full-batch training of a candidate model.
//!
//! Fits a per-feature standardization scaler, scores the fit set, and takes
//! the anomaly threshold at the configured percentile of those scores.
//! Severity band offsets are absolute standard-deviation multiples of the
//! training score distribution, frozen into the artifact so training and
//! scoring can never drift apart.

use super::LifecycleError;
use crate::features::FeatureSchema;
use crate::scoring::ModelVersion;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Fraction of the most recent samples held out for validation scoring.
const HOLDOUT_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct TrainingConfig {
    pub min_training_samples: usize,
    pub score_percentile: f64,
    pub severity_low_sigma: f64,
    pub severity_high_sigma: f64,
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: ModelVersion,
    /// Most recent samples, excluded from the fit, scored during validation.
    pub holdout: Vec<Vec<f64>>,
    pub sample_count: usize,
}

/// Train a candidate from accumulated feature vectors (oldest first).
pub fn train(
    samples: &[Vec<f64>],
    schema: &FeatureSchema,
    cfg: &TrainingConfig,
) -> Result<TrainingOutcome, LifecycleError> {
    if samples.len() < cfg.min_training_samples {
        return Err(LifecycleError::InsufficientSamples {
            have: samples.len(),
            need: cfg.min_training_samples,
        });
    }

    let n_features = schema.len();
    for (i, s) in samples.iter().enumerate() {
        if s.len() != n_features {
            return Err(LifecycleError::ValidationFailed(format!(
                "training sample {} has {} fields, schema has {}",
                i,
                s.len(),
                n_features
            )));
        }
    }

    let holdout_count = ((samples.len() as f64 * HOLDOUT_FRACTION) as usize).max(1);
    let fit_count = samples.len() - holdout_count;
    let (fit, holdout) = samples.split_at(fit_count);

    let (means, stds) = fit_scaler(fit, n_features);

    let trained_at = Utc::now();
    let version_id = format!(
        "{}-{}",
        trained_at.format("%Y%m%d%H%M%S"),
        &Uuid::new_v4().to_string()[..8]
    );

    let mut model = ModelVersion {
        version_id,
        trained_at,
        feature_names: schema.names().to_vec(),
        means,
        stds,
        threshold: 0.0,
        score_percentile: cfg.score_percentile,
        score_std: 0.0,
        delta_low: 0.0,
        delta_high: 0.0,
        integrity_hash: String::new(),
    };

    // Score the fit set with the scaler, then derive threshold and bands
    // from that score distribution.
    let mut scores: Vec<f64> = fit.iter().map(|s| model.raw_score(s)).collect();
    scores.sort_by(|a, b| a.total_cmp(b));

    model.threshold = percentile(&scores, cfg.score_percentile);
    model.score_std = std_dev(&scores);
    model.delta_low = cfg.severity_low_sigma * model.score_std;
    model.delta_high = cfg.severity_high_sigma * model.score_std;

    info!(
        version = %model.version_id,
        samples = fit_count,
        holdout = holdout_count,
        threshold = model.threshold,
        score_std = model.score_std,
        "Trained candidate model"
    );

    Ok(TrainingOutcome {
        model,
        holdout: holdout.to_vec(),
        sample_count: samples.len(),
    })
}

fn fit_scaler(samples: &[Vec<f64>], n_features: usize) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len() as f64;
    let mut means = vec![0.0; n_features];
    for s in samples {
        for (i, &v) in s.iter().enumerate() {
            means[i] += v;
        }
    }
    for m in &mut means {
        *m /= n;
    }

    let mut stds = vec![0.0; n_features];
    for s in samples {
        for (i, &v) in s.iter().enumerate() {
            let d = v - means[i];
            stds[i] += d * d;
        }
    }
    for s in &mut stds {
        // Sample variance; a single-sample fit degenerates to std 0.
        *s = if n > 1.0 { (*s / (n - 1.0)).sqrt() } else { 0.0 };
    }
    (means, stds)
}

/// Nearest-rank percentile over ascending-sorted scores. The threshold is
/// always an observed training score, so a vector scoring exactly at it is
/// flagged anomalous (score >= threshold).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}
