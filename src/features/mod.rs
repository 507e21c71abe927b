//! Streaming feature aggregation over trailing time windows.

pub mod window;

pub use window::Aggregator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-window feature fields, in emission order.
const WINDOW_FIELDS: [&str; 7] = [
    "event_count",
    "connection_count",
    "auth_count",
    "error_count",
    "unique_macs",
    "process_entropy",
    "error_ratio",
];

/// Ordered feature-name schema. Scoring compares this field-for-field against
/// the model's expected names; any difference is a hard mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Build the schema for a set of window sizes (seconds, smallest first).
    pub fn for_windows(window_sizes_secs: &[u64]) -> Self {
        let mut names = Vec::with_capacity(window_sizes_secs.len() * WINDOW_FIELDS.len());
        for &secs in window_sizes_secs {
            let label = window_label(secs);
            for field in WINDOW_FIELDS {
                names.push(format!("window_{}_{}", label, field));
            }
        }
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Human label for a window size: 300 -> "5min", 3600 -> "1hour".
pub fn window_label(secs: u64) -> String {
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}hour", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}min", secs / 60)
    } else {
        format!("{}sec", secs)
    }
}

/// One evaluation tick's numeric summary across all configured windows.
/// Persisted as its raw values; the schema travels alongside in memory.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
    pub schema: Arc<FeatureSchema>,
}

impl FeatureVector {
    /// Look up a value by feature name. Linear scan; test/debug convenience.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .names()
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }
}
