//! Rolling window state and the tick-driven aggregator.
//!
//! All window sizes share one raw event buffer; each window keeps only its
//! own incrementally maintained aggregates plus an eviction cursor into the
//! shared buffer. A tick first evicts events that fell out of each window,
//! then reads the aggregates, so cost is amortized O(window churn) per tick.
//!
//! Empty-window policy: an empty window emits all-zero features, and ratios
//! are 0 when the denominator is 0. A tick never fails on an empty window.

use super::{FeatureSchema, FeatureVector};
use crate::events::{EventType, LogEvent};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Aggregates for one window size. Owned by the aggregator, mutated only on
/// event arrival or tick eviction.
struct WindowState {
    size: Duration,
    /// Sequence number of the next buffered event this window will evict.
    cursor: u64,
    count: u64,
    connection_count: u64,
    auth_count: u64,
    error_count: u64,
    /// Identity -> in-window occurrence count. Only the cardinality is ever
    /// exposed; counts exist so eviction can decrement correctly.
    identities: HashMap<String, u64>,
    /// Ordered so the entropy sum is the same for identical window contents
    /// regardless of insertion history.
    processes: BTreeMap<String, u64>,
}

impl WindowState {
    fn new(size_secs: u64) -> Self {
        Self {
            size: Duration::seconds(size_secs as i64),
            cursor: 0,
            count: 0,
            connection_count: 0,
            auth_count: 0,
            error_count: 0,
            identities: HashMap::new(),
            processes: BTreeMap::new(),
        }
    }

    fn admit(&mut self, event: &LogEvent) {
        self.count += 1;
        match event.event_type {
            EventType::Connection => self.connection_count += 1,
            EventType::Auth => self.auth_count += 1,
            EventType::Error => self.error_count += 1,
            EventType::Other(_) => {}
        }
        *self.identities.entry(event.identity.clone()).or_insert(0) += 1;
        *self.processes.entry(event.process.clone()).or_insert(0) += 1;
    }

    fn evict(&mut self, event: &LogEvent) {
        self.count = self.count.saturating_sub(1);
        match event.event_type {
            EventType::Connection => self.connection_count -= 1,
            EventType::Auth => self.auth_count -= 1,
            EventType::Error => self.error_count -= 1,
            EventType::Other(_) => {}
        }
        if let Some(n) = self.identities.get_mut(&event.identity) {
            *n -= 1;
            if *n == 0 {
                self.identities.remove(&event.identity);
            }
        }
        if let Some(n) = self.processes.get_mut(&event.process) {
            *n -= 1;
            if *n == 0 {
                self.processes.remove(&event.process);
            }
        }
    }

    /// Shannon entropy (bits) of the per-process event distribution.
    fn process_entropy(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let total = self.count as f64;
        let mut entropy = 0.0;
        for &n in self.processes.values() {
            let p = n as f64 / total;
            entropy -= p * p.log2();
        }
        entropy
    }

    fn error_ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }

    fn emit_into(&self, values: &mut Vec<f64>) {
        values.push(self.count as f64);
        values.push(self.connection_count as f64);
        values.push(self.auth_count as f64);
        values.push(self.error_count as f64);
        values.push(self.identities.len() as f64);
        values.push(self.process_entropy());
        values.push(self.error_ratio());
    }
}

/// Multi-window streaming aggregator. `ingest` admits events, `tick` evicts
/// expired ones and emits one feature vector covering every window.
///
/// The shared buffer relies on the collector delivering events in timestamp
/// order; a straggler stamped earlier than its neighbors is evicted together
/// with them.
pub struct Aggregator {
    buffer: VecDeque<LogEvent>,
    /// Sequence number of the buffer front.
    base_seq: u64,
    next_seq: u64,
    windows: Vec<WindowState>,
    schema: Arc<FeatureSchema>,
}

impl Aggregator {
    /// Window sizes in seconds, smallest first.
    pub fn new(window_sizes_secs: &[u64]) -> Self {
        let schema = Arc::new(FeatureSchema::for_windows(window_sizes_secs));
        Self {
            buffer: VecDeque::new(),
            base_seq: 0,
            next_seq: 0,
            windows: window_sizes_secs.iter().map(|&s| WindowState::new(s)).collect(),
            schema,
        }
    }

    pub fn schema(&self) -> Arc<FeatureSchema> {
        self.schema.clone()
    }

    /// Number of events currently buffered (inside the largest window).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Admit one event into every window.
    pub fn ingest(&mut self, event: LogEvent) {
        for w in &mut self.windows {
            w.admit(&event);
        }
        self.buffer.push_back(event);
        self.next_seq += 1;
    }

    /// Evict expired events from each window, then emit the feature vector
    /// for `now`. Deterministic given the buffered events and `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> FeatureVector {
        for w in &mut self.windows {
            let cutoff = now - w.size;
            while w.cursor < self.next_seq {
                let idx = (w.cursor - self.base_seq) as usize;
                let event = &self.buffer[idx];
                if event.timestamp > cutoff {
                    break;
                }
                w.evict(event);
                w.cursor += 1;
            }
        }

        // Drop buffer entries no window still covers.
        let min_cursor = self.windows.iter().map(|w| w.cursor).min().unwrap_or(self.next_seq);
        while self.base_seq < min_cursor {
            self.buffer.pop_front();
            self.base_seq += 1;
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for w in &self.windows {
            w.emit_into(&mut values);
        }
        FeatureVector {
            timestamp: now,
            values,
            schema: self.schema.clone(),
        }
    }
}
