//! SQLite storage layer -- schema, anomaly records, training-sample spool.

pub mod schema;

use crate::features::FeatureVector;
use crate::scoring::Severity;
use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width UTC formatting so stored timestamps compare lexicographically.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A persisted anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub severity: Severity,
    /// Source identity the detection is attributed to, or "stream" when the
    /// feature vector aggregates the whole stream.
    pub identity: String,
    pub description: String,
    pub features: serde_json::Value,
}

/// Anomaly persistence with dedup, retention purge, and recent listing.
pub struct AnomalyStore {
    pool: Pool,
}

impl AnomalyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a record, deduplicating on (timestamp, identity, description).
    /// Returns false when an identical detection was already stored.
    pub fn record(&self, record: &AnomalyRecord) -> Result<bool> {
        let conn = self.pool.get()?;
        let features_json = serde_json::to_string(&record.features)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO anomalies
                 (anomaly_id, timestamp, score, severity, identity, description, features_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                fmt_ts(record.timestamp),
                record.score,
                record.severity.to_string(),
                record.identity,
                record.description,
                features_json
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Delete records strictly older than the retention horizon. Idempotent;
    /// never removes a record younger than `retention_days`.
    pub fn purge(&self, now: DateTime<Utc>, retention_days: i64) -> Result<usize> {
        let cutoff = fmt_ts(now - Duration::days(retention_days));
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM anomalies WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    /// Most recent records first; insertion order among equal timestamps.
    pub fn recent(&self, limit: usize) -> Result<Vec<AnomalyRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT anomaly_id, timestamp, score, severity, identity, description, features_json
             FROM anomalies ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id_str: String = row.get(0)?;
            let ts_str: String = row.get(1)?;
            let sev_str: String = row.get(3)?;
            let features_str: String = row.get(6)?;
            Ok(AnomalyRecord {
                id: Uuid::parse_str(&id_str).unwrap_or_default(),
                timestamp: DateTime::parse_from_rfc3339(&ts_str)
                    .unwrap_or_default()
                    .with_timezone(&Utc),
                score: row.get(2)?,
                severity: Severity::parse(&sev_str),
                identity: row.get(4)?,
                description: row.get(5)?,
                features: serde_json::from_str(&features_str).unwrap_or_default(),
            })
        })?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }
}

/// Spool one tick's feature vector for later training.
pub fn save_vector(pool: &Pool, vector: &FeatureVector) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO feature_vectors (timestamp, values_json) VALUES (?1, ?2)",
        params![fmt_ts(vector.timestamp), serde_json::to_string(&vector.values)?],
    )?;
    Ok(())
}

/// Number of accumulated training samples.
pub fn sample_count(pool: &Pool) -> Result<usize> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM feature_vectors", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// The most recent `limit` accumulated vectors, oldest first.
pub fn training_vectors(pool: &Pool, limit: usize) -> Result<Vec<Vec<f64>>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT values_json FROM
             (SELECT id, values_json FROM feature_vectors ORDER BY id DESC LIMIT ?1)
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut vectors = Vec::new();
    for r in rows {
        let values: Vec<f64> = serde_json::from_str(&r?)?;
        vectors.push(values);
    }
    Ok(vectors)
}
