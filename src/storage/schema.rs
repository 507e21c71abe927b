//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id INTEGER PRIMARY KEY,
            anomaly_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            score REAL NOT NULL,
            severity TEXT NOT NULL,
            identity TEXT NOT NULL,
            description TEXT NOT NULL,
            features_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Dedup: overlapping window evaluations must not double-alert.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_anomalies_dedup
            ON anomalies(timestamp, identity, description);
        CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp ON anomalies(timestamp);

        CREATE TABLE IF NOT EXISTS feature_vectors (
            id INTEGER PRIMARY KEY,
            timestamp TEXT NOT NULL,
            values_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_feature_vectors_timestamp ON feature_vectors(timestamp);",
    )?;

    Ok(())
}
