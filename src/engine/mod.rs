//! Periodic drivers tying ingestion, scoring, persistence, notification, and
//! retraining together.
//!
//! Window state is owned by a single task; event ingestion and analysis ticks
//! arrive as messages on one channel, so aggregator access is serialized
//! without locks. The analysis and training loops are independent: an analysis
//! tick never waits on a training cycle, and the only external-I/O waits
//! (notification, model publication) hold no shared-state lock.

use crate::config::Config;
use crate::events::LogEvent;
use crate::features::{Aggregator, FeatureVector};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::notify::Notifier;
use crate::scoring::{ActiveModel, ScoreError};
use crate::storage::{self, AnomalyRecord, AnomalyStore, Pool};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum Msg {
    Event(LogEvent),
    Tick {
        now: DateTime<Utc>,
        reply: oneshot::Sender<FeatureVector>,
    },
}

/// Handle to the aggregator task: feed events, request tick evaluations.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Msg>,
}

impl AggregatorHandle {
    pub async fn ingest(&self, event: LogEvent) -> Result<()> {
        self.tx
            .send(Msg::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("aggregator task stopped"))
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<FeatureVector> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Tick { now, reply })
            .await
            .map_err(|_| anyhow::anyhow!("aggregator task stopped"))?;
        rx.await.map_err(|_| anyhow::anyhow!("aggregator task stopped"))
    }
}

/// Spawn the task that owns the aggregator. On shutdown the in-flight message
/// finishes before the task exits, so window state is never torn.
pub fn spawn_aggregator(mut agg: Aggregator, shutdown: CancellationToken) -> AggregatorHandle {
    let (tx, mut rx) = mpsc::channel::<Msg>(1024);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Msg::Event(event)) => agg.ingest(event),
                    Some(Msg::Tick { now, reply }) => {
                        let _ = reply.send(agg.tick(now));
                    }
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    debug!("Aggregator task shutting down");
                    break;
                }
            }
        }
    });
    AggregatorHandle { tx }
}

/// Everything one analysis tick needs.
pub struct AnalysisContext {
    pub handle: AggregatorHandle,
    pub active: Arc<ActiveModel>,
    pub store: Arc<AnomalyStore>,
    pub pool: Pool,
    pub notifier: Arc<Notifier>,
    pub retention_days: i64,
}

/// One analysis tick: aggregate, score, persist, notify, purge. Every failure
/// mode degrades to skipping this cycle; nothing here terminates the daemon.
pub async fn analysis_tick(ctx: &AnalysisContext, now: DateTime<Utc>) -> Result<()> {
    let vector = ctx.handle.tick(now).await?;
    storage::save_vector(&ctx.pool, &vector)?;

    match ctx.active.score(&vector) {
        Ok(scored) if scored.is_anomaly => {
            let record = AnomalyRecord {
                id: Uuid::new_v4(),
                timestamp: now,
                score: scored.raw_score,
                severity: scored.severity,
                identity: "stream".to_string(),
                description: format!(
                    "score {:.4} exceeded anomaly threshold ({} severity)",
                    scored.raw_score, scored.severity
                ),
                features: serde_json::json!(vector.values),
            };
            // Persist first; delivery failure never loses the record.
            let fresh = ctx.store.record(&record)?;
            if fresh {
                warn!(
                    anomaly = %record.id,
                    score = scored.raw_score,
                    severity = %scored.severity,
                    "Anomaly detected"
                );
                if let Err(e) = ctx.notifier.notify(&record).await {
                    error!(anomaly = %record.id, error = %e, "Alert delivery failed");
                }
            }
        }
        Ok(scored) => {
            debug!(score = scored.raw_score, "Tick scored normal");
        }
        Err(ScoreError::ModelUnavailable) => {
            info!("No active model yet, skipping scoring this tick");
        }
        Err(e @ ScoreError::SchemaMismatch { .. }) => {
            // Structural; retrying next tick cannot fix the vector already
            // emitted, but later ticks may score against a retrained model.
            error!(error = %e, "Feature schema mismatch, skipping tick");
        }
    }

    let purged = ctx.store.purge(now, ctx.retention_days)?;
    if purged > 0 {
        info!(purged, "Purged expired anomaly records");
    }
    Ok(())
}

/// Analysis driver: aggregate -> score -> store -> notify on a fixed interval.
pub async fn run_analysis_loop(ctx: AnalysisContext, cfg: &Config, shutdown: CancellationToken) {
    info!(interval_secs = cfg.analysis_interval_secs, "Analysis loop started");
    let mut interval = tokio::time::interval(cfg.analysis_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first tick would score an empty window; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = analysis_tick(&ctx, Utc::now()).await {
                    error!(error = %e, "Analysis tick failed");
                }
            }
            _ = shutdown.cancelled() => {
                info!("Analysis loop shutting down");
                break;
            }
        }
    }
}

/// Training driver: run one lifecycle cycle per training interval.
pub async fn run_training_loop(
    manager: Arc<LifecycleManager>,
    pool: Pool,
    cfg: &Config,
    shutdown: CancellationToken,
) {
    info!(interval_secs = cfg.training_interval_secs, "Training loop started");
    let mut interval = tokio::time::interval(cfg.training_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match manager.run_cycle(&pool).await {
                    Ok(version) => info!(%version, "Training cycle deployed new model"),
                    Err(LifecycleError::InsufficientSamples { have, need }) => {
                        debug!(have, need, "Skipping training cycle, not enough samples");
                    }
                    Err(e) => {
                        // Previous active model remains in force.
                        error!(error = %e, "Training cycle failed");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Training loop shutting down");
                break;
            }
        }
    }
}
