//! logwarden -- self-retraining anomaly detection for network log streams.
//!
//! This crate provides the core library for streaming feature aggregation,
//! anomaly scoring against a versioned model, anomaly persistence and alert
//! dispatch, and the model retrain/validate/deploy/rollback lifecycle.

pub mod config;
pub mod engine;
pub mod events;
pub mod features;
pub mod lifecycle;
pub mod notify;
pub mod scoring;
pub mod storage;

use anyhow::Result;
use config::Config;
use engine::AnalysisContext;
use features::{Aggregator, FeatureSchema};
use lifecycle::{DirTransport, LifecycleManager, ModelRegistry, TrainingConfig};
use notify::{Notifier, RetryPolicy};
use scoring::ActiveModel;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

/// Wire a lifecycle manager from the config: local registry, directory
/// transport to the serving location, bounded publication retries.
pub fn lifecycle_manager(
    cfg: &Config,
    active: Arc<ActiveModel>,
    schema: Arc<FeatureSchema>,
) -> LifecycleManager {
    let registry = ModelRegistry::new(&cfg.model_store.dir);
    let transport = Box::new(DirTransport::new(&cfg.model_store.serving_dir));
    let policy = RetryPolicy::new(
        cfg.model_store.max_retries,
        Duration::from_secs(cfg.model_store.retry_delay_secs),
        Duration::from_secs(cfg.model_store.timeout_secs),
    );
    let training = TrainingConfig {
        min_training_samples: cfg.min_training_samples,
        score_percentile: cfg.score_percentile,
        severity_low_sigma: cfg.severity_low_sigma,
        severity_high_sigma: cfg.severity_high_sigma,
    };
    LifecycleManager::new(registry, transport, active, schema, training, cfg.batch_size, policy)
}

/// Start the logwarden daemon: collector feed on stdin, analysis loop, and
/// training loop. Runs until interrupted.
pub async fn serve(config_path: &str, db_path: &str) -> Result<()> {
    let cfg = Config::load(config_path)?;

    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(db_path)?;

    let shutdown = CancellationToken::new();
    let aggregator = Aggregator::new(&cfg.window_sizes_secs);
    let schema = aggregator.schema();
    let handle = engine::spawn_aggregator(aggregator, shutdown.clone());

    let active = Arc::new(ActiveModel::new());
    let manager = Arc::new(lifecycle_manager(&cfg, active.clone(), schema));
    match manager.restore_active() {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("No deployed model yet, scoring starts after first training cycle")
        }
        Err(e) => tracing::warn!(error = %e, "Could not restore active model"),
    }

    // Collector feed: newline-delimited JSON events on stdin.
    let ingest = handle.clone();
    let feed_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match serde_json::from_str::<events::LogEvent>(&line) {
                        Ok(event) => {
                            if ingest.ingest(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropped malformed event"),
                    },
                    Ok(None) => {
                        tracing::info!("Collector feed closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Collector feed read error");
                        break;
                    }
                },
                _ = feed_shutdown.cancelled() => break,
            }
        }
    });

    let ctx = AnalysisContext {
        handle,
        active,
        store: Arc::new(storage::AnomalyStore::new(pool.clone())),
        pool: pool.clone(),
        notifier: Arc::new(Notifier::new(&cfg.notify)?),
        retention_days: cfg.anomaly_retention_days,
    };
    let analysis_cfg = cfg.clone();
    let analysis_shutdown = shutdown.clone();
    let analysis = tokio::spawn(async move {
        engine::run_analysis_loop(ctx, &analysis_cfg, analysis_shutdown).await;
    });

    let training_cfg = cfg.clone();
    let training_shutdown = shutdown.clone();
    let training = tokio::spawn(async move {
        engine::run_training_loop(manager, pool, &training_cfg, training_shutdown).await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    let _ = analysis.await;
    let _ = training.await;

    Ok(())
}
