use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "logwarden",
    about = "Self-retraining anomaly detection for network log streams",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (collector feed on stdin + analysis + training loops)
    Serve {
        /// Config file path
        #[arg(long, default_value = "logwarden.toml")]
        config: String,

        /// SQLite database path
        #[arg(long, default_value = "data/logwarden.db")]
        db: String,
    },

    /// Run one training cycle now (train, validate, deploy)
    Train {
        #[arg(long, default_value = "logwarden.toml")]
        config: String,

        #[arg(long, default_value = "data/logwarden.db")]
        db: String,
    },

    /// Re-activate the previously retired model version
    Rollback {
        #[arg(long, default_value = "logwarden.toml")]
        config: String,
    },

    /// List recent anomaly records
    Recent {
        #[arg(long, default_value = "data/logwarden.db")]
        db: String,

        /// Max records to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Purge anomaly records past the retention window
    Purge {
        #[arg(long, default_value = "logwarden.toml")]
        config: String,

        #[arg(long, default_value = "data/logwarden.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, db } => {
            tracing::info!("Starting logwarden daemon");
            logwarden::serve(&config, &db).await?;
        }
        Commands::Train { config, db } => {
            let cfg = logwarden::config::Config::load(&config)?;
            let pool = logwarden::storage::open_pool(&db)?;
            let schema = Arc::new(logwarden::features::FeatureSchema::for_windows(
                &cfg.window_sizes_secs,
            ));
            let active = Arc::new(logwarden::scoring::ActiveModel::new());
            let manager = logwarden::lifecycle_manager(&cfg, active, schema);
            if let Err(e) = manager.restore_active() {
                tracing::warn!(error = %e, "Could not restore active model");
            }
            let version = manager.run_cycle(&pool).await?;
            println!("Deployed model version {}", version);
        }
        Commands::Rollback { config } => {
            let cfg = logwarden::config::Config::load(&config)?;
            let schema = Arc::new(logwarden::features::FeatureSchema::for_windows(
                &cfg.window_sizes_secs,
            ));
            let active = Arc::new(logwarden::scoring::ActiveModel::new());
            let manager = logwarden::lifecycle_manager(&cfg, active, schema);
            let version = manager.rollback()?;
            println!("Rolled back to model version {}", version);
        }
        Commands::Recent { db, limit } => {
            let pool = logwarden::storage::open_pool(&db)?;
            let store = logwarden::storage::AnomalyStore::new(pool);
            for record in store.recent(limit)? {
                println!(
                    "{}  {:<6}  score {:.4}  {}",
                    record.timestamp.to_rfc3339(),
                    record.severity,
                    record.score,
                    record.description
                );
            }
        }
        Commands::Purge { config, db } => {
            let cfg = logwarden::config::Config::load(&config)?;
            let pool = logwarden::storage::open_pool(&db)?;
            let store = logwarden::storage::AnomalyStore::new(pool);
            let deleted = store.purge(chrono::Utc::now(), cfg.anomaly_retention_days)?;
            println!("Purged {} expired anomaly records", deleted);
        }
    }

    Ok(())
}
