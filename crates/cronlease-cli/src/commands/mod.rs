//! CLI command implementations.

pub mod jobs;
pub mod run;

use anyhow::{Context as _, Result};
use cronlease_config::{WorkerConfig, load_worker_config, parse_duration};
use cronlease_db::{PgJobStore, PgPool, create_pool, run_migrations};
use cronlease_scheduler::OrphanReaper;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Where the worker configuration and database come from.
pub struct Context {
    config_path: Option<PathBuf>,
    database_url: Option<String>,
}

impl Context {
    pub fn new(config_path: Option<PathBuf>, database_url: Option<String>) -> Self {
        Self {
            config_path,
            database_url,
        }
    }

    /// The worker configuration, or defaults when no file was given.
    pub fn config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config_path {
            Some(path) => load_worker_config(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => WorkerConfig::default(),
        };
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        Ok(config)
    }

    pub async fn pool(&self, config: &WorkerConfig) -> Result<PgPool> {
        let url = config
            .database_url
            .as_deref()
            .context("No database configured; pass --database-url or set worker.database-url")?;
        info!("Connecting to database...");
        let pool = create_pool(url, config.max_connections)
            .await
            .context("Failed to connect to database")?;
        info!("Database connected");
        Ok(pool)
    }

    pub async fn store(&self) -> Result<PgJobStore> {
        let config = self.config()?;
        Ok(PgJobStore::new(self.pool(&config).await?))
    }
}

pub async fn migrate(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let pool = ctx.pool(&config).await?;
    run_migrations(&pool).await.context("Migration failed")?;
    println!("Migrations applied");
    Ok(())
}

/// One orphan recovery pass.
pub async fn reclaim(ctx: &Context, stale_after: Option<&str>) -> Result<()> {
    let config = ctx.config()?;
    let stale_after = match stale_after {
        Some(value) => parse_duration("stale-after", value)?,
        None => config.scheduler.stale_after,
    };
    let store = Arc::new(PgJobStore::new(ctx.pool(&config).await?));
    let interval = config.scheduler.reap_interval.unwrap_or(Duration::from_secs(30));
    let reclaimed = OrphanReaper::new(store, stale_after, interval)
        .reap_once()
        .await?;
    if reclaimed.is_empty() {
        println!("No orphaned jobs");
    } else {
        for id in reclaimed {
            println!("Reclaimed job {}", id);
        }
    }
    Ok(())
}

pub fn validate(path: &Path) -> Result<()> {
    let config = load_worker_config(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;
    println!("Configuration is valid");
    println!("  scheduler: {:?}", config.scheduler);
    if let Some(shell) = &config.executors.shell {
        println!("  shell executor: {}", shell.program);
    }
    Ok(())
}
