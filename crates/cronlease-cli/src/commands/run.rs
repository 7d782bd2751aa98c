//! Worker command: run the scheduler until SIGTERM or SIGINT.

use anyhow::{Context as _, Result};
use cronlease_db::{PgJobStore, run_migrations};
use cronlease_executor::ShellExecutor;
use cronlease_scheduler::{ExecutorRegistry, Scheduler, SchedulerEvent};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let pool = ctx.pool(&config).await?;
    run_migrations(&pool).await.context("Migration failed")?;

    let shell = match &config.executors.shell {
        Some(shell) => ShellExecutor::with_program(shell.program.clone()),
        None => ShellExecutor::new(),
    };
    let mut registry = ExecutorRegistry::new();
    registry.register_executor(shell);

    let store = Arc::new(PgJobStore::new(pool));
    let scheduler = Arc::new(Scheduler::new(store, registry, config.scheduler.clone()));

    let shutdown = install_shutdown_handler()?;
    let logging = CancellationToken::new();
    tokio::spawn(log_events(scheduler.subscribe(), logging.clone()));

    scheduler.run(shutdown).await;

    let grace = config.scheduler.shutdown_grace;
    info!(in_flight = scheduler.in_flight(), ?grace, "Draining executions");
    let abandoned = scheduler.drain(grace).await;
    if abandoned > 0 {
        warn!(abandoned, "Exiting with executions still running; their jobs will be reclaimed");
    }
    logging.cancel();
    Ok(())
}

/// Cancel the returned token on SIGTERM or SIGINT.
fn install_shutdown_handler() -> Result<CancellationToken> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            }
            token.cancel();
        }
    });
    Ok(token)
}

/// Log a line per execution outcome.
async fn log_events(mut rx: broadcast::Receiver<SchedulerEvent>, stop: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(SchedulerEvent::ExecutionFinished {
                job_id,
                outcome,
                elapsed,
            }) => {
                info!(job_id = %job_id, outcome = outcome.label(), ?elapsed, "Execution finished");
            }
            Ok(SchedulerEvent::HeartbeatLost { job_id }) => {
                warn!(job_id = %job_id, "Claim lost while running");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}
