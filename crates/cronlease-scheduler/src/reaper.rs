//! Orphan recovery.
//!
//! A worker that dies while holding a lease leaves its job running with a
//! frozen heartbeat. Every worker runs a reaper that periodically forces
//! such jobs back to waiting. Reclaiming is a single conditional update,
//! so any number of reapers can run at once.

use chrono::{TimeDelta, Utc};
use cronlease_core::JobId;
use cronlease_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{SchedulerError, SchedulerEvent};

pub struct OrphanReaper {
    store: Arc<dyn JobStore>,
    stale_after: Duration,
    interval: Duration,
    events: Option<broadcast::Sender<SchedulerEvent>>,
}

impl OrphanReaper {
    pub fn new(store: Arc<dyn JobStore>, stale_after: Duration, interval: Duration) -> Self {
        Self {
            store,
            stale_after,
            interval,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reclaim every running job whose heartbeat is older than `stale_after`.
    pub async fn reap_once(&self) -> Result<Vec<JobId>, SchedulerError> {
        let now = Utc::now();
        let Some(cutoff) = TimeDelta::from_std(self.stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };

        let job_ids = self.store.reclaim_stale(cutoff).await?;
        if job_ids.is_empty() {
            debug!("No orphaned jobs");
        } else {
            info!(?job_ids, %cutoff, "Reclaimed orphaned jobs");
            if let Some(events) = &self.events {
                let _ = events.send(SchedulerEvent::Reclaimed {
                    job_ids: job_ids.clone(),
                });
            }
        }
        Ok(job_ids)
    }

    /// Reap every `interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, stale_after = ?self.stale_after, "Starting orphan reaper");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once().await {
                        warn!(error = %e, "Orphan recovery pass failed");
                    }
                }
            }
        }
        debug!("Orphan reaper stopped");
    }
}
