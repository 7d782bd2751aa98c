//! Job preemption.
//!
//! Claims a due job with a select followed by a conditional update on
//! `id AND status = 'waiting'`. The update is the only coordination point
//! between workers: whoever sees one affected row owns the job, everyone
//! else re-selects.

use chrono::Utc;
use cronlease_core::{Job, JobStatus};
use cronlease_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::SchedulerError;

/// Claims due jobs on behalf of one worker.
#[derive(Clone)]
pub struct PreemptionEngine {
    store: Arc<dyn JobStore>,
    timeout: Duration,
}

impl PreemptionEngine {
    /// `timeout` bounds a whole claim cycle, lost races included.
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Try to claim one due job.
    ///
    /// Returns `Ok(None)` when nothing is due. Store failures and running
    /// out of time are errors, never "not found".
    pub async fn try_preempt(&self) -> Result<Option<Job>, SchedulerError> {
        match tokio::time::timeout(self.timeout, self.claim_next()).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::PreemptTimeout(self.timeout)),
        }
    }

    async fn claim_next(&self) -> Result<Option<Job>, SchedulerError> {
        let mut lost_races = 0u32;
        loop {
            let now = Utc::now();
            let Some(mut candidate) = self.store.select_due(now).await? else {
                return Ok(None);
            };

            if let Some(epoch) = self.store.try_claim(candidate.id, now).await? {
                debug!(
                    job_id = %candidate.id,
                    job = %candidate.name,
                    epoch,
                    lost_races,
                    "Preempted job"
                );
                candidate.status = JobStatus::Running;
                candidate.heartbeat = now;
                candidate.updated_at = now;
                candidate.epoch = epoch;
                return Ok(Some(candidate));
            }

            // Another worker claimed it between our select and update.
            lost_races += 1;
            debug!(job_id = %candidate.id, lost_races, "Lost claim race, retrying");
            tokio::task::yield_now().await;
        }
    }
}
