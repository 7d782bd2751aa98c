//! Store wrappers for exercising the lease protocol.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use cronlease_core::{Job, JobId};
use cronlease_db::{DbError, DbResult, JobStore, MemoryJobStore, NewJob};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn due_job(name: &str) -> NewJob {
    NewJob::new(
        name,
        "local",
        "*/10 * * * * ?",
        Utc::now() - TimeDelta::seconds(1),
    )
}

/// Delegates to a `MemoryJobStore`, recording heartbeats and releases and
/// injecting failures on demand.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryJobStore,
    heartbeats: Mutex<Vec<DateTime<Utc>>>,
    reschedules: Mutex<Vec<JobId>>,
    stall_selects: AtomicBool,
    failing_reschedules: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeats(&self) -> Vec<DateTime<Utc>> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn reschedules(&self) -> Vec<JobId> {
        self.reschedules.lock().unwrap().clone()
    }

    /// Make `select_due` never complete.
    pub fn stall_selects(&self) {
        self.stall_selects.store(true, Ordering::SeqCst);
    }

    /// Fail the next `count` reschedules with a transient error.
    pub fn fail_reschedules(&self, count: usize) {
        self.failing_reschedules.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn select_due(&self, now: DateTime<Utc>) -> DbResult<Option<Job>> {
        if self.stall_selects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.select_due(now).await
    }

    async fn try_claim(&self, id: JobId, now: DateTime<Utc>) -> DbResult<Option<i64>> {
        self.inner.try_claim(id, now).await
    }

    async fn update_heartbeat(
        &self,
        id: JobId,
        epoch: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.heartbeats.lock().unwrap().push(at);
        self.inner.update_heartbeat(id, epoch, at).await
    }

    async fn update_next_time(&self, id: JobId, next_time: DateTime<Utc>) -> DbResult<()> {
        self.inner.update_next_time(id, next_time).await
    }

    async fn release(&self, id: JobId) -> DbResult<bool> {
        self.inner.release(id).await
    }

    async fn reschedule(
        &self,
        id: JobId,
        epoch: i64,
        next_time: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.reschedules.lock().unwrap().push(id);
        let failing = self
            .failing_reschedules
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::Unavailable("injected failure".to_string()));
        }
        self.inner.reschedule(id, epoch, next_time).await
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<JobId>> {
        self.inner.reclaim_stale(cutoff).await
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        self.inner.get(id).await
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        self.inner.list().await
    }
}
