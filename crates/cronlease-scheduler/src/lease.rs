//! Leases on claimed jobs.
//!
//! A `Lease` is handed out for every successful claim. While it is held a
//! background task refreshes the job's heartbeat so other workers can tell
//! the job is alive. `Lease::release` consumes the handle, so a claim can
//! be released at most once; dropping a lease without releasing it stops
//! the heartbeat and leaves the row running for orphan recovery.
//!
//! Heartbeats and the release are fenced by the epoch the claim returned.
//! Once the row has been reclaimed or claimed again, both match no rows and
//! the lease reports itself lost.

use chrono::{DateTime, TimeDelta, Utc};
use cronlease_core::{Job, JobId};
use cronlease_db::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{SchedulerError, SchedulerEvent};

const RELEASE_RETRY_MIN: Duration = Duration::from_millis(50);
const RELEASE_RETRY_MAX: Duration = Duration::from_secs(1);

/// Starts heartbeats for claimed jobs and hands out their leases.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    heartbeat_interval: Duration,
    invalid_schedule_backoff: Duration,
    release_timeout: Duration,
    events: Option<broadcast::Sender<SchedulerEvent>>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn JobStore>, heartbeat_interval: Duration) -> Self {
        Self {
            store,
            heartbeat_interval,
            invalid_schedule_backoff: Duration::from_secs(600),
            release_timeout: Duration::from_secs(5),
            events: None,
        }
    }

    /// How far to push `next_time` when the cron expression cannot be evaluated.
    pub fn with_invalid_schedule_backoff(mut self, backoff: Duration) -> Self {
        self.invalid_schedule_backoff = backoff;
        self
    }

    /// How long a release keeps retrying transient store errors.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Report lost heartbeats on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Take the lease on a freshly claimed job and start its heartbeat.
    pub fn acquire(&self, job: Job) -> Lease {
        let lost = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.store.clone(),
            job.id,
            job.epoch,
            self.heartbeat_interval,
            self.events.clone(),
            lost.clone(),
        ));

        Lease {
            job,
            store: self.store.clone(),
            heartbeat: Some(heartbeat),
            lost,
            invalid_schedule_backoff: self.invalid_schedule_backoff,
            release_timeout: self.release_timeout,
        }
    }
}

async fn heartbeat_loop(
    store: Arc<dyn JobStore>,
    job_id: JobId,
    epoch: i64,
    interval: Duration,
    events: Option<broadcast::Sender<SchedulerEvent>>,
    lost: CancellationToken,
) {
    // The claim itself stamped the first heartbeat.
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let refresh = store.update_heartbeat(job_id, epoch, Utc::now());
        match tokio::time::timeout(interval, refresh).await {
            Ok(Ok(true)) => debug!(job_id = %job_id, "Heartbeat"),
            Ok(Ok(false)) => {
                warn!(job_id = %job_id, epoch, "Claim no longer held, stopping heartbeat");
                lost.cancel();
                if let Some(events) = &events {
                    let _ = events.send(SchedulerEvent::HeartbeatLost { job_id });
                }
                return;
            }
            Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "Failed to refresh heartbeat"),
            Err(_) => warn!(job_id = %job_id, "Heartbeat refresh timed out"),
        }
    }
}

/// Exclusive hold on one claimed job.
pub struct Lease {
    job: Job,
    store: Arc<dyn JobStore>,
    heartbeat: Option<JoinHandle<()>>,
    lost: CancellationToken,
    invalid_schedule_backoff: Duration,
    release_timeout: Duration,
}

impl Lease {
    /// The job as it was claimed.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// Whether the heartbeat task is still running.
    pub fn is_heartbeating(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Fires once a heartbeat finds the claim taken away.
    pub fn lost(&self) -> &CancellationToken {
        &self.lost
    }

    /// End the claim: stop the heartbeat, compute the next run from the cron
    /// expression and return the job to waiting.
    ///
    /// Transient store errors are retried for up to the release timeout.
    /// Returns the persisted `next_time`, or `LeaseLost` when the claim is
    /// no longer ours, in which case nothing is written.
    pub async fn release(mut self) -> Result<DateTime<Utc>, SchedulerError> {
        self.stop_heartbeat().await;
        if self.lost.is_cancelled() {
            return Err(SchedulerError::LeaseLost(self.job.id));
        }

        let now = Utc::now();
        let next_time = match self.job.next_time_after(now) {
            Ok(next_time) => next_time,
            Err(e) => {
                error!(job_id = %self.job.id, error = %e, "Cannot evaluate schedule, backing off");
                TimeDelta::from_std(self.invalid_schedule_backoff)
                    .ok()
                    .and_then(|backoff| now.checked_add_signed(backoff))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
        };

        let deadline = Instant::now() + self.release_timeout;
        let mut retry = RELEASE_RETRY_MIN;
        loop {
            match self
                .store
                .reschedule(self.job.id, self.job.epoch, next_time)
                .await
            {
                Ok(true) => break,
                Ok(false) => return Err(SchedulerError::LeaseLost(self.job.id)),
                Err(e) if e.is_transient() && Instant::now() + retry < deadline => {
                    warn!(job_id = %self.job.id, error = %e, ?retry, "Release failed, retrying");
                    tokio::time::sleep(retry).await;
                    retry = (retry * 2).min(RELEASE_RETRY_MAX);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(job_id = %self.job.id, job = %self.job.name, %next_time, "Released job");
        Ok(next_time)
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
            // Wait for the abort so no refresh can land after the release.
            let _ = heartbeat.await;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("job_id", &self.job.id)
            .field("epoch", &self.job.epoch)
            .field("job", &self.job.name)
            .field("heartbeating", &self.is_heartbeating())
            .field("lost", &self.lost.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreemptionEngine;
    use crate::testing::{RecordingStore, due_job};
    use cronlease_core::JobStatus;
    use cronlease_db::{MemoryJobStore, NewJob};

    async fn claim(store: Arc<dyn JobStore>) -> Job {
        PreemptionEngine::new(store, Duration::from_secs(1))
            .try_preempt()
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_while_held_and_stop_on_release() {
        let store = Arc::new(RecordingStore::new());
        store.inner.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;

        let leases = LeaseManager::new(store.clone(), Duration::from_secs(30));
        let lease = leases.acquire(job);

        tokio::time::sleep(Duration::from_secs(95)).await;
        let beats = store.heartbeats();
        assert_eq!(beats.len(), 3);
        assert!(beats.windows(2).all(|w| w[0] <= w[1]));
        assert!(lease.is_heartbeating());

        let released_at = Utc::now();
        let next_time = lease.release().await.unwrap();
        assert!(next_time > released_at);
        assert!(next_time <= Utc::now() + TimeDelta::seconds(10));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(store.heartbeats().len(), 3);
    }

    #[tokio::test]
    async fn test_release_returns_job_to_waiting() {
        let store = Arc::new(MemoryJobStore::new());
        let seeded = store.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;

        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30)).acquire(job);
        let next_time = lease.release().await.unwrap();

        let row = store.get(seeded.id).await.unwrap();
        assert_eq!(row.status, JobStatus::Waiting);
        assert_eq!(row.next_time, next_time);
        assert!(row.next_time > seeded.next_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_lease_leaves_job_running() {
        let store = Arc::new(RecordingStore::new());
        let seeded = store.inner.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;
        let claimed_heartbeat = job.heartbeat;

        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30)).acquire(job);
        drop(lease);

        tokio::time::sleep(Duration::from_secs(300)).await;
        let row = store.get(seeded.id).await.unwrap();
        assert_eq!(row.status, JobStatus::Running);
        assert_eq!(row.heartbeat, claimed_heartbeat);
        assert!(store.heartbeats().is_empty());
        assert!(store.reschedules().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_expression_backs_off() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .insert(NewJob::new(
                "broken",
                "local",
                "not a cron expression",
                Utc::now() - TimeDelta::seconds(1),
            ))
            .await
            .unwrap();
        let job = claim(store.clone()).await;

        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30))
            .with_invalid_schedule_backoff(Duration::from_secs(600))
            .acquire(job);
        let before = Utc::now();
        let next_time = lease.release().await.unwrap();

        assert!(next_time >= before + TimeDelta::seconds(600));
        assert!(next_time <= Utc::now() + TimeDelta::seconds(600));
    }

    #[tokio::test]
    async fn test_release_after_reclaim_reports_lost_lease() {
        let store = Arc::new(MemoryJobStore::new());
        let seeded = store.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30)).acquire(job);

        // A recovery pass decided the holder was dead.
        store.release(seeded.id).await.unwrap();

        let err = lease.release().await.unwrap_err();
        assert!(matches!(err, SchedulerError::LeaseLost(id) if id == seeded.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_when_job_is_reclaimed() {
        let store = Arc::new(MemoryJobStore::new());
        let seeded = store.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;

        let (tx, mut rx) = broadcast::channel(16);
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30))
            .with_events(tx)
            .acquire(job);
        store.release(seeded.id).await.unwrap();

        match rx.recv().await.unwrap() {
            SchedulerEvent::HeartbeatLost { job_id } => assert_eq!(job_id, seeded.id),
            other => panic!("unexpected event: {other:?}"),
        }
        tokio::task::yield_now().await;
        assert!(!lease.is_heartbeating());
        assert!(lease.lost().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_release_failure_is_retried() {
        let store = Arc::new(RecordingStore::new());
        let seeded = store.inner.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30))
            .with_release_timeout(Duration::from_secs(5))
            .acquire(job);

        store.fail_reschedules(1);
        let next_time = lease.release().await.unwrap();

        assert_eq!(store.reschedules(), vec![seeded.id, seeded.id]);
        let row = store.get(seeded.id).await.unwrap();
        assert_eq!(row.status, JobStatus::Waiting);
        assert_eq!(row.next_time, next_time);
        assert!(row.next_time > seeded.next_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_gives_up_after_release_timeout() {
        let store = Arc::new(RecordingStore::new());
        let seeded = store.inner.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;
        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30))
            .with_release_timeout(Duration::from_secs(2))
            .acquire(job);

        store.fail_reschedules(usize::MAX);
        let started = Instant::now();
        let err = lease.release().await.unwrap_err();

        assert!(matches!(err, SchedulerError::Store(_)));
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert!(store.reschedules().len() > 1);
        // Left running for the reaper.
        let row = store.get(seeded.id).await.unwrap();
        assert_eq!(row.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_unrepresentable_backoff_does_not_overflow() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .insert(NewJob::new(
                "broken",
                "local",
                "not a cron expression",
                Utc::now() - TimeDelta::seconds(1),
            ))
            .await
            .unwrap();
        let job = claim(store.clone()).await;

        let lease = LeaseManager::new(store.clone(), Duration::from_secs(30))
            .with_invalid_schedule_backoff(Duration::MAX)
            .acquire(job);
        let next_time = lease.release().await.unwrap();

        assert_eq!(next_time, DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_superseded_lease_does_not_release_new_claim() {
        let store = Arc::new(MemoryJobStore::new());
        let seeded = store.insert(due_job("daily-report")).await.unwrap();
        let job = claim(store.clone()).await;
        let first = LeaseManager::new(store.clone(), Duration::from_secs(30)).acquire(job);

        // Forced back to waiting, then claimed by another worker.
        store.release(seeded.id).await.unwrap();
        let second = store.try_claim(seeded.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(second, first.job().epoch + 1);

        let err = first.release().await.unwrap_err();
        assert!(matches!(err, SchedulerError::LeaseLost(id) if id == seeded.id));

        let row = store.get(seeded.id).await.unwrap();
        assert_eq!(row.status, JobStatus::Running);
        assert_eq!(row.epoch, second);
    }
}
