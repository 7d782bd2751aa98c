//! The poll/dispatch loop.
//!
//! Each iteration tries to claim one due job. A claimed job is run on its
//! own task under a fixed deadline, so a slow execution never blocks the
//! loop from claiming more work. Whatever the execution does (return,
//! fail, panic or overrun) the task releases the lease exactly once at
//! the end. An execution whose claim is taken away is abandoned at once
//! and its release writes nothing.

use cronlease_config::SchedulerConfig;
use cronlease_core::{Executor, Job, JobId};
use cronlease_db::JobStore;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    ExecutionOutcome, ExecutorRegistry, Lease, LeaseManager, OrphanReaper, PreemptionEngine,
    SchedulerEvent,
};

/// Capacity of the event channel; slow subscribers miss older events.
const EVENT_CAPACITY: usize = 256;

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A job was claimed and its execution started.
    Dispatched(JobId),
    /// A job was claimed but no executor handles its kind.
    ExecutorMissing(JobId),
    /// Nothing was due.
    Idle,
    /// The claim attempt failed.
    Failed,
}

/// Claims due jobs and runs them on registered executors.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    engine: PreemptionEngine,
    leases: LeaseManager,
    registry: Arc<ExecutorRegistry>,
    config: SchedulerConfig,
    events: broadcast::Sender<SchedulerEvent>,
    tracker: TaskTracker,
}

impl Scheduler {
    /// Create a scheduler. The registry is frozen from here on.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ExecutorRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = PreemptionEngine::new(store.clone(), config.preempt_timeout);
        let leases = LeaseManager::new(store.clone(), config.heartbeat_interval)
            .with_invalid_schedule_backoff(config.invalid_schedule_backoff)
            .with_release_timeout(config.release_timeout)
            .with_events(events.clone());

        Self {
            store,
            engine,
            leases,
            registry: Arc::new(registry),
            config,
            events,
            tracker: TaskTracker::new(),
        }
    }

    /// Receive events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Number of executions currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Run the loop until `shutdown` fires.
    ///
    /// Stopping only ends claiming; executions already started keep running
    /// under their own deadline. Use [`Scheduler::drain`] to wait for them.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            kinds = ?self.registry.kinds(),
            poll_interval = ?self.config.poll_interval,
            execution_timeout = ?self.config.execution_timeout,
            "Starting scheduler"
        );

        let reaper = self.config.reap_interval.map(|interval| {
            let reaper = OrphanReaper::new(self.store.clone(), self.config.stale_after, interval)
                .with_events(self.events.clone());
            let shutdown = shutdown.child_token();
            tokio::spawn(async move { reaper.run(shutdown).await })
        });

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let pause = match self.poll_once().await {
                PollOutcome::Dispatched(_) | PollOutcome::ExecutorMissing(_) => {
                    self.config.claim_interval
                }
                PollOutcome::Idle | PollOutcome::Failed => self.config.poll_interval,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        if let Some(reaper) = reaper {
            if let Err(e) = reaper.await {
                warn!(error = %e, "Orphan reaper task failed");
            }
        }
        info!(in_flight = self.in_flight(), "Scheduler stopped claiming jobs");
    }

    /// One claim attempt; dispatches the job if one was claimed.
    pub async fn poll_once(&self) -> PollOutcome {
        let job = match self.engine.try_preempt().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("No job due");
                self.emit(SchedulerEvent::NoJobDue);
                return PollOutcome::Idle;
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Failed to preempt job");
                self.emit(SchedulerEvent::PollFailed {
                    error: e.to_string(),
                    transient: e.is_transient(),
                });
                return PollOutcome::Failed;
            }
        };

        let job_id = job.id;
        info!(job_id = %job_id, job = %job.name, executor = %job.executor, "Claimed job");
        self.emit(SchedulerEvent::Claimed {
            job_id,
            name: job.name.clone(),
        });

        let lease = self.leases.acquire(job);
        match self.registry.get(&lease.job().executor) {
            Some(executor) => {
                let timeout = self.config.execution_timeout;
                let events = self.events.clone();
                self.tracker.spawn(run_attempt(lease, executor, timeout, events));
                PollOutcome::Dispatched(job_id)
            }
            None => {
                let kind = lease.job().executor.clone();
                error!(job_id = %job_id, executor = %kind, "No executor registered for job");
                self.emit(SchedulerEvent::ExecutorMissing { job_id, kind });
                finish(lease, &self.events).await;
                PollOutcome::ExecutorMissing(job_id)
            }
        }
    }

    /// Wait up to `grace` for in-flight executions.
    ///
    /// Returns how many were still running when the grace period ran out.
    /// Those keep their leases until the process exits, after which orphan
    /// recovery reclaims them.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("All executions finished");
            return 0;
        }

        let abandoned = self.tracker.len();
        warn!(abandoned, ?grace, "Executions still running after shutdown grace");
        abandoned
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn run_attempt(
    lease: Lease,
    executor: Arc<dyn Executor>,
    timeout: Duration,
    events: broadcast::Sender<SchedulerEvent>,
) {
    let job: Job = lease.job().clone();
    let started = Instant::now();
    let deadline = started + timeout;

    let lost = lease.lost().clone();
    let attempt = AssertUnwindSafe(executor.exec(deadline, &job)).catch_unwind();
    let outcome = tokio::select! {
        result = tokio::time::timeout_at(deadline, attempt) => match result {
            Ok(Ok(Ok(()))) => ExecutionOutcome::Succeeded,
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(e.to_string()),
            Ok(Err(panic)) => ExecutionOutcome::Panicked(panic_message(panic.as_ref())),
            Err(_) => ExecutionOutcome::TimedOut,
        },
        _ = lost.cancelled() => ExecutionOutcome::LeaseLost,
    };
    let elapsed = started.elapsed();

    match &outcome {
        ExecutionOutcome::Succeeded => {
            info!(job_id = %job.id, job = %job.name, ?elapsed, "Job succeeded")
        }
        ExecutionOutcome::Failed(message) => {
            error!(job_id = %job.id, job = %job.name, ?elapsed, error = %message, "Job failed")
        }
        ExecutionOutcome::TimedOut => {
            error!(job_id = %job.id, job = %job.name, ?timeout, "Job exceeded its deadline")
        }
        ExecutionOutcome::Panicked(message) => {
            error!(job_id = %job.id, job = %job.name, panic = %message, "Job panicked")
        }
        ExecutionOutcome::LeaseLost => {
            error!(job_id = %job.id, job = %job.name, ?elapsed, "Claim lost, abandoning execution")
        }
    }
    let _ = events.send(SchedulerEvent::ExecutionFinished {
        job_id: job.id,
        outcome,
        elapsed,
    });

    finish(lease, &events).await;
}

/// Release a lease and report how it went.
async fn finish(lease: Lease, events: &broadcast::Sender<SchedulerEvent>) {
    let job_id = lease.job_id();
    let event = match lease.release().await {
        Ok(next_time) => SchedulerEvent::Released { job_id, next_time },
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to release job");
            SchedulerEvent::ReleaseFailed {
                job_id,
                error: e.to_string(),
            }
        }
    };
    let _ = events.send(event);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
