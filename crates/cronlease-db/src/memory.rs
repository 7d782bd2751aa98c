//! In-memory job store.
//!
//! Mirrors the conditional-update semantics of the PostgreSQL store so the
//! lease protocol can run embedded or under test without a database. Each
//! method takes the table lock once, so `select_due` followed by
//! `try_claim` races exactly like two separate SQL statements do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronlease_core::{Job, JobId, JobStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{DbError, DbResult, JobStore, NewJob};

#[derive(Default)]
struct Table {
    rows: BTreeMap<JobId, Job>,
    next_id: i64,
}

/// Job store backed by a map guarded by a mutex.
#[derive(Default)]
pub struct MemoryJobStore {
    table: Mutex<Table>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a waiting job definition.
    pub async fn insert(&self, job: NewJob) -> DbResult<Job> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        if table.rows.values().any(|j| j.name == job.name) {
            return Err(DbError::Duplicate(format!("job {}", job.name)));
        }

        table.next_id += 1;
        let now = Utc::now();
        let record = Job {
            id: JobId::new(table.next_id),
            name: job.name,
            cfg: job.cfg,
            executor: job.executor,
            expression: job.expression,
            status: JobStatus::Waiting,
            next_time: job.next_time,
            heartbeat: now,
            epoch: 0,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    /// Overwrite the status of a row, bypassing the lease predicates.
    pub async fn set_status(&self, id: JobId, status: JobStatus) -> DbResult<()> {
        let mut table = self.table.lock().await;
        let job = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        job.status = status;
        Ok(())
    }

    /// Simulate the store going away. Every call fails with
    /// `DbError::Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> DbResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn select_due(&self, now: DateTime<Utc>) -> DbResult<Option<Job>> {
        self.check_available()?;
        let table = self.table.lock().await;
        Ok(table.rows.values().find(|j| j.is_due(now)).cloned())
    }

    async fn try_claim(&self, id: JobId, now: DateTime<Utc>) -> DbResult<Option<i64>> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::Waiting => {
                job.status = JobStatus::Running;
                job.heartbeat = now;
                job.updated_at = now;
                job.epoch += 1;
                Ok(Some(job.epoch))
            }
            _ => {
                debug!(job_id = %id, "Conditional claim matched no rows");
                Ok(None)
            }
        }
    }

    async fn update_heartbeat(
        &self,
        id: JobId,
        epoch: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && job.epoch == epoch => {
                job.heartbeat = job.heartbeat.max(at);
                job.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_next_time(&self, id: JobId, next_time: DateTime<Utc>) -> DbResult<()> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        let job = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        job.next_time = next_time;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn release(&self, id: JobId) -> DbResult<bool> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Waiting;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reschedule(
        &self,
        id: JobId,
        epoch: i64,
        next_time: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && job.epoch == epoch => {
                job.status = JobStatus::Waiting;
                job.next_time = next_time;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<JobId>> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for job in table.rows.values_mut() {
            if job.status == JobStatus::Running && job.heartbeat < cutoff {
                job.status = JobStatus::Waiting;
                job.updated_at = now;
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        self.check_available()?;
        let table = self.table.lock().await;
        table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        self.check_available()?;
        let table = self.table.lock().await;
        Ok(table.rows.values().cloned().collect())
    }
}
