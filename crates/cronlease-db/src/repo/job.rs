//! Job store.
//!
//! Every state transition is a single conditional `UPDATE` whose predicate
//! re-checks the current status, so concurrent workers never need a lock
//! beyond the row itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronlease_core::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A job row in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub cfg: String,
    pub executor: String,
    pub expression: String,
    pub status: String,
    pub next_time: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
    pub epoch: i64,
    pub c_time: DateTime<Utc>,
    pub u_time: DateTime<Utc>,
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> DbResult<Self> {
        let status: JobStatus = record
            .status
            .parse()
            .map_err(|e| DbError::InvalidRow(format!("job {}: {}", record.id, e)))?;
        Ok(Job {
            id: JobId::new(record.id),
            name: record.name,
            cfg: record.cfg,
            executor: record.executor,
            expression: record.expression,
            status,
            next_time: record.next_time,
            heartbeat: record.heartbeat,
            epoch: record.epoch,
            created_at: record.c_time,
            updated_at: record.u_time,
        })
    }
}

/// A job definition to seed into a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub cfg: String,
    pub executor: String,
    pub expression: String,
    pub next_time: DateTime<Utc>,
}

impl NewJob {
    pub fn new(
        name: impl Into<String>,
        executor: impl Into<String>,
        expression: impl Into<String>,
        next_time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            cfg: String::new(),
            executor: executor.into(),
            expression: expression.into(),
            next_time,
        }
    }

    pub fn with_cfg(mut self, cfg: impl Into<String>) -> Self {
        self.cfg = cfg.into();
        self
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Find one waiting job whose `next_time` is not after `now`.
    async fn select_due(&self, now: DateTime<Utc>) -> DbResult<Option<Job>>;

    /// Move a job from waiting to running, stamping its heartbeat and
    /// bumping its epoch.
    ///
    /// Returns the new epoch, or `None` when the row was no longer waiting,
    /// meaning another worker won the race.
    async fn try_claim(&self, id: JobId, now: DateTime<Utc>) -> DbResult<Option<i64>>;

    /// Advance the heartbeat of a job still running under `epoch`. Never
    /// moves it backwards.
    ///
    /// Returns `false` when the job is no longer running under that claim.
    async fn update_heartbeat(
        &self,
        id: JobId,
        epoch: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn update_next_time(&self, id: JobId, next_time: DateTime<Utc>) -> DbResult<()>;

    /// Return a running job to waiting without touching `next_time`,
    /// whoever holds it.
    async fn release(&self, id: JobId) -> DbResult<bool>;

    /// Return a job still running under `epoch` to waiting with a new
    /// `next_time`.
    async fn reschedule(
        &self,
        id: JobId,
        epoch: i64,
        next_time: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Force running jobs whose heartbeat is older than `cutoff` back to waiting.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<JobId>>;

    async fn get(&self, id: JobId) -> DbResult<Job>;

    async fn list(&self) -> DbResult<Vec<Job>>;
}

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a job definition.
    pub async fn create(&self, job: NewJob) -> DbResult<Job> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (name, cfg, executor, expression, status, next_time, heartbeat, c_time, u_time)
            VALUES ($1, $2, $3, $4, 'waiting', $5, NOW(), NOW(), NOW())
            ON CONFLICT (name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&job.name)
        .bind(&job.cfg)
        .bind(&job.executor)
        .bind(&job.expression)
        .bind(job.next_time)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::Duplicate(format!("job {}", job.name)))?;
        record.try_into()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn select_due(&self, now: DateTime<Utc>) -> DbResult<Option<Job>> {
        let record = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE status = 'waiting' AND next_time <= $1 LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Job::try_from).transpose()
    }

    async fn try_claim(&self, id: JobId, now: DateTime<Utc>) -> DbResult<Option<i64>> {
        let epoch = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE jobs SET status = 'running', heartbeat = $2, u_time = $2, epoch = epoch + 1
            WHERE id = $1 AND status = 'waiting'
            RETURNING epoch
            "#,
        )
        .bind(id.get())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(epoch)
    }

    async fn update_heartbeat(
        &self,
        id: JobId,
        epoch: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET heartbeat = GREATEST(heartbeat, $3), u_time = $3
            WHERE id = $1 AND status = 'running' AND epoch = $2
            "#,
        )
        .bind(id.get())
        .bind(epoch)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_next_time(&self, id: JobId, next_time: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE jobs SET next_time = $2, u_time = NOW() WHERE id = $1")
            .bind(id.get())
            .bind(next_time)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn release(&self, id: JobId) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'waiting', u_time = NOW() WHERE id = $1 AND status = 'running'",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reschedule(
        &self,
        id: JobId,
        epoch: i64,
        next_time: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'waiting', next_time = $3, u_time = NOW()
            WHERE id = $1 AND status = 'running' AND epoch = $2
            "#,
        )
        .bind(id.get())
        .bind(epoch)
        .bind(next_time)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<JobId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE jobs SET status = 'waiting', u_time = NOW()
            WHERE status = 'running' AND heartbeat < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(JobId::new).collect())
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?
            .try_into()
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(Job::try_from).collect()
    }
}
