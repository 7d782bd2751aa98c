//! The job entity and its lease state machine.
//!
//! A job row moves `Waiting -> Running` when a worker claims it and
//! `Running -> Waiting` when that worker releases it. `Paused` is set by
//! operators and is never touched by the scheduler.

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, JobId, Result};

/// Lease state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Eligible for claiming once `next_time` has passed.
    Waiting,
    /// Claimed by exactly one worker.
    Running,
    /// Administratively disabled.
    Paused,
}

impl JobStatus {
    /// The persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            other => Err(Error::InvalidInput(format!("unknown job status: {}", other))),
        }
    }
}

/// A periodic job definition together with its lease columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Unique human name; `LocalExecutor` dispatches on it.
    pub name: String,
    /// Opaque payload interpreted only by the executor.
    pub cfg: String,
    /// Executor-kind key looked up in the registry.
    pub executor: String,
    /// Seconds-first cron expression.
    pub expression: String,
    pub status: JobStatus,
    pub next_time: DateTime<Utc>,
    /// Last liveness proof written by the lease holder.
    pub heartbeat: DateTime<Utc>,
    /// Bumped by every claim. Lease writes carry the epoch they claimed,
    /// so a superseded holder matches no rows.
    pub epoch: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Parse this job's cron expression.
    pub fn schedule(&self) -> Result<Schedule> {
        parse_schedule(&self.expression)
    }

    /// Next occurrence of the schedule strictly after `reference`.
    pub fn next_time_after(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.schedule()?
            .after(&reference)
            .next()
            .ok_or_else(|| Error::InvalidSchedule {
                expression: self.expression.clone(),
                message: "no future occurrence".to_string(),
            })
    }

    /// Whether the job can be claimed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.next_time <= now
    }

    /// Whether a running job's heartbeat is older than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let Ok(stale_after) = TimeDelta::from_std(stale_after) else {
            return false;
        };
        self.status == JobStatus::Running && self.heartbeat < now - stale_after
    }
}

/// Parse a cron expression, accepting the Quartz `?` placeholder as "any".
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let normalized = expression.trim().replace('?', "*");
    Schedule::from_str(&normalized).map_err(|e| Error::InvalidSchedule {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_job(expression: &str) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(1),
            name: "daily-report".to_string(),
            cfg: String::new(),
            executor: "local".to_string(),
            expression: expression.to_string(),
            status: JobStatus::Waiting,
            next_time: now,
            heartbeat: now,
            epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_round_trips_through_column_value() {
        for status in [JobStatus::Waiting, JobStatus::Running, JobStatus::Paused] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(matches!(
            "stopped".parse::<JobStatus>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_next_time_within_ten_seconds() {
        let job = make_job("*/10 * * * * ?");
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap();

        let next = job.next_time_after(t).unwrap();
        assert!(next > t);
        assert!(next <= t + TimeDelta::seconds(10));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap());
    }

    #[test]
    fn test_next_time_is_strictly_after_boundary() {
        let job = make_job("*/10 * * * * *");
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap();

        let next = job.next_time_after(t).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 20).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let job = make_job("every tuesday");
        let err = job.next_time_after(Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchedule { .. }));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut job = make_job("0 * * * * *");
        job.next_time = now - TimeDelta::seconds(1);
        assert!(job.is_due(now));

        job.next_time = now + TimeDelta::seconds(1);
        assert!(!job.is_due(now));

        job.next_time = now;
        job.status = JobStatus::Running;
        assert!(!job.is_due(now));

        job.status = JobStatus::Paused;
        assert!(!job.is_due(now));
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let mut job = make_job("0 * * * * *");
        job.status = JobStatus::Running;
        job.heartbeat = now - TimeDelta::seconds(120);
        assert!(job.is_stale(now, Duration::from_secs(90)));

        job.heartbeat = now - TimeDelta::seconds(30);
        assert!(!job.is_stale(now, Duration::from_secs(90)));

        job.heartbeat = now - TimeDelta::seconds(120);
        job.status = JobStatus::Waiting;
        assert!(!job.is_stale(now, Duration::from_secs(90)));
    }
}
