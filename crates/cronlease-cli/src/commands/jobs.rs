//! Job inspection and administration.

use anyhow::{Context as _, Result};
use cronlease_core::{Job, JobId};
use cronlease_db::JobStore;

use super::Context;

pub async fn list(ctx: &Context) -> Result<()> {
    let store = ctx.store().await?;
    let jobs = store.list().await?;
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!(
        "{:<8} {:<24} {:<10} {:<16} {:<20} NEXT RUN",
        "ID", "NAME", "STATUS", "EXECUTOR", "SCHEDULE"
    );
    for job in jobs {
        println!(
            "{:<8} {:<24} {:<10} {:<16} {:<20} {}",
            job.id,
            job.name,
            job.status,
            job.executor,
            job.expression,
            job.next_time.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let job = ctx.store().await?.get(id).await?;
    print_job(&job);
    Ok(())
}

/// Administrative release: return a running job to waiting, keeping its
/// `next_time` so it is picked up again if already due.
pub async fn release(ctx: &Context, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let store = ctx.store().await?;
    if store.release(id).await? {
        println!("Released job {}", id);
    } else {
        let job = store.get(id).await?;
        println!("Job {} is {}, nothing to release", id, job.status);
    }
    Ok(())
}

fn parse_id(id: &str) -> Result<JobId> {
    id.parse().with_context(|| format!("Invalid job id: {}", id))
}

fn print_job(job: &Job) {
    println!("Job {}", job.id);
    println!("  name:      {}", job.name);
    println!("  status:    {}", job.status);
    println!("  executor:  {}", job.executor);
    println!("  schedule:  {}", job.expression);
    println!("  next run:  {}", job.next_time);
    println!("  heartbeat: {}", job.heartbeat);
    println!("  epoch:     {}", job.epoch);
    println!("  created:   {}", job.created_at);
    println!("  updated:   {}", job.updated_at);
    if !job.cfg.is_empty() {
        println!("  cfg:       {}", job.cfg);
    }
}
