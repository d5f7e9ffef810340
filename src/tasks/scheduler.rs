use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::stats::StatsRecorder;

/// Registers the daily-counter rollover on every cron spec, catches up on a
/// day change missed while stopped, and starts the scheduler.
pub async fn configure_rollover_jobs(
    cron_specs: &[String],
    recorder: Arc<StatsRecorder>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    for spec in cron_specs {
        let label = spec.clone();
        let recorder = recorder.clone();
        let job = Job::new_async(spec.as_str(), move |_id, _l| {
            let recorder = recorder.clone();
            let cron_label = label.clone();
            Box::pin(async move {
                tracing::debug!(target: "scheduler", cron = %cron_label, "stats rollover triggered");
                if let Err(err) = recorder.roll_over().await {
                    tracing::error!(target: "scheduler", error = %err, "stats rollover failed");
                }
            })
        })?;
        scheduler.add(job).await?;
        tracing::info!(target: "scheduler", cron = %spec, "stats rollover job registered");
    }
    if let Err(err) = recorder.roll_over().await {
        tracing::warn!(target: "scheduler", error = %err, "startup stats rollover failed");
    }
    scheduler.start().await?;
    Ok(scheduler)
}
