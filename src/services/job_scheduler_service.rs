use crate::errors::AppError;
use crate::jobs::{budget_reset_job, usage_rollup_job};
use crate::store::UsageStore;
use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

// Context passed to job functions
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn UsageStore>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
}

pub struct JobSchedulerService {
    scheduler: JobScheduler,
    context: JobContext,
    test_mode: bool,
}

impl JobSchedulerService {
    pub async fn new(store: Arc<dyn UsageStore>, test_mode: bool) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            context: JobContext { store },
            test_mode,
        })
    }

    /// Register all jobs and start ticking
    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting job scheduler...");

        if self.test_mode {
            info!("⚠️  JOB SCHEDULER IN TEST MODE - Jobs will run every minute!");
        }

        // Cron format: sec min hour day month weekday (UTC)
        let (reset_schedule, reset_desc) = if self.test_mode {
            ("0 */1 * * * *", "Every minute (TEST MODE)")
        } else {
            ("0 1 0 * * *", "Daily at 00:01 UTC")
        };
        self.schedule_job(reset_schedule, "reset_due_budgets", reset_desc, budget_reset_job::reset_due_budgets)
            .await?;

        let (rollup_schedule, rollup_desc) = if self.test_mode {
            ("30 */1 * * * *", "Every minute at :30s (TEST MODE)")
        } else {
            ("0 15 * * * *", "Every hour at :15")
        };
        self.schedule_job(rollup_schedule, "rollup_usage_analytics", rollup_desc, usage_rollup_job::rollup_recent_usage)
            .await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Job scheduler started successfully with 2 jobs");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping job scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        info!("✅ Job scheduler stopped");
        Ok(())
    }

    async fn schedule_job<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        description: &str,
        job_fn: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<JobResult, AppError>> + Send + 'static,
    {
        let context = self.context.clone();
        let job_fn = Arc::new(job_fn);

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let job_fn = job_fn.clone();
            Box::pin(async move {
                execute_job_with_tracking(job_name, context, job_fn).await;
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled: {} - {} [cron: {}]", job_name, description, schedule);
        Ok(())
    }
}

/// Run one job, logging its duration and outcome. Failures never escape.
pub async fn execute_job_with_tracking<F, Fut>(
    job_name: &str,
    context: JobContext,
    job_fn: Arc<F>,
) -> Option<JobResult>
where
    F: Fn(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<JobResult, AppError>>,
{
    info!("🏃 Starting job: {}", job_name);
    let started_at = Utc::now();

    let result = job_fn(context).await;
    let duration_ms = (Utc::now() - started_at).num_milliseconds();

    match result {
        Ok(job_result) => {
            info!(
                "✅ Job completed: {} (processed: {}, failed: {}, duration: {}ms)",
                job_name, job_result.items_processed, job_result.items_failed, duration_ms
            );
            Some(job_result)
        }
        Err(e) => {
            error!("❌ Job failed: {} - {} (duration: {}ms)", job_name, e, duration_ms);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUsageStore;

    #[tokio::test]
    async fn test_tracking_swallows_job_errors() {
        let context = JobContext { store: Arc::new(MemoryUsageStore::new()) };

        let failing = Arc::new(|_ctx: JobContext| async { Err::<JobResult, _>(AppError::External("boom".into())) });
        assert!(execute_job_with_tracking("failing", context.clone(), failing).await.is_none());

        let passing = Arc::new(|_ctx: JobContext| async { Ok(JobResult { items_processed: 3, items_failed: 0 }) });
        assert_eq!(
            execute_job_with_tracking("passing", context, passing).await,
            Some(JobResult { items_processed: 3, items_failed: 0 })
        );
    }
}
