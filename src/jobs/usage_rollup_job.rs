//! Hourly `usage_analytics` rollup.
//!
//! Recomputes yesterday and today so that late messages on sessions that
//! started before midnight are picked up. Rows are upserted per
//! `(date, model_used)`, so re-running is harmless.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::services::analytics_service;
use crate::services::job_scheduler_service::{JobContext, JobResult};

pub async fn rollup_recent_usage(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("📈 Rolling up recent usage analytics...");

    let today = Utc::now().date_naive();
    let mut processed = 0;
    let mut failed = 0;

    for date in [today - Duration::days(1), today] {
        match analytics_service::rollup_day(ctx.store.as_ref(), date).await {
            Ok(rows) => processed += i32::try_from(rows.len()).unwrap_or(i32::MAX),
            Err(e) => {
                failed += 1;
                warn!("❌ Failed to roll up usage for {}: {}", date, e);
            }
        }
    }

    Ok(JobResult { items_processed: processed, items_failed: failed })
}
