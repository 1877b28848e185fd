//! Daily budget reset.
//!
//! Runs shortly after midnight UTC and zeroes every daily or monthly budget
//! whose `reset_date` has arrived. Budgets are also reset lazily whenever a
//! check runs, so a missed tick only delays the stored figures, never the
//! enforcement.

use chrono::Utc;
use tracing::info;

use crate::errors::AppError;
use crate::services::budget_service;
use crate::services::job_scheduler_service::{JobContext, JobResult};

pub async fn reset_due_budgets(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("🔄 Checking for budgets due a reset...");

    let reset = budget_service::reset_due(ctx.store.as_ref(), Utc::now().date_naive()).await?;
    for budget in &reset {
        info!("🔄 {} budget {} reset, next reset {:?}", budget.budget_type, budget.id, budget.reset_date);
    }

    Ok(JobResult {
        items_processed: i32::try_from(reset.len()).unwrap_or(i32::MAX),
        items_failed: 0,
    })
}
