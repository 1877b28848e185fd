//! Background jobs run by the job scheduler service.
//!
//! - `budget_reset_job` - zeroes daily/monthly budgets whose reset date has arrived
//! - `usage_rollup_job` - recomputes the per-model `usage_analytics` rollup
//!
//! Jobs are idempotent and log their own failures; a failing job never stops
//! the scheduler.

pub mod budget_reset_job;
pub mod usage_rollup_job;
