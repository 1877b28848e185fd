use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::{BudgetStatus, Session};

/// Daily rollup per model, derived from sessions
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageAnalytics {
    pub id: Uuid,
    pub date: NaiveDate,
    pub model_used: String,
    pub total_sessions: i32,
    pub total_messages: i32,
    pub total_cost: BigDecimal,
    pub avg_cost_per_session: BigDecimal,
    pub avg_tokens_per_message: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUsageAnalytics {
    pub date: NaiveDate,
    pub model_used: String,
    pub total_sessions: i32,
    pub total_messages: i32,
    pub total_cost: BigDecimal,
    pub avg_cost_per_session: BigDecimal,
    pub avg_tokens_per_message: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalUsage {
    pub period_days: u32,
    pub total_sessions: i64,
    pub total_cost: BigDecimal,
    pub total_messages: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub avg_cost_per_session: BigDecimal,
    pub avg_messages_per_session: f64,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingSummary {
    pub period_days: u32,
    pub total_spent: BigDecimal,
    pub total_sessions: i64,
    pub daily_average: BigDecimal,
    pub projected_monthly_spend: BigDecimal,
    pub daily_budget_status: BudgetStatus,
    pub monthly_budget_status: BudgetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEfficiency {
    pub model_used: String,
    pub sessions: i64,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub total_cost: BigDecimal,
    pub cost_per_session: f64,
    pub cost_per_message: f64,
    pub cost_per_token: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyReport {
    pub period_days: u32,
    pub total_cost: BigDecimal,
    pub total_sessions: i64,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub avg_cost_per_session: f64,
    pub avg_cost_per_message: f64,
    pub avg_cost_per_token: f64,
    pub most_efficient_model: Option<String>,
    pub models: Vec<ModelEfficiency>,
    pub recommendations: Vec<String>,
}
