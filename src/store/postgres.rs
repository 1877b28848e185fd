use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use super::{AppendedMessage, AppendedTurn, UsageStore};
use crate::db::{analytics_queries, budget_queries, message_queries, session_queries};
use crate::errors::AppError;
use crate::models::{
    Budget, BudgetType, CreateBudget, CreateMessage, CreateSession, CreateTurn,
    CreateUsageAnalytics, Message, Session, UsageAnalytics,
};

/// PostgreSQL-backed store; schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                AppError::External(format!("Migration failed: {}", e))
            })?;
        info!("✅ Database migrations applied");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn budgets(rows: Vec<budget_queries::BudgetRow>) -> Result<Vec<Budget>, AppError> {
    rows.into_iter().map(TryInto::try_into).collect()
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn create_session(&self, session: CreateSession) -> Result<Session, AppError> {
        Ok(session_queries::create_session(&self.pool, session).await?)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        Ok(session_queries::get_session(&self.pool, session_id).await?)
    }

    async fn close_session(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        Ok(session_queries::close_session(&self.pool, session_id, end_time).await?)
    }

    async fn append_message(&self, message: CreateMessage) -> Result<AppendedMessage, AppError> {
        message_queries::append_message(&self.pool, message).await
    }

    async fn append_turn(&self, turn: CreateTurn) -> Result<AppendedTurn, AppError> {
        message_queries::append_turn(&self.pool, turn).await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        message_queries::list_messages(&self.pool, session_id)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn list_sessions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        Ok(session_queries::list_sessions_between(&self.pool, start, end).await?)
    }

    async fn create_budget(&self, budget: CreateBudget) -> Result<Budget, AppError> {
        budget_queries::create_budget(&self.pool, budget).await?.try_into()
    }

    async fn list_active_budgets(
        &self,
        budget_type: Option<BudgetType>,
    ) -> Result<Vec<Budget>, AppError> {
        budgets(budget_queries::list_active_budgets(&self.pool, budget_type).await?)
    }

    async fn update_budget_limit(
        &self,
        id: Uuid,
        limit_amount: BigDecimal,
    ) -> Result<Option<Budget>, AppError> {
        budget_queries::update_limit(&self.pool, id, limit_amount)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn save_budget_period(
        &self,
        id: Uuid,
        current_spent: BigDecimal,
        reset_date: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError> {
        budget_queries::save_period(&self.pool, id, current_spent, reset_date)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn roll_budget_period(
        &self,
        id: Uuid,
        due: NaiveDate,
        next: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError> {
        budget_queries::roll_period(&self.pool, id, due, next)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn deactivate_budget(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(budget_queries::deactivate(&self.pool, id).await?)
    }

    async fn upsert_usage_analytics(
        &self,
        rows: Vec<CreateUsageAnalytics>,
    ) -> Result<Vec<UsageAnalytics>, AppError> {
        Ok(analytics_queries::upsert_usage_analytics(&self.pool, rows).await?)
    }

    async fn list_usage_analytics(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UsageAnalytics>, AppError> {
        Ok(analytics_queries::list_usage_analytics(&self.pool, from, to).await?)
    }
}
