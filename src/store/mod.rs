use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Budget, BudgetType, CreateBudget, CreateMessage, CreateSession, CreateTurn,
    CreateUsageAnalytics, Message, Session, UsageAnalytics,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryUsageStore;
pub use postgres::PgUsageStore;

/// Result of appending one message: the stored row, the session with its
/// refreshed aggregates, and every active budget after the cost was added.
#[derive(Debug, Clone)]
pub struct AppendedMessage {
    pub message: Message,
    pub session: Session,
    pub budgets: Vec<Budget>,
}

/// Result of recording a whole turn in one step.
#[derive(Debug, Clone)]
pub struct AppendedTurn {
    pub user: Message,
    pub assistant: Message,
    pub session: Session,
    pub budgets: Vec<Budget>,
}

/// Persistence for sessions, messages, budgets and the daily rollup.
///
/// `append_message` and `append_turn` are the only write paths for spend.
/// Implementations must insert the messages, bump the session aggregates,
/// apply any due budget reset and add the cost to active budgets as one
/// atomic step.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn create_session(&self, session: CreateSession) -> Result<Session, AppError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError>;

    /// Mark a session closed. Closing twice keeps the first `end_time`.
    async fn close_session(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError>;

    /// Fails with `NotFound` for an unknown session and `Validation` for a closed one.
    async fn append_message(&self, message: CreateMessage) -> Result<AppendedMessage, AppError>;

    /// Record both messages of a turn together.
    ///
    /// A closed session still accepts the turn, since it was admitted while the
    /// session was open and the provider has billed for it. Its `end_time` is
    /// left alone. Fails with `NotFound` for an unknown session and
    /// `Validation` when the two messages name different sessions.
    async fn append_turn(&self, turn: CreateTurn) -> Result<AppendedTurn, AppError>;

    /// Messages of a session in timestamp order, user before assistant on ties
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError>;

    /// Sessions created in `[start, end)`, oldest first
    async fn list_sessions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError>;

    /// Insert an active budget, deactivating any active budget of the same type.
    async fn create_budget(&self, budget: CreateBudget) -> Result<Budget, AppError>;

    async fn list_active_budgets(
        &self,
        budget_type: Option<BudgetType>,
    ) -> Result<Vec<Budget>, AppError>;

    async fn update_budget_limit(
        &self,
        id: Uuid,
        limit_amount: BigDecimal,
    ) -> Result<Option<Budget>, AppError>;

    /// Overwrite spend and next reset date, used by resets.
    async fn save_budget_period(
        &self,
        id: Uuid,
        current_spent: BigDecimal,
        reset_date: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError>;

    /// Zero the spend and move `reset_date` to `next`, but only while the budget
    /// is active and still due on `due`. `None` means someone else got there first.
    async fn roll_budget_period(
        &self,
        id: Uuid,
        due: NaiveDate,
        next: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError>;

    async fn deactivate_budget(&self, id: Uuid) -> Result<bool, AppError>;

    /// Replace rollup rows keyed by `(date, model_used)`.
    async fn upsert_usage_analytics(
        &self,
        rows: Vec<CreateUsageAnalytics>,
    ) -> Result<Vec<UsageAnalytics>, AppError>;

    /// Rollup rows with `from <= date <= to`, ordered by date then model
    async fn list_usage_analytics(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UsageAnalytics>, AppError>;
}
