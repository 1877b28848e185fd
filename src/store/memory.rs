use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::Zero;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::{AppendedMessage, AppendedTurn, UsageStore};
use crate::errors::AppError;
use crate::models::{
    truncate_content, Budget, BudgetType, CreateBudget, CreateMessage, CreateSession, CreateTurn,
    CreateUsageAnalytics, Message, Session, UsageAnalytics,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    messages: Vec<Message>,
    budgets: Vec<Budget>,
    analytics: Vec<UsageAnalytics>,
}

impl Inner {
    /// Store `messages`, bump the session and charge active budgets, all under
    /// one lock. Due resets are applied before the charge.
    fn record<const N: usize>(
        &mut self,
        session_id: &str,
        messages: [CreateMessage; N],
        allow_closed: bool,
    ) -> Result<([Message; N], Session, Vec<Budget>), AppError> {
        let session = self.sessions.get_mut(session_id).ok_or(AppError::NotFound)?;
        if session.is_closed && !allow_closed {
            return Err(AppError::Validation(format!("Session {} is closed", session_id)));
        }

        let now = Utc::now();
        let rows = messages.map(|m| Message {
            id: Uuid::new_v4(),
            session_id: m.session_id,
            message_type: m.message_type,
            input_tokens: m.input_tokens,
            output_tokens: m.output_tokens,
            cost: m.cost,
            timestamp: now,
            model_used: m.model_used,
            content: truncate_content(&m.content),
        });

        let mut cost = BigDecimal::zero();
        for row in &rows {
            session.total_messages += 1;
            session.total_input_tokens += row.input_tokens;
            session.total_output_tokens += row.output_tokens;
            cost = &cost + &row.cost;
        }
        session.total_cost = &session.total_cost + &cost;
        if !session.is_closed {
            session.end_time = Some(now);
        }
        let session = session.clone();

        let today = now.date_naive();
        let mut budgets = Vec::new();
        for budget in self.budgets.iter_mut().filter(|b| b.is_active) {
            budget.apply_due_reset(today);
            budget.current_spent = &budget.current_spent + &cost;
            budgets.push(budget.clone());
        }

        self.messages.extend(rows.iter().cloned());
        Ok((rows, session, budgets))
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryUsageStore {
    inner: Mutex<Inner>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn create_session(&self, session: CreateSession) -> Result<Session, AppError> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&session.session_id) {
            return Err(AppError::Validation(format!(
                "Session {} already exists",
                session.session_id
            )));
        }

        let row = Session {
            id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            start_time: session.start_time,
            end_time: None,
            model_used: session.model_used,
            total_messages: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: BigDecimal::zero(),
            is_closed: false,
            created_at: session.start_time,
        };
        inner.sessions.insert(session.session_id, row.clone());
        Ok(row)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        Ok(self.inner.lock().sessions.get(session_id).cloned())
    }

    async fn close_session(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner.sessions.get_mut(session_id).map(|s| {
            if !s.is_closed {
                s.is_closed = true;
                s.end_time = Some(end_time);
            }
            s.clone()
        }))
    }

    async fn append_message(&self, message: CreateMessage) -> Result<AppendedMessage, AppError> {
        let session_id = message.session_id.clone();
        let ([message], session, budgets) = self.inner.lock().record(&session_id, [message], false)?;
        Ok(AppendedMessage { message, session, budgets })
    }

    async fn append_turn(&self, turn: CreateTurn) -> Result<AppendedTurn, AppError> {
        if turn.user.session_id != turn.assistant.session_id {
            return Err(AppError::Validation(
                "Both messages of a turn must belong to one session".to_string(),
            ));
        }

        let session_id = turn.user.session_id.clone();
        let ([user, assistant], session, budgets) =
            self.inner.lock().record(&session_id, [turn.user, turn.assistant], true)?;
        Ok(AppendedTurn { user, assistant, session, budgets })
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let inner = self.inner.lock();
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn list_sessions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let inner = self.inner.lock();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.created_at >= start && s.created_at < end)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn create_budget(&self, budget: CreateBudget) -> Result<Budget, AppError> {
        let mut inner = self.inner.lock();
        for existing in inner
            .budgets
            .iter_mut()
            .filter(|b| b.is_active && b.budget_type == budget.budget_type)
        {
            existing.is_active = false;
        }

        let row = Budget {
            id: Uuid::new_v4(),
            budget_type: budget.budget_type,
            limit_amount: budget.limit_amount,
            current_spent: BigDecimal::zero(),
            reset_date: budget.reset_date,
            is_active: true,
            created_at: Utc::now(),
        };
        inner.budgets.push(row.clone());
        Ok(row)
    }

    async fn list_active_budgets(
        &self,
        budget_type: Option<BudgetType>,
    ) -> Result<Vec<Budget>, AppError> {
        let inner = self.inner.lock();
        Ok(inner
            .budgets
            .iter()
            .filter(|b| b.is_active && budget_type.map_or(true, |t| b.budget_type == t))
            .cloned()
            .collect())
    }

    async fn update_budget_limit(
        &self,
        id: Uuid,
        limit_amount: BigDecimal,
    ) -> Result<Option<Budget>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner.budgets.iter_mut().find(|b| b.id == id).map(|b| {
            b.limit_amount = limit_amount;
            b.clone()
        }))
    }

    async fn save_budget_period(
        &self,
        id: Uuid,
        current_spent: BigDecimal,
        reset_date: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner.budgets.iter_mut().find(|b| b.id == id).map(|b| {
            b.current_spent = current_spent;
            b.reset_date = reset_date;
            b.clone()
        }))
    }

    async fn roll_budget_period(
        &self,
        id: Uuid,
        due: NaiveDate,
        next: Option<NaiveDate>,
    ) -> Result<Option<Budget>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner
            .budgets
            .iter_mut()
            .find(|b| b.id == id && b.is_active && b.reset_date == Some(due))
            .map(|b| {
                b.current_spent = BigDecimal::zero();
                b.reset_date = next;
                b.clone()
            }))
    }

    async fn deactivate_budget(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock();
        match inner.budgets.iter_mut().find(|b| b.id == id && b.is_active) {
            Some(b) => {
                b.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_usage_analytics(
        &self,
        rows: Vec<CreateUsageAnalytics>,
    ) -> Result<Vec<UsageAnalytics>, AppError> {
        let mut inner = self.inner.lock();
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            inner
                .analytics
                .retain(|a| !(a.date == row.date && a.model_used == row.model_used));
            let record = UsageAnalytics {
                id: Uuid::new_v4(),
                date: row.date,
                model_used: row.model_used,
                total_sessions: row.total_sessions,
                total_messages: row.total_messages,
                total_cost: row.total_cost,
                avg_cost_per_session: row.avg_cost_per_session,
                avg_tokens_per_message: row.avg_tokens_per_message,
                created_at: Utc::now(),
            };
            inner.analytics.push(record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    async fn list_usage_analytics(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UsageAnalytics>, AppError> {
        let inner = self.inner.lock();
        let mut rows: Vec<UsageAnalytics> = inner
            .analytics
            .iter()
            .filter(|a| a.date >= from && a.date <= to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.model_used.cmp(&b.model_used)));
        Ok(rows)
    }
}
