use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::Message;

/// One continuous chat interaction with its accumulated usage totals.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub model_used: String,
    pub total_messages: i32,
    pub total_input_tokens: i32,
    pub total_output_tokens: i32,
    pub total_cost: BigDecimal,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a session row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSession {
    pub session_id: String,
    pub model_used: String,
    pub start_time: DateTime<Utc>,
}

impl CreateSession {
    /// Build a session for `model` with an id like `session_20240115_093000_1a2b3c4d`.
    pub fn new(model_used: impl Into<String>, now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            session_id: format!("session_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            model_used: model_used.into(),
            start_time: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    pub avg_cost_per_message: BigDecimal,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub model: Option<String>,
}
