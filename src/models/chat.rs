use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

use super::{BudgetCheck, Message, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation sent to the completion API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Token counts for one completed exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// True when the provider did not report usage and counts were estimated locally
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCost {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub input_cost: BigDecimal,
    pub output_cost: BigDecimal,
    pub total_cost: BigDecimal,
}

/// Request body for a chat turn. `history` is the conversation so far,
/// excluding the system prompt, which the server supplies.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub content: String,
}

/// What a finished turn recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub usage: TokenUsage,
    pub user_message: Message,
    pub assistant_message: Message,
    pub session: Session,
    pub cost: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostComparisonRow {
    pub model_id: String,
    pub model_name: String,
    pub provider: String,
    pub emoji: String,
    pub input_cost_per_million: BigDecimal,
    pub output_cost_per_million: BigDecimal,
    pub messages_per_session: u32,
    pub input_tokens_per_message: u32,
    pub output_tokens_per_message: u32,
    pub total_cost_per_session: BigDecimal,
    pub cost_per_million: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightCheck {
    pub estimated_input_tokens: u32,
    pub max_output_tokens: u32,
    pub estimated_cost: BigDecimal,
    pub budget: BudgetCheck,
}
