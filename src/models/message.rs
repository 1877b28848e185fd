use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

/// Stored message content is capped at this many characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Assistant,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageType::User),
            "assistant" => Ok(MessageType::Assistant),
            other => Err(format!("Invalid message type: {}", other)),
        }
    }
}

/// A single logged message. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: String,
    pub message_type: MessageType,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub model_used: String,
    pub content: String,
}

/// Input for appending a message to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub session_id: String,
    pub message_type: MessageType,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost: BigDecimal,
    pub model_used: String,
    pub content: String,
}

/// Both halves of one chat turn, recorded together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTurn {
    pub user: CreateMessage,
    pub assistant: CreateMessage,
}

impl CreateTurn {
    pub fn total_cost(&self) -> BigDecimal {
        &self.user.cost + &self.assistant.cost
    }
}

/// Truncate content on a char boundary so it fits the stored column.
pub fn truncate_content(content: &str) -> String {
    content.chars().take(MAX_CONTENT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trips_through_str() {
        assert_eq!("user".parse::<MessageType>().unwrap(), MessageType::User);
        assert_eq!(MessageType::Assistant.to_string(), "assistant");
        assert!("system".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_truncate_content_respects_char_boundaries() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 10);
        let truncated = truncate_content(&long);
        assert_eq!(truncated.chars().count(), MAX_CONTENT_CHARS);

        assert_eq!(truncate_content("short"), "short");
    }
}
