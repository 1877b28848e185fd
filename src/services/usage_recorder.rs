use bigdecimal::Zero;
use chrono::Utc;
use serde::Serialize;
use sqlx::types::BigDecimal;
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{
    Budget, CreateMessage, CreateSession, CreateTurn, Message, MessageType, ModelCatalog, Session,
    SessionSummary, TokenUsage,
};
use crate::services::cost_service;
use crate::store::UsageStore;

/// One message to account for
#[derive(Debug, Clone)]
pub struct RecordMessage {
    pub message_type: MessageType,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedMessage {
    pub message: Message,
    pub session: Session,
    /// Active budgets after the cost was added
    pub budgets: Vec<Budget>,
}

/// Both sides of a finished turn. Input tokens are billed on the user
/// message and output tokens on the assistant message.
#[derive(Debug, Clone)]
pub struct RecordTurn {
    pub model: String,
    pub usage: TokenUsage,
    pub user_text: String,
    pub reply: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedTurn {
    pub user_message: Message,
    pub assistant_message: Message,
    pub session: Session,
    pub budgets: Vec<Budget>,
}

impl RecordedTurn {
    pub fn cost(&self) -> BigDecimal {
        &self.user_message.cost + &self.assistant_message.cost
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32, AppError> {
    i32::try_from(value).map_err(|_| AppError::Validation(format!("{} out of range: {}", what, value)))
}

pub async fn start_session(
    store: &dyn UsageStore,
    catalog: &ModelCatalog,
    model: &str,
) -> Result<Session, AppError> {
    catalog.resolve(model)?;

    let session = store
        .create_session(CreateSession::new(model, Utc::now()))
        .await
        .map_err(|e| {
            error!("Failed to create session for model {}: {}", model, e);
            e
        })?;

    info!("🆕 Started session {} (model: {})", session.session_id, model);
    Ok(session)
}

/// Price one message and persist it together with the session and budget totals.
pub async fn record_message(
    store: &dyn UsageStore,
    catalog: &ModelCatalog,
    session_id: &str,
    input: RecordMessage,
) -> Result<RecordedMessage, AppError> {
    let cost = cost_service::calculate_message_cost(catalog, &input.model, input.input_tokens, input.output_tokens)
        .ok_or_else(|| AppError::Validation(format!("Unknown model: {}", input.model)))?;

    let appended = store
        .append_message(CreateMessage {
            session_id: session_id.to_string(),
            message_type: input.message_type,
            input_tokens: to_i32(input.input_tokens, "input_tokens")?,
            output_tokens: to_i32(input.output_tokens, "output_tokens")?,
            cost: cost.total_cost,
            model_used: input.model,
            content: input.content,
        })
        .await
        .map_err(|e| {
            error!("Failed to record {} message in {}: {}", input.message_type, session_id, e);
            e
        })?;

    info!(
        "💰 Recorded {} message in {}: {} in / {} out tokens, cost {} (session total {})",
        appended.message.message_type,
        session_id,
        appended.message.input_tokens,
        appended.message.output_tokens,
        appended.message.cost,
        appended.session.total_cost
    );

    Ok(RecordedMessage {
        message: appended.message,
        session: appended.session,
        budgets: appended.budgets,
    })
}

/// Price and persist a whole turn in one store operation.
///
/// The session may have been closed while the reply streamed; the turn is
/// still recorded since the provider has already billed it.
pub async fn record_turn(
    store: &dyn UsageStore,
    catalog: &ModelCatalog,
    session_id: &str,
    turn: RecordTurn,
) -> Result<RecordedTurn, AppError> {
    let price = |input, output| {
        cost_service::calculate_message_cost(catalog, &turn.model, input, output)
            .ok_or_else(|| AppError::Validation(format!("Unknown model: {}", turn.model)))
    };
    let user_cost = price(turn.usage.input_tokens, 0)?;
    let assistant_cost = price(0, turn.usage.output_tokens)?;

    let appended = store
        .append_turn(CreateTurn {
            user: CreateMessage {
                session_id: session_id.to_string(),
                message_type: MessageType::User,
                input_tokens: to_i32(turn.usage.input_tokens, "input_tokens")?,
                output_tokens: 0,
                cost: user_cost.total_cost,
                model_used: turn.model.clone(),
                content: turn.user_text,
            },
            assistant: CreateMessage {
                session_id: session_id.to_string(),
                message_type: MessageType::Assistant,
                input_tokens: 0,
                output_tokens: to_i32(turn.usage.output_tokens, "output_tokens")?,
                cost: assistant_cost.total_cost,
                model_used: turn.model,
                content: turn.reply,
            },
        })
        .await
        .map_err(|e| {
            error!("Failed to record turn in {}: {}", session_id, e);
            e
        })?;

    let recorded = RecordedTurn {
        user_message: appended.user,
        assistant_message: appended.assistant,
        session: appended.session,
        budgets: appended.budgets,
    };
    info!(
        "💰 Recorded turn in {}: {} in / {} out tokens{}, cost {} (session total {})",
        session_id,
        turn.usage.input_tokens,
        turn.usage.output_tokens,
        if turn.usage.estimated { " (estimated)" } else { "" },
        recorded.cost(),
        recorded.session.total_cost
    );
    Ok(recorded)
}

/// Close a session. Closing an already closed session is a no-op.
pub async fn end_session(store: &dyn UsageStore, session_id: &str) -> Result<Session, AppError> {
    let session = store
        .close_session(session_id, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;

    info!(
        "🏁 Closed session {} ({} messages, cost {})",
        session.session_id, session.total_messages, session.total_cost
    );
    Ok(session)
}

pub async fn get_session(store: &dyn UsageStore, session_id: &str) -> Result<Session, AppError> {
    store.get_session(session_id).await?.ok_or(AppError::NotFound)
}

pub async fn session_summary(store: &dyn UsageStore, session_id: &str) -> Result<SessionSummary, AppError> {
    let session = get_session(store, session_id).await?;
    let messages = store.list_messages(session_id).await?;

    let avg_cost_per_message = if session.total_messages > 0 {
        (&session.total_cost / BigDecimal::from(session.total_messages)).round(cost_service::COST_SCALE)
    } else {
        BigDecimal::zero()
    };

    Ok(SessionSummary {
        session,
        avg_cost_per_message,
        messages,
    })
}
