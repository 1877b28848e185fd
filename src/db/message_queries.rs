use bigdecimal::Zero;
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgConnection, PgPool};
use tracing::error;
use uuid::Uuid;

use crate::db::budget_queries;
use crate::errors::AppError;
use crate::models::{truncate_content, CreateMessage, CreateTurn, Message, Session};
use crate::store::{AppendedMessage, AppendedTurn};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: String,
    pub message_type: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub model_used: String,
    pub content: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            message_type: row.message_type.parse()?,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            cost: row.cost,
            timestamp: row.timestamp,
            model_used: row.model_used,
            content: row.content,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLock {
    is_closed: bool,
}

async fn lock_session(conn: &mut PgConnection, session_id: &str) -> Result<SessionLock, AppError> {
    sqlx::query_as::<_, SessionLock>(
        r#"
        SELECT is_closed
        FROM sessions
        WHERE session_id = $1
        FOR UPDATE
        "#
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound)
}

async fn insert_message(conn: &mut PgConnection, message: &CreateMessage) -> Result<MessageRow, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (session_id, message_type, input_tokens, output_tokens, cost, model_used, content)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, session_id, message_type, input_tokens, output_tokens, cost, timestamp, model_used, content
        "#
    )
    .bind(&message.session_id)
    .bind(message.message_type.as_str())
    .bind(message.input_tokens)
    .bind(message.output_tokens)
    .bind(&message.cost)
    .bind(&message.model_used)
    .bind(truncate_content(&message.content))
    .fetch_one(&mut *conn)
    .await
}

/// Fold `rows` into the session aggregates. A closed session keeps its `end_time`.
async fn bump_session(
    conn: &mut PgConnection,
    session_id: &str,
    rows: &[MessageRow],
) -> Result<Session, sqlx::Error> {
    let input_tokens: i32 = rows.iter().map(|r| r.input_tokens).sum();
    let output_tokens: i32 = rows.iter().map(|r| r.output_tokens).sum();
    let cost = rows.iter().fold(BigDecimal::zero(), |acc, r| acc + &r.cost);
    let last_seen = rows.iter().map(|r| r.timestamp).max().unwrap_or_else(Utc::now);

    sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions
        SET total_messages = total_messages + $2,
            total_input_tokens = total_input_tokens + $3,
            total_output_tokens = total_output_tokens + $4,
            total_cost = total_cost + $5,
            end_time = CASE WHEN is_closed THEN end_time ELSE $6 END
        WHERE session_id = $1
        RETURNING id, session_id, start_time, end_time, model_used, total_messages,
                  total_input_tokens, total_output_tokens, total_cost, is_closed, created_at
        "#
    )
    .bind(session_id)
    .bind(rows.len() as i32)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(&cost)
    .bind(last_seen)
    .fetch_one(&mut *conn)
    .await
}

/// Insert a message, bump its session's aggregates and add its cost to every
/// active budget in one transaction.
pub async fn append_message(
    pool: &PgPool,
    message: CreateMessage,
) -> Result<AppendedMessage, AppError> {
    let mut tx = pool.begin().await?;

    if lock_session(&mut *tx, &message.session_id).await?.is_closed {
        return Err(AppError::Validation(format!("Session {} is closed", message.session_id)));
    }

    let row = insert_message(&mut *tx, &message).await?;
    let session = bump_session(&mut *tx, &message.session_id, std::slice::from_ref(&row)).await?;
    let budgets = budget_queries::charge_active(&mut *tx, &row.cost, row.timestamp.date_naive()).await?;

    tx.commit().await.map_err(|e| {
        error!("Failed to commit message for session {}: {}", message.session_id, e);
        AppError::Db(e)
    })?;

    Ok(AppendedMessage {
        message: row.try_into()?,
        session,
        budgets,
    })
}

/// Record both messages of a turn in one transaction. A closed session is
/// accepted; the turn was admitted before it closed.
pub async fn append_turn(pool: &PgPool, turn: CreateTurn) -> Result<AppendedTurn, AppError> {
    if turn.user.session_id != turn.assistant.session_id {
        return Err(AppError::Validation(
            "Both messages of a turn must belong to one session".to_string(),
        ));
    }
    let session_id = turn.user.session_id.clone();
    let cost = turn.total_cost();

    let mut tx = pool.begin().await?;

    lock_session(&mut *tx, &session_id).await?;
    let user = insert_message(&mut *tx, &turn.user).await?;
    let assistant = insert_message(&mut *tx, &turn.assistant).await?;
    let session = bump_session(&mut *tx, &session_id, &[user.clone(), assistant.clone()]).await?;
    let budgets = budget_queries::charge_active(&mut *tx, &cost, assistant.timestamp.date_naive()).await?;

    tx.commit().await.map_err(|e| {
        error!("Failed to commit turn for session {}: {}", session_id, e);
        AppError::Db(e)
    })?;

    Ok(AppendedTurn {
        user: user.try_into()?,
        assistant: assistant.try_into()?,
        session,
        budgets,
    })
}

/// Get all messages for a session in timestamp order, user first on ties
pub async fn list_messages(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, session_id, message_type, input_tokens, output_tokens, cost, timestamp, model_used, content
        FROM messages
        WHERE session_id = $1
        ORDER BY timestamp ASC, CASE message_type WHEN 'user' THEN 0 ELSE 1 END
        "#
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}
