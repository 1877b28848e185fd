use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{CreateSession, Session};

const SESSION_COLUMNS: &str = "id, session_id, start_time, end_time, model_used, total_messages, \
    total_input_tokens, total_output_tokens, total_cost, is_closed, created_at";

/// Insert a new session with zeroed totals
pub async fn create_session(
    pool: &PgPool,
    session: CreateSession,
) -> Result<Session, sqlx::Error> {
    sqlx::query_as::<_, Session>(&format!(
        r#"
        INSERT INTO sessions (session_id, start_time, model_used, total_messages, total_input_tokens, total_output_tokens, total_cost)
        VALUES ($1, $2, $3, 0, 0, 0, 0)
        RETURNING {SESSION_COLUMNS}
        "#
    ))
    .bind(session.session_id)
    .bind(session.start_time)
    .bind(session.model_used)
    .fetch_one(pool)
    .await
}

/// Get a session by its public session id
pub async fn get_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM sessions
        WHERE session_id = $1
        "#
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

/// Close a session; a second close leaves the original end_time in place
pub async fn close_session(
    pool: &PgPool,
    session_id: &str,
    end_time: DateTime<Utc>,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(&format!(
        r#"
        UPDATE sessions
        SET end_time = CASE WHEN is_closed THEN end_time ELSE $2 END,
            is_closed = TRUE
        WHERE session_id = $1
        RETURNING {SESSION_COLUMNS}
        "#
    ))
    .bind(session_id)
    .bind(end_time)
    .fetch_optional(pool)
    .await
}

/// Sessions created in [start, end), oldest first
pub async fn list_sessions_between(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM sessions
        WHERE created_at >= $1 AND created_at < $2
        ORDER BY created_at ASC
        "#
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}
