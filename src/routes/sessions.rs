use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::{AppError, LlmError};
use crate::external::StreamEvent;
use crate::models::{ChatRequest, CreateSessionRequest, PreflightCheck, Session, SessionSummary, TurnOutcome};
use crate::services::chat_service::{ChatService, PendingTurn, SessionContext};
use crate::services::usage_recorder;
use crate::state::AppState;

/// Fragments buffered between the completion stream and a slow client
const EVENT_BUFFER: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/:session_id", get(get_session))
        .route("/:session_id/close", post(close_session))
        .route("/:session_id/preflight", post(preflight))
        .route("/:session_id/chat", post(chat_stream))
        .route("/:session_id/chat/complete", post(chat_complete))
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(data): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let model = data
        .model
        .as_deref()
        .unwrap_or_else(|| state.catalog.default_model());
    info!("POST /api/sessions - model: {}", model);

    let session = usage_recorder::start_session(state.store.as_ref(), &state.catalog, model).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions/:session_id
/// Session totals with its messages
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    info!("GET /api/sessions/{}", session_id);
    Ok(Json(usage_recorder::session_summary(state.store.as_ref(), &session_id).await?))
}

/// POST /api/sessions/:session_id/close
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, AppError> {
    info!("POST /api/sessions/{}/close", session_id);
    Ok(Json(usage_recorder::end_session(state.store.as_ref(), &session_id).await?))
}

/// POST /api/sessions/:session_id/preflight
/// Worst-case cost of sending this message, and whether budgets allow it
pub async fn preflight(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(data): Json<ChatRequest>,
) -> Result<Json<PreflightCheck>, AppError> {
    info!("POST /api/sessions/{}/preflight", session_id);
    let ctx = state.chat.resume(&session_id, data.history).await?;
    Ok(Json(state.chat.preflight(&ctx, &data.content).await?))
}

/// POST /api/sessions/:session_id/chat/complete
/// One turn, answered once the whole reply has arrived
pub async fn chat_complete(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(data): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    info!("POST /api/sessions/{}/chat/complete", session_id);
    let mut ctx = state.chat.resume(&session_id, data.history).await?;
    Ok(Json(state.chat.complete_turn(&mut ctx, &data.content).await?))
}

/// POST /api/sessions/:session_id/chat
///
/// Streams the reply as SSE: `delta` events carry text fragments, then a
/// single `usage` event carries the recorded turn, or an `error` event ends
/// the stream. Validation, budget and upstream status errors are returned as
/// plain HTTP errors before the stream opens.
pub async fn chat_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(data): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    info!("POST /api/sessions/{}/chat", session_id);

    let ctx = state.chat.resume(&session_id, data.history).await?;
    let pending = state.chat.begin_turn(&ctx, &data.content).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(drive_turn(state.chat.clone(), ctx, pending, tx));

    let events = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn error_event(kind: &str, message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": kind, "message": message }).to_string())
}

fn llm_error_kind(e: &LlmError) -> &'static str {
    match e {
        LlmError::MissingApiKey | LlmError::Auth(_) => "auth",
        LlmError::RateLimited => "rate_limited",
        LlmError::Timeout => "timeout",
        LlmError::Network(_) => "network",
        LlmError::Api { .. } => "api",
        LlmError::InvalidResponse(_) | LlmError::Stream(_) => "stream",
    }
}

/// Forward the reply to the client and record the turn once usage arrives.
///
/// Runs detached from the request: if the client goes away the reply is still
/// drained and recorded, because the tokens have been billed either way.
async fn drive_turn(
    chat: Arc<ChatService>,
    mut ctx: SessionContext,
    pending: PendingTurn,
    tx: mpsc::Sender<Event>,
) {
    // The reservation is released when this task ends, after the turn is recorded
    let PendingTurn { user_text, mut stream, reservation: _reservation, .. } = pending;
    let mut reply = String::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamEvent::Delta(text)) => {
                reply.push_str(&text);
                // A closed channel only means the client left
                let _ = tx.send(Event::default().event("delta").data(text)).await;
            }
            Ok(StreamEvent::Done(usage)) => {
                let event = match chat.finish_turn(&mut ctx, &user_text, &reply, usage).await {
                    Ok(outcome) => Event::default()
                        .event("usage")
                        .json_data(&outcome)
                        .unwrap_or_else(|e| error_event("serialization", &e.to_string())),
                    Err(e) => {
                        error!("Failed to record turn in {}: {}", ctx.session_id, e);
                        error_event("record_failed", &e.to_string())
                    }
                };
                let _ = tx.send(event).await;
                return;
            }
            Err(e) => {
                warn!("Stream for {} ended with error: {}", ctx.session_id, e);
                let _ = tx.send(error_event(llm_error_kind(&e), &e.to_string())).await;
                return;
            }
        }
    }
}
