#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;

use chatmeter::external::{CompletionProvider, OpenRouterProvider};
use chatmeter::models::ModelCatalog;
use chatmeter::services::chat_service::{ChatService, ChatSettings};
use chatmeter::store::{MemoryUsageStore, UsageStore};
use chatmeter::AppState;

pub const GOOD_KEY: &str = "test-key";
pub const THROTTLED_KEY: &str = "throttled-key";
/// Same reply as `GOOD_KEY`, one SSE event every `SLOW_EVENT_DELAY`
pub const SLOW_KEY: &str = "slow-key";
pub const SLOW_EVENT_DELAY: Duration = Duration::from_millis(100);

/// SSE body the fake completion endpoint replies with: three fragments and
/// a usage object of 800 prompt / 100 completion tokens.
pub const REPLY_BODY: &str = concat!(
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"content\":\"Howdy\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"content\":\", y'all\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[],\"usage\":{\"prompt_tokens\":800,\"completion_tokens\":100,\"total_tokens\":900}}\n\n",
    "data: [DONE]\n\n",
);

fn slow_reply() -> Body {
    let events: Vec<String> = REPLY_BODY.split_inclusive("\n\n").map(str::to_string).collect();
    let paced = futures::stream::iter(events).then(|event| async move {
        tokio::time::sleep(SLOW_EVENT_DELAY).await;
        Ok::<_, std::convert::Infallible>(event)
    });
    Body::from_stream(paced)
}

async fn chat_completions(headers: HeaderMap) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match auth.strip_prefix("Bearer ") {
        Some(GOOD_KEY) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            REPLY_BODY.to_string(),
        )
            .into_response(),
        Some(SLOW_KEY) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            slow_reply(),
        )
            .into_response(),
        Some(THROTTLED_KEY) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"error":{"message":"Rate limit exceeded","code":429}}"#.to_string(),
        )
            .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"error":{"message":"No auth credentials found","code":401}}"#.to_string(),
        )
            .into_response(),
    }
}

/// Start a local OpenAI-compatible completion endpoint; returns its base URL.
pub async fn spawn_fake_completion_api() -> String {
    let app = Router::new().route("/v1/chat/completions", post(chat_completions));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

pub fn provider(base_url: &str, key: &str) -> Arc<dyn CompletionProvider> {
    Arc::new(OpenRouterProvider::new(key, base_url, Duration::from_secs(5)).unwrap())
}

pub fn settings() -> ChatSettings {
    ChatSettings {
        system_prompt: "You are a helpful Texas travel guide.".to_string(),
        max_tokens: 400,
        temperature: 0.7,
    }
}

pub fn app_state(store: Arc<MemoryUsageStore>, provider: Option<Arc<dyn CompletionProvider>>) -> AppState {
    let store: Arc<dyn UsageStore> = store;
    let catalog = Arc::new(ModelCatalog::default());
    let chat = Arc::new(ChatService::new(store.clone(), provider, catalog.clone(), settings()));
    AppState { store, catalog, chat }
}
