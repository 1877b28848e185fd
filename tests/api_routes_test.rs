//! HTTP surface tests driven through the router without a socket.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::types::BigDecimal;
use tower::ServiceExt;

use chatmeter::create_app;
use chatmeter::store::{MemoryUsageStore, UsageStore};

fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

fn dec_field(value: &Value) -> BigDecimal {
    value.as_str().expect("decimal serialized as string").parse().unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn offline_app() -> (Router, Arc<MemoryUsageStore>) {
    let store = Arc::new(MemoryUsageStore::new());
    (create_app(common::app_state(store.clone(), None)), store)
}

#[tokio::test]
async fn health_check_responds_ok() {
    let (app, _) = offline_app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn models_are_listed_with_pricing_and_compared() {
    let (app, _) = offline_app();

    let (status, list) = send_json(&app, Method::GET, "/api/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["default_model"], "gpt-4o-mini");
    let models = list["models"].as_array().unwrap();
    assert_eq!(models.len(), 6);
    let gpt4o = models.iter().find(|m| m["id"] == "gpt-4o").unwrap();
    assert_eq!(gpt4o["model"], "openai/gpt-4o");
    assert_eq!(dec_field(&gpt4o["pricing"]["input_tokens_per_million"]), dec("2.5"));

    let (status, rows) = send_json(&app, Method::GET, "/api/models/comparison", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 6);
    // Cheapest first
    assert_eq!(rows[0]["model_id"], "gpt-4o-mini");
    let costs: Vec<BigDecimal> = rows.iter().map(|r| dec_field(&r["total_cost_per_session"])).collect();
    assert!(costs.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn session_lifecycle() {
    let (app, _) = offline_app();

    let (status, session) = send_json(&app, Method::POST, "/api/sessions", Some(json!({ "model": "gpt-4o" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("session_"));
    assert_eq!(session["model_used"], "gpt-4o");
    assert_eq!(session["total_messages"], 0);

    let (status, summary) = send_json(&app, Method::GET, &format!("/api/sessions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["session"]["session_id"], session_id.as_str());
    assert!(summary["messages"].as_array().unwrap().is_empty());

    let (status, closed) = send_json(&app, Method::POST, &format!("/api/sessions/{}/close", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["is_closed"], true);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{}/chat", session_id),
        Some(json!({ "content": "hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn default_model_is_used_when_none_is_given() {
    let (app, _) = offline_app();
    let (status, session) = send_json(&app, Method::POST, "/api/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["model_used"], "gpt-4o-mini");
}

#[tokio::test]
async fn unknown_model_and_unknown_session_are_rejected() {
    let (app, _) = offline_app();

    let (status, _) = send(&app, Method::POST, "/api/sessions", Some(json!({ "model": "gpt-99" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/sessions/session_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_without_api_key_is_unauthorized() {
    let (app, store) = offline_app();
    let (_, session) = send_json(&app, Method::POST, "/api/sessions", Some(json!({}))).await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{}/chat/complete", session_id),
        Some(json!({ "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(store.list_messages(session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn budget_crud_status_and_alerts() {
    let (app, store) = offline_app();

    let (status, budget) = send_json(
        &app,
        Method::POST,
        "/api/budgets",
        Some(json!({ "budget_type": "daily", "limit_amount": "1.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(budget["budget_type"], "daily");
    assert_eq!(dec_field(&budget["limit_amount"]), dec("1"));
    assert!(budget["reset_date"].is_string());
    let id: uuid::Uuid = budget["id"].as_str().unwrap().parse().unwrap();

    let (status, status_body) = send_json(&app, Method::GET, "/api/budgets/daily/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_body["status"], "within_limit");

    let (_, alerts) = send_json(&app, Method::GET, "/api/budgets/alerts", None).await;
    assert!(alerts.as_array().unwrap().is_empty());

    store.save_budget_period(id, dec("0.98"), None).await.unwrap();

    let (_, alerts) = send_json(&app, Method::GET, "/api/budgets/alerts", None).await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["status"], "warning");

    let (status, check) = send_json(&app, Method::POST, "/api/budgets/check", Some(json!({ "cost": "0.05" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["allowed"], false);
    assert_eq!(check["denied_by"], "daily");
    assert_eq!(dec_field(&check["headroom"]), dec("0.02"));

    let (status, updated) = send_json(
        &app,
        Method::PUT,
        "/api/budgets/daily/limit",
        Some(json!({ "limit_amount": "2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec_field(&updated["limit_amount"]), dec("2"));

    let (status, reset) = send_json(&app, Method::POST, "/api/budgets/daily/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec_field(&reset["current_spent"]), dec("0"));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/budgets/id/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = send_json(&app, Method::GET, "/api/budgets", None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = send(&app, Method::DELETE, &format!("/api/budgets/id/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn budget_status_without_budget_reports_no_budget() {
    let (app, _) = offline_app();
    let (status, body) = send_json(&app, Method::GET, "/api/budgets/monthly/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_budget");
}

#[tokio::test]
async fn invalid_budget_input_is_a_bad_request() {
    let (app, _) = offline_app();

    let (status, _) = send(&app, Method::GET, "/api/budgets/weekly/status", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/budgets",
        Some(json!({ "budget_type": "daily", "limit_amount": "0" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/budgets/daily/projection?days_ahead=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exhausted_budget_blocks_chat_with_payment_required() {
    let base_url = common::spawn_fake_completion_api().await;
    let store = Arc::new(MemoryUsageStore::new());
    let app = create_app(common::app_state(
        store.clone(),
        Some(common::provider(&base_url, common::GOOD_KEY)),
    ));

    send(
        &app,
        Method::POST,
        "/api/budgets",
        Some(json!({ "budget_type": "total", "limit_amount": "0.000001" })),
    )
    .await;
    let (_, session) = send_json(&app, Method::POST, "/api/sessions", Some(json!({ "model": "gpt-4o" }))).await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, preflight) = send_json(
        &app,
        Method::POST,
        &format!("/api/sessions/{}/preflight", session_id),
        Some(json!({ "content": "Plan me a week in Big Bend" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preflight["budget"]["allowed"], false);
    assert_eq!(preflight["max_output_tokens"], 400);

    let (status, body) = send_json(
        &app,
        Method::POST,
        &format!("/api/sessions/{}/chat/complete", session_id),
        Some(json!({ "content": "Plan me a week in Big Bend" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "budget_exceeded");
    assert_eq!(body["budget_type"], "total");
    assert!(store.list_messages(session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn completed_turn_shows_up_in_analytics() {
    let base_url = common::spawn_fake_completion_api().await;
    let store = Arc::new(MemoryUsageStore::new());
    let app = create_app(common::app_state(
        store.clone(),
        Some(common::provider(&base_url, common::GOOD_KEY)),
    ));

    let (_, session) = send_json(&app, Method::POST, "/api/sessions", Some(json!({ "model": "gpt-4o" }))).await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, turn) = send_json(
        &app,
        Method::POST,
        &format!("/api/sessions/{}/chat/complete", session_id),
        Some(json!({ "content": "Best tacos in San Antonio?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turn["reply"], "Howdy, y'all!");
    assert_eq!(dec_field(&turn["cost"]), dec("0.003"));

    let (status, history) = send_json(&app, Method::GET, "/api/analytics/history?days=7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total_sessions"], 1);
    assert_eq!(history["total_messages"], 2);
    assert_eq!(dec_field(&history["total_cost"]), dec("0.003"));

    let (status, summary) = send_json(&app, Method::GET, "/api/analytics/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec_field(&summary["total_spent"]), dec("0.003"));
    assert_eq!(summary["daily_budget_status"]["status"], "no_budget");

    let (status, efficiency) = send_json(&app, Method::GET, "/api/analytics/efficiency", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(efficiency["most_efficient_model"], "gpt-4o");

    let (status, rollup) = send_json(&app, Method::POST, "/api/analytics/rollup", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let rollup = rollup.as_array().unwrap();
    assert_eq!(rollup.len(), 1);
    assert_eq!(rollup[0]["model_used"], "gpt-4o");
    assert_eq!(rollup[0]["total_sessions"], 1);

    let (status, daily) = send_json(&app, Method::GET, "/api/analytics/daily", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(daily.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::GET, "/api/analytics/history?days=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
