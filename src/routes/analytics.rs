use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::{EfficiencyReport, HistoricalUsage, SpendingSummary, UsageAnalytics};
use crate::services::analytics_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/history", get(history))
        .route("/summary", get(summary))
        .route("/efficiency", get(efficiency))
        .route("/daily", get(daily))
        .route("/rollup", post(rollup))
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RollupRequest {
    pub date: Option<NaiveDate>,
}

/// GET /api/analytics/history?days=30
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<HistoricalUsage>, AppError> {
    info!("GET /api/analytics/history - days: {}", params.days);
    Ok(Json(analytics_service::historical(state.store.as_ref(), params.days, Utc::now()).await?))
}

/// GET /api/analytics/summary?days=30
pub async fn summary(
    State(state): State<AppState>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<SpendingSummary>, AppError> {
    info!("GET /api/analytics/summary - days: {}", params.days);
    Ok(Json(analytics_service::spending_summary(state.store.as_ref(), params.days, Utc::now()).await?))
}

/// GET /api/analytics/efficiency?days=30
pub async fn efficiency(
    State(state): State<AppState>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<EfficiencyReport>, AppError> {
    info!("GET /api/analytics/efficiency - days: {}", params.days);
    Ok(Json(analytics_service::efficiency_report(state.store.as_ref(), params.days, Utc::now()).await?))
}

/// GET /api/analytics/daily?from=YYYY-MM-DD&to=YYYY-MM-DD
/// Stored rollups; defaults to the last 30 days
pub async fn daily(
    State(state): State<AppState>,
    Query(params): Query<DailyQuery>,
) -> Result<Json<Vec<UsageAnalytics>>, AppError> {
    let to = params.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = params.from.unwrap_or(to - Duration::days(30));
    info!("GET /api/analytics/daily - from: {}, to: {}", from, to);

    Ok(Json(analytics_service::daily(state.store.as_ref(), from, to).await?))
}

/// POST /api/analytics/rollup
/// Recompute one day's rollup now (default: today)
pub async fn rollup(
    State(state): State<AppState>,
    body: Option<Json<RollupRequest>>,
) -> Result<Json<Vec<UsageAnalytics>>, AppError> {
    let date = body
        .and_then(|Json(r)| r.date)
        .unwrap_or_else(|| Utc::now().date_naive());
    info!("POST /api/analytics/rollup - date: {}", date);

    Ok(Json(analytics_service::rollup_day(state.store.as_ref(), date).await?))
}
