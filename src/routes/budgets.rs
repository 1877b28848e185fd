use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Budget, BudgetAlert, BudgetCheck, BudgetCheckRequest, BudgetStatus, BudgetType, CostProjection,
    CreateBudgetRequest, UpdateBudgetLimitRequest,
};
use crate::services::budget_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_budgets).post(create_budget))
        .route("/check", post(check_budget))
        .route("/alerts", get(budget_alerts))
        .route("/id/:id", delete(deactivate_budget))
        .route("/:budget_type/status", get(budget_status))
        .route("/:budget_type/projection", get(budget_projection))
        .route("/:budget_type/limit", put(update_limit))
        .route("/:budget_type/reset", post(reset_budget))
}

#[derive(Debug, Deserialize)]
pub struct ProjectionQuery {
    #[serde(default = "default_days_ahead")]
    pub days_ahead: u32,
}

fn default_days_ahead() -> u32 {
    7
}

fn parse_type(raw: &str) -> Result<BudgetType, AppError> {
    raw.parse::<BudgetType>().map_err(AppError::Validation)
}

/// GET /api/budgets
/// Active budgets, with due resets applied
pub async fn list_budgets(State(state): State<AppState>) -> Result<Json<Vec<Budget>>, AppError> {
    info!("GET /api/budgets");
    Ok(Json(budget_service::list_budgets(state.store.as_ref(), Utc::now().date_naive()).await?))
}

/// POST /api/budgets
/// Replaces any active budget of the same type
pub async fn create_budget(
    State(state): State<AppState>,
    Json(data): Json<CreateBudgetRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!("POST /api/budgets - {} limit {}", data.budget_type, data.limit_amount);

    let budget = budget_service::create_budget(
        state.store.as_ref(),
        data.budget_type,
        data.limit_amount,
        Utc::now().date_naive(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(budget)))
}

/// POST /api/budgets/check
pub async fn check_budget(
    State(state): State<AppState>,
    Json(data): Json<BudgetCheckRequest>,
) -> Result<Json<BudgetCheck>, AppError> {
    info!("POST /api/budgets/check - cost {}", data.cost);
    Ok(Json(budget_service::check(state.store.as_ref(), &data.cost, Utc::now().date_naive()).await?))
}

/// GET /api/budgets/alerts
pub async fn budget_alerts(State(state): State<AppState>) -> Result<Json<Vec<BudgetAlert>>, AppError> {
    info!("GET /api/budgets/alerts");
    Ok(Json(budget_service::alerts(state.store.as_ref(), Utc::now().date_naive()).await?))
}

/// GET /api/budgets/:budget_type/status
pub async fn budget_status(
    State(state): State<AppState>,
    Path(budget_type): Path<String>,
) -> Result<Json<BudgetStatus>, AppError> {
    info!("GET /api/budgets/{}/status", budget_type);
    let budget_type = parse_type(&budget_type)?;
    Ok(Json(budget_service::status(state.store.as_ref(), budget_type, Utc::now().date_naive()).await?))
}

/// GET /api/budgets/:budget_type/projection?days_ahead=7
pub async fn budget_projection(
    State(state): State<AppState>,
    Path(budget_type): Path<String>,
    Query(params): Query<ProjectionQuery>,
) -> Result<Json<CostProjection>, AppError> {
    info!("GET /api/budgets/{}/projection - days_ahead: {}", budget_type, params.days_ahead);
    let budget_type = parse_type(&budget_type)?;
    if params.days_ahead == 0 || params.days_ahead > 365 {
        return Err(AppError::Validation("days_ahead must be between 1 and 365".to_string()));
    }

    Ok(Json(
        budget_service::projection(state.store.as_ref(), budget_type, params.days_ahead, Utc::now()).await?,
    ))
}

/// PUT /api/budgets/:budget_type/limit
pub async fn update_limit(
    State(state): State<AppState>,
    Path(budget_type): Path<String>,
    Json(data): Json<UpdateBudgetLimitRequest>,
) -> Result<Json<Budget>, AppError> {
    info!("PUT /api/budgets/{}/limit - {}", budget_type, data.limit_amount);
    let budget_type = parse_type(&budget_type)?;
    Ok(Json(
        budget_service::update_limit(state.store.as_ref(), budget_type, data.limit_amount, Utc::now().date_naive())
            .await?,
    ))
}

/// POST /api/budgets/:budget_type/reset
pub async fn reset_budget(
    State(state): State<AppState>,
    Path(budget_type): Path<String>,
) -> Result<Json<Budget>, AppError> {
    info!("POST /api/budgets/{}/reset", budget_type);
    let budget_type = parse_type(&budget_type)?;
    Ok(Json(budget_service::reset_budget(state.store.as_ref(), budget_type, Utc::now().date_naive()).await?))
}

/// DELETE /api/budgets/id/:id
pub async fn deactivate_budget(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    info!("DELETE /api/budgets/id/{}", id);
    budget_service::deactivate(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
