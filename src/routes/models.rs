use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::models::{CostComparisonRow, ModelInfo};
use crate::services::cost_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_models))
        .route("/comparison", get(comparison))
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(flatten)]
    pub info: ModelInfo,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub default_model: String,
    pub models: Vec<ModelEntry>,
}

/// GET /api/models
async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    info!("GET /api/models");

    Json(ModelList {
        default_model: state.catalog.default_model().to_string(),
        models: state
            .catalog
            .iter()
            .map(|(id, info)| ModelEntry { id: id.clone(), info: info.clone() })
            .collect(),
    })
}

/// GET /api/models/comparison
/// Standard-session cost of each available model, cheapest first
async fn comparison(State(state): State<AppState>) -> Json<Vec<CostComparisonRow>> {
    info!("GET /api/models/comparison");
    Json(cost_service::cost_comparison_table(&state.catalog))
}
