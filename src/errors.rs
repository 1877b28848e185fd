use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;

use crate::models::BudgetType;

/// Failures talking to the completion API. None of these are retried.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key is missing or empty")]
    MissingApiKey,
    #[error("Authentication rejected by completion API: {0}")]
    Auth(String),
    #[error("Rate limited by completion API")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Stream error: {0}")]
    Stream(String),
}

impl LlmError {
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Rate limited by external provider")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{budget_type} budget exceeded: requested {requested}, remaining {headroom}")]
    BudgetExceeded {
        budget_type: BudgetType,
        headroom: BigDecimal,
        requested: BigDecimal,
    },
    #[error("LLM error: {0}")]
    Llm(LlmError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            AppError::RateLimited => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Rate limited").into_response()
            },
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::BudgetExceeded { budget_type, headroom, requested } => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "budget_exceeded",
                    "budget_type": budget_type,
                    "headroom": headroom.to_string(),
                    "requested": requested.to_string(),
                })),
            )
                .into_response(),
            AppError::Llm(e) => match e {
                LlmError::MissingApiKey | LlmError::Auth(_) => {
                    (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
                }
                LlmError::RateLimited => AppError::RateLimited.into_response(),
                LlmError::Timeout => (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response(),
                other => (StatusCode::BAD_GATEWAY, other.to_string()).into_response(),
            },
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<LlmError> for AppError {
    fn from(value: LlmError) -> Self {
        AppError::Llm(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_budget_exceeded_maps_to_payment_required() {
        let err = AppError::BudgetExceeded {
            budget_type: BudgetType::Daily,
            headroom: BigDecimal::from_str("0.02").unwrap(),
            requested: BigDecimal::from_str("0.05").unwrap(),
        };
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_llm_errors_map_to_http_status() {
        let auth = AppError::Llm(LlmError::Auth("bad key".into())).into_response();
        assert_eq!(auth.status(), StatusCode::UNAUTHORIZED);

        let limited = AppError::Llm(LlmError::RateLimited).into_response();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers().get("Retry-After").unwrap(), "60");

        let network = AppError::Llm(LlmError::Network("refused".into())).into_response();
        assert_eq!(network.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_db_error_does_not_leak_details() {
        let resp = AppError::Db(sqlx::Error::RowNotFound).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
