use std::collections::BTreeMap;

use bigdecimal::{ToPrimitive, Zero};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::types::BigDecimal;
use tracing::info;

use crate::errors::AppError;
use crate::models::{
    BudgetType, CreateUsageAnalytics, EfficiencyReport, HistoricalUsage, ModelEfficiency, Session,
    SpendingSummary, UsageAnalytics,
};
use crate::services::budget_service;
use crate::services::cost_service::COST_SCALE;
use crate::store::UsageStore;

/// Cost per token above which smaller models are suggested.
const HIGH_COST_PER_TOKEN: f64 = 0.0001;

fn validate_days(days: u32) -> Result<(), AppError> {
    if days == 0 || days > 365 {
        return Err(AppError::Validation(format!("days must be between 1 and 365, got {}", days)));
    }
    Ok(())
}

async fn sessions_in_last(store: &dyn UsageStore, days: u32, now: DateTime<Utc>) -> Result<Vec<Session>, AppError> {
    store
        .list_sessions_between(now - Duration::days(i64::from(days)), now + Duration::seconds(1))
        .await
}

fn total_cost(sessions: &[Session]) -> BigDecimal {
    sessions.iter().map(|s| s.total_cost.clone()).sum()
}

fn ratio(cost: &BigDecimal, count: i64) -> f64 {
    if count <= 0 {
        return 0.0;
    }
    cost.to_f64().unwrap_or(0.0) / count as f64
}

fn average(cost: &BigDecimal, count: i64) -> BigDecimal {
    if count <= 0 {
        return BigDecimal::zero();
    }
    (cost / BigDecimal::from(count)).round(COST_SCALE)
}

pub async fn historical(store: &dyn UsageStore, days: u32, now: DateTime<Utc>) -> Result<HistoricalUsage, AppError> {
    validate_days(days)?;
    let sessions = sessions_in_last(store, days, now).await?;

    let total_sessions = sessions.len() as i64;
    let total_cost = total_cost(&sessions);
    let total_messages: i64 = sessions.iter().map(|s| i64::from(s.total_messages)).sum();

    Ok(HistoricalUsage {
        period_days: days,
        total_sessions,
        total_messages,
        total_input_tokens: sessions.iter().map(|s| i64::from(s.total_input_tokens)).sum(),
        total_output_tokens: sessions.iter().map(|s| i64::from(s.total_output_tokens)).sum(),
        avg_cost_per_session: average(&total_cost, total_sessions),
        avg_messages_per_session: if total_sessions > 0 {
            total_messages as f64 / total_sessions as f64
        } else {
            0.0
        },
        total_cost,
        sessions,
    })
}

pub async fn spending_summary(store: &dyn UsageStore, days: u32, now: DateTime<Utc>) -> Result<SpendingSummary, AppError> {
    validate_days(days)?;
    let sessions = sessions_in_last(store, days, now).await?;
    let total_spent = total_cost(&sessions);
    let daily_average = average(&total_spent, i64::from(days));
    let today = now.date_naive();

    Ok(SpendingSummary {
        period_days: days,
        total_sessions: sessions.len() as i64,
        projected_monthly_spend: &daily_average * BigDecimal::from(30),
        daily_average,
        total_spent,
        daily_budget_status: budget_service::status(store, BudgetType::Daily, today).await?,
        monthly_budget_status: budget_service::status(store, BudgetType::Monthly, today).await?,
    })
}

fn model_breakdown(sessions: &[Session]) -> Vec<ModelEfficiency> {
    let mut by_model: BTreeMap<&str, (i64, i64, i64, BigDecimal)> = BTreeMap::new();
    for s in sessions {
        let entry = by_model
            .entry(s.model_used.as_str())
            .or_insert_with(|| (0, 0, 0, BigDecimal::zero()));
        entry.0 += 1;
        entry.1 += i64::from(s.total_messages);
        entry.2 += i64::from(s.total_input_tokens) + i64::from(s.total_output_tokens);
        entry.3 = &entry.3 + &s.total_cost;
    }

    by_model
        .into_iter()
        .map(|(model, (sessions, messages, tokens, cost))| ModelEfficiency {
            model_used: model.to_string(),
            sessions,
            total_messages: messages,
            total_tokens: tokens,
            cost_per_session: ratio(&cost, sessions),
            cost_per_message: ratio(&cost, messages),
            cost_per_token: ratio(&cost, tokens),
            total_cost: cost,
        })
        .collect()
}

fn recommendations(models: &[ModelEfficiency], avg_cost_per_token: f64) -> Vec<String> {
    if models.is_empty() {
        return vec!["No usage data available for recommendations".to_string()];
    }

    let mut out = Vec::new();
    let mut ranked: Vec<&ModelEfficiency> = models.iter().filter(|m| m.total_tokens > 0).collect();
    ranked.sort_by(|a, b| a.cost_per_token.total_cmp(&b.cost_per_token));

    if let (Some(cheapest), Some(priciest)) = (ranked.first(), ranked.last()) {
        if ranked.len() > 1 && cheapest.cost_per_token > 0.0 {
            let efficiency_ratio = priciest.cost_per_token / cheapest.cost_per_token;
            if efficiency_ratio > 2.0 {
                out.push(format!(
                    "Consider using {} more often. It's {:.1}x more cost-efficient than {}",
                    cheapest.model_used, efficiency_ratio, priciest.model_used
                ));
            }
        }
    }

    for m in &ranked {
        if avg_cost_per_token > 0.0 && m.cost_per_token > avg_cost_per_token * 2.0 {
            out.push(format!(
                "{} is significantly more expensive than average. Consider using it only for complex tasks.",
                m.model_used
            ));
        }
    }

    if avg_cost_per_token > HIGH_COST_PER_TOKEN {
        out.push("Consider using smaller models for simple tasks to reduce costs".to_string());
    }

    if out.is_empty() {
        out.push("Your current model usage appears cost-efficient!".to_string());
    }
    out
}

pub async fn efficiency_report(store: &dyn UsageStore, days: u32, now: DateTime<Utc>) -> Result<EfficiencyReport, AppError> {
    validate_days(days)?;
    let sessions = sessions_in_last(store, days, now).await?;

    let total_cost = total_cost(&sessions);
    let total_sessions = sessions.len() as i64;
    let total_messages: i64 = sessions.iter().map(|s| i64::from(s.total_messages)).sum();
    let total_tokens: i64 = sessions
        .iter()
        .map(|s| i64::from(s.total_input_tokens) + i64::from(s.total_output_tokens))
        .sum();
    let avg_cost_per_token = ratio(&total_cost, total_tokens);

    let models = model_breakdown(&sessions);
    let most_efficient_model = models
        .iter()
        .filter(|m| m.total_tokens > 0)
        .min_by(|a, b| a.cost_per_token.total_cmp(&b.cost_per_token))
        .map(|m| m.model_used.clone());

    Ok(EfficiencyReport {
        period_days: days,
        total_sessions,
        total_messages,
        total_tokens,
        avg_cost_per_session: ratio(&total_cost, total_sessions),
        avg_cost_per_message: ratio(&total_cost, total_messages),
        avg_cost_per_token,
        most_efficient_model,
        recommendations: recommendations(&models, avg_cost_per_token),
        models,
        total_cost,
    })
}

fn clamp_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Recompute and store the per-model rollup for sessions started on `date` (UTC).
pub async fn rollup_day(store: &dyn UsageStore, date: NaiveDate) -> Result<Vec<UsageAnalytics>, AppError> {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let sessions = store.list_sessions_between(start, start + Duration::days(1)).await?;

    let rows: Vec<CreateUsageAnalytics> = model_breakdown(&sessions)
        .into_iter()
        .map(|m| CreateUsageAnalytics {
            date,
            avg_cost_per_session: average(&m.total_cost, m.sessions),
            avg_tokens_per_message: if m.total_messages > 0 {
                clamp_i32(m.total_tokens / m.total_messages)
            } else {
                0
            },
            total_sessions: clamp_i32(m.sessions),
            total_messages: clamp_i32(m.total_messages),
            total_cost: m.total_cost,
            model_used: m.model_used,
        })
        .collect();

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let stored = store.upsert_usage_analytics(rows).await?;
    info!("📈 Rolled up usage for {} ({} models)", date, stored.len());
    Ok(stored)
}

pub async fn daily(store: &dyn UsageStore, from: NaiveDate, to: NaiveDate) -> Result<Vec<UsageAnalytics>, AppError> {
    if from > to {
        return Err(AppError::Validation(format!("from ({}) must not be after to ({})", from, to)));
    }
    store.list_usage_analytics(from, to).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateMessage, CreateSession, MessageType};
    use crate::store::MemoryUsageStore;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    async fn session_with(store: &MemoryUsageStore, model: &str, at: DateTime<Utc>, costs: &[(&str, i32)]) {
        let session = store.create_session(CreateSession::new(model, at)).await.unwrap();
        for (cost, tokens) in costs {
            store
                .append_message(CreateMessage {
                    session_id: session.session_id.clone(),
                    message_type: MessageType::Assistant,
                    input_tokens: 0,
                    output_tokens: *tokens,
                    cost: dec(cost),
                    model_used: model.to_string(),
                    content: String::new(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_historical_totals() {
        let store = MemoryUsageStore::new();
        let now = Utc::now();
        session_with(&store, "gpt-4o", now - Duration::hours(1), &[("0.002", 100), ("0.003", 100)]).await;
        session_with(&store, "gpt-4o-mini", now - Duration::hours(2), &[("0.001", 50)]).await;
        session_with(&store, "gpt-4o", now - Duration::days(40), &[("5", 100)]).await;

        let usage = historical(&store, 30, now).await.unwrap();
        assert_eq!(usage.total_sessions, 2);
        assert_eq!(usage.total_cost, dec("0.006"));
        assert_eq!(usage.total_messages, 3);
        assert_eq!(usage.avg_cost_per_session, dec("0.003"));
        assert!((usage.avg_messages_per_session - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalid_window_is_rejected() {
        let store = MemoryUsageStore::new();
        assert!(matches!(historical(&store, 0, Utc::now()).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_spending_summary_projects_monthly() {
        let store = MemoryUsageStore::new();
        let now = Utc::now();
        session_with(&store, "gpt-4o", now - Duration::hours(3), &[("0.7", 10)]).await;

        let summary = spending_summary(&store, 7, now).await.unwrap();
        assert_eq!(summary.total_spent, dec("0.7"));
        assert_eq!(summary.daily_average, dec("0.1"));
        assert_eq!(summary.projected_monthly_spend, dec("3"));
    }

    #[tokio::test]
    async fn test_efficiency_report_finds_cheapest_model() {
        let store = MemoryUsageStore::new();
        let now = Utc::now();
        session_with(&store, "claude-3-opus", now - Duration::hours(1), &[("0.09", 1000)]).await;
        session_with(&store, "gpt-4o-mini", now - Duration::hours(1), &[("0.001", 1000)]).await;

        let report = efficiency_report(&store, 30, now).await.unwrap();
        assert_eq!(report.models.len(), 2);
        assert_eq!(report.most_efficient_model.as_deref(), Some("gpt-4o-mini"));
        assert!(report.recommendations[0].starts_with("Consider using gpt-4o-mini more often"));
    }

    #[tokio::test]
    async fn test_empty_report_has_placeholder_recommendation() {
        let store = MemoryUsageStore::new();
        let report = efficiency_report(&store, 30, Utc::now()).await.unwrap();
        assert!(report.most_efficient_model.is_none());
        assert_eq!(report.recommendations, vec!["No usage data available for recommendations".to_string()]);
    }

    #[tokio::test]
    async fn test_rollup_is_idempotent_per_day() {
        let store = MemoryUsageStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let noon = day.and_hms_opt(12, 0, 0).unwrap().and_utc();
        session_with(&store, "gpt-4o", noon, &[("0.002", 100), ("0.004", 300)]).await;
        session_with(&store, "gpt-4o", noon + Duration::hours(1), &[("0.006", 200)]).await;
        session_with(&store, "gpt-4o", noon + Duration::days(1), &[("1", 1)]).await;

        let first = rollup_day(&store, day).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].total_sessions, 2);
        assert_eq!(first[0].total_messages, 3);
        assert_eq!(first[0].total_cost, dec("0.012"));
        assert_eq!(first[0].avg_cost_per_session, dec("0.006"));
        assert_eq!(first[0].avg_tokens_per_message, 200);

        rollup_day(&store, day).await.unwrap();
        let stored = daily(&store, day, day).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}
