use chrono::NaiveDate;
use sqlx::PgPool;

use crate::models::{CreateUsageAnalytics, UsageAnalytics};

const ANALYTICS_COLUMNS: &str = "id, date, model_used, total_sessions, total_messages, total_cost, \
    avg_cost_per_session, avg_tokens_per_message, created_at";

/// Upsert rollup rows keyed by (date, model_used)
pub async fn upsert_usage_analytics(
    pool: &PgPool,
    rows: Vec<CreateUsageAnalytics>,
) -> Result<Vec<UsageAnalytics>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(rows.len());

    for row in rows {
        let record = sqlx::query_as::<_, UsageAnalytics>(&format!(
            r#"
            INSERT INTO usage_analytics (date, model_used, total_sessions, total_messages, total_cost, avg_cost_per_session, avg_tokens_per_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (date, model_used)
            DO UPDATE SET
                total_sessions = EXCLUDED.total_sessions,
                total_messages = EXCLUDED.total_messages,
                total_cost = EXCLUDED.total_cost,
                avg_cost_per_session = EXCLUDED.avg_cost_per_session,
                avg_tokens_per_message = EXCLUDED.avg_tokens_per_message,
                created_at = NOW()
            RETURNING {ANALYTICS_COLUMNS}
            "#
        ))
        .bind(row.date)
        .bind(row.model_used)
        .bind(row.total_sessions)
        .bind(row.total_messages)
        .bind(row.total_cost)
        .bind(row.avg_cost_per_session)
        .bind(row.avg_tokens_per_message)
        .fetch_one(&mut *tx)
        .await?;

        stored.push(record);
    }

    tx.commit().await?;
    Ok(stored)
}

pub async fn list_usage_analytics(
    pool: &PgPool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<UsageAnalytics>, sqlx::Error> {
    sqlx::query_as::<_, UsageAnalytics>(&format!(
        r#"
        SELECT {ANALYTICS_COLUMNS}
        FROM usage_analytics
        WHERE date >= $1 AND date <= $2
        ORDER BY date ASC, model_used ASC
        "#
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}
