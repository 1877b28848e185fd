use bigdecimal::{ToPrimitive, Zero};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::types::BigDecimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Budget, BudgetAlert, BudgetCheck, BudgetHeadroom, BudgetState, BudgetStatus, BudgetType,
    Confidence, CostProjection, CreateBudget,
};
use crate::store::UsageStore;

/// Days of history the projection averages over.
pub const PROJECTION_WINDOW_DAYS: i64 = 7;

fn validate_limit(limit_amount: &BigDecimal) -> Result<(), AppError> {
    if *limit_amount <= BigDecimal::zero() {
        return Err(AppError::Validation(format!(
            "Budget limit must be greater than zero, got {}",
            limit_amount
        )));
    }
    Ok(())
}

/// Active budgets with any due reset applied and persisted.
///
/// Each reset only lands if the budget is still due, so a concurrent charge or
/// a second resetter is never overwritten. When a roll loses, the budgets are
/// read again.
async fn current_budgets(
    store: &dyn UsageStore,
    budget_type: Option<BudgetType>,
    today: NaiveDate,
) -> Result<(Vec<Budget>, Vec<Budget>), AppError> {
    let mut budgets = store.list_active_budgets(budget_type).await?;
    let mut reset = Vec::new();
    let mut stale = false;

    for budget in budgets.iter_mut() {
        let Some(due) = budget.reset_date else {
            continue;
        };
        if !budget.apply_due_reset(today) {
            continue;
        }

        let rolled = store
            .roll_budget_period(budget.id, due, budget.reset_date)
            .await
            .map_err(|e| {
                error!("Failed to persist reset of {} budget {}: {}", budget.budget_type, budget.id, e);
                e
            })?;
        match rolled {
            Some(rolled) => {
                info!(
                    "🔄 Reset {} budget {} (next reset: {:?})",
                    rolled.budget_type, rolled.id, rolled.reset_date
                );
                *budget = rolled.clone();
                reset.push(rolled);
            }
            None => stale = true,
        }
    }

    if stale {
        budgets = store.list_active_budgets(budget_type).await?;
    }

    Ok((budgets, reset))
}

async fn active_budget(
    store: &dyn UsageStore,
    budget_type: BudgetType,
    today: NaiveDate,
) -> Result<Option<Budget>, AppError> {
    let (budgets, _) = current_budgets(store, Some(budget_type), today).await?;
    Ok(budgets.into_iter().next())
}

/// Apply every reset whose date has arrived. Returns the budgets that were reset.
pub async fn reset_due(store: &dyn UsageStore, today: NaiveDate) -> Result<Vec<Budget>, AppError> {
    let (_, reset) = current_budgets(store, None, today).await?;
    Ok(reset)
}

/// Would spending `cost` keep every active budget within its limit?
pub async fn check(store: &dyn UsageStore, cost: &BigDecimal, today: NaiveDate) -> Result<BudgetCheck, AppError> {
    check_with_reserved(store, cost, &BigDecimal::zero(), today).await
}

/// Like [`check`], treating `reserved` as already spent. Callers pass the
/// worst-case cost of turns that are admitted but not yet recorded.
pub async fn check_with_reserved(
    store: &dyn UsageStore,
    cost: &BigDecimal,
    reserved: &BigDecimal,
    today: NaiveDate,
) -> Result<BudgetCheck, AppError> {
    if *cost < BigDecimal::zero() {
        return Err(AppError::Validation(format!("Cost cannot be negative: {}", cost)));
    }

    let (budgets, _) = current_budgets(store, None, today).await?;
    let committed = cost + reserved;

    let headrooms: Vec<BudgetHeadroom> = budgets
        .iter()
        .map(|b| BudgetHeadroom {
            budget_type: b.budget_type,
            limit_amount: b.limit_amount.clone(),
            current_spent: b.current_spent.clone(),
            remaining: (b.remaining() - reserved).max(BigDecimal::zero()),
            allowed: b.would_allow(&committed),
        })
        .collect();

    let denied_by = headrooms.iter().find(|h| !h.allowed).map(|h| h.budget_type);
    let headroom = headrooms.iter().map(|h| h.remaining.clone()).min();

    Ok(BudgetCheck {
        allowed: denied_by.is_none(),
        requested: cost.clone(),
        headroom,
        denied_by,
        budgets: headrooms,
    })
}

/// Like [`check`], but a denial becomes `AppError::BudgetExceeded`.
pub async fn enforce(store: &dyn UsageStore, cost: &BigDecimal, today: NaiveDate) -> Result<BudgetCheck, AppError> {
    enforce_with_reserved(store, cost, &BigDecimal::zero(), today).await
}

/// [`check_with_reserved`] turned into `AppError::BudgetExceeded` on denial.
pub async fn enforce_with_reserved(
    store: &dyn UsageStore,
    cost: &BigDecimal,
    reserved: &BigDecimal,
    today: NaiveDate,
) -> Result<BudgetCheck, AppError> {
    let result = check_with_reserved(store, cost, reserved, today).await?;

    if let Some(budget_type) = result.denied_by {
        let headroom = result
            .budgets
            .iter()
            .find(|h| h.budget_type == budget_type)
            .map(|h| h.remaining.clone())
            .unwrap_or_else(BigDecimal::zero);

        warn!(
            "🚫 {} budget denies request of {} (remaining {})",
            budget_type, cost, headroom
        );
        return Err(AppError::BudgetExceeded {
            budget_type,
            headroom,
            requested: cost.clone(),
        });
    }

    Ok(result)
}

/// Create an active budget, superseding any active budget of the same type.
pub async fn create_budget(
    store: &dyn UsageStore,
    budget_type: BudgetType,
    limit_amount: BigDecimal,
    today: NaiveDate,
) -> Result<Budget, AppError> {
    validate_limit(&limit_amount)?;

    let budget = store
        .create_budget(CreateBudget {
            budget_type,
            limit_amount,
            reset_date: budget_type.next_reset(today),
        })
        .await?;

    info!("💵 Created {} budget {} with limit {}", budget_type, budget.id, budget.limit_amount);
    Ok(budget)
}

pub async fn list_budgets(store: &dyn UsageStore, today: NaiveDate) -> Result<Vec<Budget>, AppError> {
    let (budgets, _) = current_budgets(store, None, today).await?;
    Ok(budgets)
}

pub async fn update_limit(
    store: &dyn UsageStore,
    budget_type: BudgetType,
    limit_amount: BigDecimal,
    today: NaiveDate,
) -> Result<Budget, AppError> {
    validate_limit(&limit_amount)?;

    let budget = active_budget(store, budget_type, today).await?.ok_or(AppError::NotFound)?;
    let updated = store
        .update_budget_limit(budget.id, limit_amount)
        .await?
        .ok_or(AppError::NotFound)?;

    info!("✏️ Updated {} budget limit to {}", budget_type, updated.limit_amount);
    Ok(updated)
}

/// Zero the spend now and start a fresh period from `today`.
pub async fn reset_budget(store: &dyn UsageStore, budget_type: BudgetType, today: NaiveDate) -> Result<Budget, AppError> {
    let budget = store
        .list_active_budgets(Some(budget_type))
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    let updated = store
        .save_budget_period(budget.id, BigDecimal::zero(), budget_type.next_reset(today))
        .await?
        .ok_or(AppError::NotFound)?;

    info!("🔄 Manually reset {} budget {}", budget_type, updated.id);
    Ok(updated)
}

pub async fn deactivate(store: &dyn UsageStore, id: Uuid) -> Result<(), AppError> {
    if !store.deactivate_budget(id).await? {
        return Err(AppError::NotFound);
    }
    info!("🗑️ Deactivated budget {}", id);
    Ok(())
}

fn status_of(budget_type: BudgetType, budget: Option<&Budget>) -> BudgetStatus {
    let Some(budget) = budget else {
        return BudgetStatus {
            status: BudgetState::NoBudget,
            budget_type,
            limit_amount: BigDecimal::zero(),
            current_spent: BigDecimal::zero(),
            remaining: BigDecimal::zero(),
            percentage_used: 0.0,
            message: format!("No {} budget set", budget_type),
            reset_date: None,
        };
    };

    let percentage_used = budget.percentage_used();
    let status = BudgetState::from_percentage(percentage_used);
    let message = match status {
        BudgetState::Exceeded => format!("⚠️ Budget exceeded! ({:.1}% used)", percentage_used),
        BudgetState::Warning => format!("⚠️ Approaching budget limit ({:.1}% used)", percentage_used),
        _ => format!("✅ Within budget ({:.1}% used)", percentage_used),
    };

    BudgetStatus {
        status,
        budget_type,
        limit_amount: budget.limit_amount.clone(),
        current_spent: budget.current_spent.clone(),
        remaining: budget.remaining(),
        percentage_used,
        message,
        reset_date: budget.reset_date,
    }
}

pub async fn status(store: &dyn UsageStore, budget_type: BudgetType, today: NaiveDate) -> Result<BudgetStatus, AppError> {
    let budget = active_budget(store, budget_type, today).await?;
    Ok(status_of(budget_type, budget.as_ref()))
}

/// Budgets at or past the warning threshold
pub async fn alerts(store: &dyn UsageStore, today: NaiveDate) -> Result<Vec<BudgetAlert>, AppError> {
    let (budgets, _) = current_budgets(store, None, today).await?;

    let alerts: Vec<BudgetAlert> = budgets
        .iter()
        .map(|b| status_of(b.budget_type, Some(b)))
        .filter(|s| matches!(s.status, BudgetState::Warning | BudgetState::Exceeded))
        .map(|s| BudgetAlert {
            budget_type: s.budget_type,
            status: s.status,
            message: s.message,
            percentage_used: s.percentage_used,
            remaining: s.remaining,
        })
        .collect();

    for alert in &alerts {
        warn!("🔔 {} budget alert: {}", alert.budget_type, alert.message);
    }
    Ok(alerts)
}

fn confidence_for(sessions: usize) -> Confidence {
    match sessions {
        n if n >= 5 => Confidence::High,
        n if n >= 3 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Extrapolate the last week's average daily spend `days_ahead` days forward.
pub async fn projection(
    store: &dyn UsageStore,
    budget_type: BudgetType,
    days_ahead: u32,
    now: DateTime<Utc>,
) -> Result<CostProjection, AppError> {
    let sessions = store
        .list_sessions_between(now - Duration::days(PROJECTION_WINDOW_DAYS), now)
        .await?;
    let budget = status(store, budget_type, now.date_naive()).await?;
    let has_budget = budget.status != BudgetState::NoBudget;

    if sessions.is_empty() {
        return Ok(CostProjection {
            budget_type,
            days_ahead,
            avg_daily_spending: BigDecimal::zero(),
            projection: BigDecimal::zero(),
            confidence: Confidence::Low,
            budget_limit: budget.limit_amount,
            projected_percentage: 0.0,
            will_exceed_budget: false,
            message: "No recent data available for projection".to_string(),
        });
    }

    let total: BigDecimal = sessions.iter().map(|s| s.total_cost.clone()).sum();
    let avg_daily_spending = (total / BigDecimal::from(PROJECTION_WINDOW_DAYS)).round(6);
    let projection = &avg_daily_spending * BigDecimal::from(days_ahead);

    let projected_percentage = if has_budget {
        let limit = budget.limit_amount.to_f64().unwrap_or(0.0);
        projection.to_f64().unwrap_or(0.0) / limit * 100.0
    } else {
        0.0
    };
    let will_exceed_budget = has_budget && projection > budget.limit_amount;

    Ok(CostProjection {
        budget_type,
        days_ahead,
        message: format!(
            "Projected spending: ${:.2} over {} days",
            projection.to_f64().unwrap_or(0.0),
            days_ahead
        ),
        avg_daily_spending,
        projection,
        confidence: confidence_for(sessions.len()),
        budget_limit: budget.limit_amount,
        projected_percentage,
        will_exceed_budget,
    })
}
