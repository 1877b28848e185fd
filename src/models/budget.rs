use std::fmt;
use std::str::FromStr;

use bigdecimal::Zero;
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

/// Share of the limit at which a budget is reported as a warning.
pub const WARNING_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetType {
    Daily,
    Monthly,
    Total,
}

impl BudgetType {
    pub const ALL: [BudgetType; 3] = [BudgetType::Daily, BudgetType::Monthly, BudgetType::Total];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetType::Daily => "daily",
            BudgetType::Monthly => "monthly",
            BudgetType::Total => "total",
        }
    }

    /// Next reset boundary after `from`, or `None` for budgets that never reset.
    pub fn next_reset(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            BudgetType::Daily => from.checked_add_days(Days::new(1)),
            BudgetType::Monthly => from.checked_add_months(Months::new(1)),
            BudgetType::Total => None,
        }
    }
}

impl fmt::Display for BudgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(BudgetType::Daily),
            "monthly" => Ok(BudgetType::Monthly),
            "total" => Ok(BudgetType::Total),
            other => Err(format!("Invalid budget type: {}. Must be 'daily', 'monthly', or 'total'", other)),
        }
    }
}

/// A spend ceiling over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub budget_type: BudgetType,
    pub limit_amount: BigDecimal,
    pub current_spent: BigDecimal,
    /// Date of the next scheduled reset. Always `None` for `total` budgets.
    pub reset_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Budget {
    /// Zero the spend and move `reset_date` past `today` if a reset is due.
    ///
    /// However many periods were missed, spend is zeroed once and the next
    /// reset lands strictly after `today`. Returns whether a reset happened.
    pub fn apply_due_reset(&mut self, today: NaiveDate) -> bool {
        let Some(mut next) = self.reset_date else {
            return false;
        };
        if today < next {
            return false;
        }

        while next <= today {
            match self.budget_type.next_reset(next) {
                Some(advanced) => next = advanced,
                None => break,
            }
        }

        self.current_spent = BigDecimal::zero();
        self.reset_date = Some(next);
        true
    }

    /// Limit minus spend, floored at zero.
    pub fn remaining(&self) -> BigDecimal {
        let remaining = &self.limit_amount - &self.current_spent;
        if remaining < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            remaining
        }
    }

    pub fn would_allow(&self, cost: &BigDecimal) -> bool {
        &self.current_spent + cost <= self.limit_amount
    }

    pub fn percentage_used(&self) -> f64 {
        use bigdecimal::ToPrimitive;

        let limit = self.limit_amount.to_f64().unwrap_or(0.0);
        if limit <= 0.0 {
            return 0.0;
        }
        self.current_spent.to_f64().unwrap_or(0.0) / limit * 100.0
    }
}

/// Input for creating a budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBudget {
    pub budget_type: BudgetType,
    pub limit_amount: BigDecimal,
    pub reset_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBudgetRequest {
    pub budget_type: BudgetType,
    pub limit_amount: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBudgetLimitRequest {
    pub limit_amount: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetCheckRequest {
    pub cost: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetHeadroom {
    pub budget_type: BudgetType,
    pub limit_amount: BigDecimal,
    pub current_spent: BigDecimal,
    pub remaining: BigDecimal,
    pub allowed: bool,
}

/// Outcome of checking a prospective cost against every active budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub requested: BigDecimal,
    /// Remaining amount of the tightest budget, `None` when no budget is active.
    pub headroom: Option<BigDecimal>,
    /// First budget that denied the request.
    pub denied_by: Option<BudgetType>,
    pub budgets: Vec<BudgetHeadroom>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    NoBudget,
    WithinLimit,
    Warning,
    Exceeded,
}

impl BudgetState {
    pub fn from_percentage(percentage_used: f64) -> Self {
        if percentage_used >= 100.0 {
            BudgetState::Exceeded
        } else if percentage_used >= WARNING_PERCENT {
            BudgetState::Warning
        } else {
            BudgetState::WithinLimit
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub status: BudgetState,
    pub budget_type: BudgetType,
    pub limit_amount: BigDecimal,
    pub current_spent: BigDecimal,
    pub remaining: BigDecimal,
    pub percentage_used: f64,
    pub message: String,
    pub reset_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub budget_type: BudgetType,
    pub status: BudgetState,
    pub message: String,
    pub percentage_used: f64,
    pub remaining: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostProjection {
    pub budget_type: BudgetType,
    pub days_ahead: u32,
    pub avg_daily_spending: BigDecimal,
    pub projection: BigDecimal,
    pub confidence: Confidence,
    pub budget_limit: BigDecimal,
    pub projected_percentage: f64,
    pub will_exceed_budget: bool,
    pub message: String,
}
