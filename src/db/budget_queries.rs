use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Budget, BudgetType, CreateBudget};

pub(crate) const BUDGET_COLUMNS: &str =
    "id, budget_type, limit_amount, current_spent, reset_date, is_active, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BudgetRow {
    pub id: Uuid,
    pub budget_type: String,
    pub limit_amount: BigDecimal,
    pub current_spent: BigDecimal,
    pub reset_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<BudgetRow> for Budget {
    type Error = AppError;

    fn try_from(row: BudgetRow) -> Result<Self, Self::Error> {
        Ok(Budget {
            id: row.id,
            budget_type: row.budget_type.parse()?,
            limit_amount: row.limit_amount,
            current_spent: row.current_spent,
            reset_date: row.reset_date,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// Create an active budget, retiring the previous active budget of that type
pub async fn create_budget(
    pool: &PgPool,
    budget: CreateBudget,
) -> Result<BudgetRow, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE budgets
        SET is_active = FALSE
        WHERE budget_type = $1 AND is_active = TRUE
        "#
    )
    .bind(budget.budget_type.as_str())
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        INSERT INTO budgets (budget_type, limit_amount, current_spent, reset_date, is_active)
        VALUES ($1, $2, 0, $3, TRUE)
        RETURNING {BUDGET_COLUMNS}
        "#
    ))
    .bind(budget.budget_type.as_str())
    .bind(budget.limit_amount)
    .bind(budget.reset_date)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Active budgets, optionally narrowed to one type
pub async fn list_active_budgets(
    pool: &PgPool,
    budget_type: Option<BudgetType>,
) -> Result<Vec<BudgetRow>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        SELECT {BUDGET_COLUMNS}
        FROM budgets
        WHERE is_active = TRUE
          AND ($1::TEXT IS NULL OR budget_type = $1)
        ORDER BY created_at ASC
        "#
    ))
    .bind(budget_type.map(|t| t.as_str()))
    .fetch_all(pool)
    .await
}

pub async fn update_limit(
    pool: &PgPool,
    id: Uuid,
    limit_amount: BigDecimal,
) -> Result<Option<BudgetRow>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        UPDATE budgets
        SET limit_amount = $2
        WHERE id = $1
        RETURNING {BUDGET_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(limit_amount)
    .fetch_optional(pool)
    .await
}

/// Overwrite the spend and next reset date of a budget
pub async fn save_period(
    pool: &PgPool,
    id: Uuid,
    current_spent: BigDecimal,
    reset_date: Option<NaiveDate>,
) -> Result<Option<BudgetRow>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        UPDATE budgets
        SET current_spent = $2, reset_date = $3
        WHERE id = $1
        RETURNING {BUDGET_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(current_spent)
    .bind(reset_date)
    .fetch_optional(pool)
    .await
}

/// Zero the spend of a budget that is still due on `due`. Returns `None` when
/// the budget was already rolled or deactivated.
pub async fn roll_period(
    pool: &PgPool,
    id: Uuid,
    due: NaiveDate,
    next: Option<NaiveDate>,
) -> Result<Option<BudgetRow>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        UPDATE budgets
        SET current_spent = 0, reset_date = $3
        WHERE id = $1 AND is_active = TRUE AND reset_date = $2
        RETURNING {BUDGET_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(due)
    .bind(next)
    .fetch_optional(pool)
    .await
}

/// Add `cost` to every active budget inside the caller's transaction.
///
/// Rows are locked first so a due reset and the charge land together.
pub async fn charge_active(
    conn: &mut PgConnection,
    cost: &BigDecimal,
    today: NaiveDate,
) -> Result<Vec<Budget>, AppError> {
    let rows = sqlx::query_as::<_, BudgetRow>(&format!(
        r#"
        SELECT {BUDGET_COLUMNS}
        FROM budgets
        WHERE is_active = TRUE
        ORDER BY created_at ASC
        FOR UPDATE
        "#
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut charged = Vec::with_capacity(rows.len());
    for row in rows {
        let mut budget: Budget = row.try_into()?;
        budget.apply_due_reset(today);

        let row = sqlx::query_as::<_, BudgetRow>(&format!(
            r#"
            UPDATE budgets
            SET current_spent = $2, reset_date = $3
            WHERE id = $1
            RETURNING {BUDGET_COLUMNS}
            "#
        ))
        .bind(budget.id)
        .bind(&budget.current_spent + cost)
        .bind(budget.reset_date)
        .fetch_one(&mut *conn)
        .await?;
        charged.push(row.try_into()?);
    }

    Ok(charged)
}

pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE budgets
        SET is_active = FALSE
        WHERE id = $1 AND is_active = TRUE
        "#
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
