//! Repository for accounting period operations
//!
//! Provides database access for accounting periods to support closed-period
//! governance.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub enum PeriodStatus {
    Open,
    Closed,
}

/// Accounting period model representing a fiscal period
#[derive(Debug, Clone, FromRow)]
pub struct AccountingPeriod {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccountingPeriod {
    pub fn is_closed(&self) -> bool {
        self.status == PeriodStatus::Closed
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Errors that can occur during period repository operations
#[derive(Debug, Error)]
pub enum PeriodError {
    #[error("No accounting period found for date={0}")]
    NoPeriodForDate(NaiveDate),

    #[error("Accounting period is closed: name={name}, period_id={period_id}")]
    PeriodClosed { name: String, period_id: Uuid },

    #[error("Accounting period already closed: {0}")]
    AlreadyClosed(Uuid),

    #[error("Period not found: {0}")]
    NotFound(Uuid),

    #[error("Period range is invalid: start {start} must fall before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Period [{start}, {end}] overlaps an existing period")]
    Overlapping { start: NaiveDate, end: NaiveDate },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SELECT_BY_DATE: &str = r#"
    SELECT id, name, start_date, end_date, status, closed_at, closed_by, created_at
    FROM accounting_periods
    WHERE start_date <= $1
      AND end_date >= $1
    LIMIT 1
"#;

/// Find the accounting period whose inclusive range contains the given date
pub async fn find_by_date(
    pool: &SqlitePool,
    date: NaiveDate,
) -> Result<Option<AccountingPeriod>, PeriodError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(SELECT_BY_DATE)
        .bind(date)
        .fetch_optional(pool)
        .await?;

    Ok(period)
}

/// Find the accounting period containing the given date within a transaction
pub async fn find_by_date_tx(
    tx: &mut Transaction<'_, Sqlite>,
    date: NaiveDate,
) -> Result<Option<AccountingPeriod>, PeriodError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(SELECT_BY_DATE)
        .bind(date)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(period)
}

/// Fetch a period by id
pub async fn find_by_id(
    pool: &SqlitePool,
    period_id: Uuid,
) -> Result<Option<AccountingPeriod>, PeriodError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(
        r#"
        SELECT id, name, start_date, end_date, status, closed_at, closed_by, created_at
        FROM accounting_periods
        WHERE id = $1
        "#,
    )
    .bind(period_id)
    .fetch_optional(pool)
    .await?;

    Ok(period)
}

/// Fetch a period by id within a transaction
pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Sqlite>,
    period_id: Uuid,
) -> Result<Option<AccountingPeriod>, PeriodError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(
        r#"
        SELECT id, name, start_date, end_date, status, closed_at, closed_by, created_at
        FROM accounting_periods
        WHERE id = $1
        "#,
    )
    .bind(period_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(period)
}

/// Insert a new accounting period, enforcing the non-overlap invariant
pub async fn insert_period(
    pool: &SqlitePool,
    name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<AccountingPeriod, PeriodError> {
    if start_date >= end_date {
        return Err(PeriodError::InvalidRange {
            start: start_date,
            end: end_date,
        });
    }

    let mut tx = pool.begin().await?;

    let overlapping: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM accounting_periods
        WHERE start_date <= $2
          AND end_date >= $1
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_one(&mut *tx)
    .await?;

    if overlapping > 0 {
        return Err(PeriodError::Overlapping {
            start: start_date,
            end: end_date,
        });
    }

    let period = AccountingPeriod {
        id: Uuid::new_v4(),
        name: name.to_string(),
        start_date,
        end_date,
        status: PeriodStatus::Open,
        closed_at: None,
        closed_by: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO accounting_periods (id, name, start_date, end_date, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(period.id)
    .bind(&period.name)
    .bind(period.start_date)
    .bind(period.end_date)
    .bind(period.status)
    .bind(period.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(period)
}

/// Mark a period closed within a transaction
pub async fn close_tx(
    tx: &mut Transaction<'_, Sqlite>,
    period_id: Uuid,
    closed_by: &str,
    closed_at: DateTime<Utc>,
) -> Result<(), PeriodError> {
    sqlx::query(
        r#"
        UPDATE accounting_periods
        SET status = 'closed', closed_at = $1, closed_by = $2
        WHERE id = $3
        "#,
    )
    .bind(closed_at)
    .bind(closed_by)
    .bind(period_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Validate that a date falls within an open accounting period
pub async fn validate_posting_date_tx(
    tx: &mut Transaction<'_, Sqlite>,
    date: NaiveDate,
) -> Result<AccountingPeriod, PeriodError> {
    let period = find_by_date_tx(tx, date).await?;

    match period {
        None => Err(PeriodError::NoPeriodForDate(date)),
        Some(p) if p.is_closed() => Err(PeriodError::PeriodClosed {
            name: p.name,
            period_id: p.id,
        }),
        Some(p) => Ok(p),
    }
}
