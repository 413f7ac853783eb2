//! Period close service
//!
//! Closing a period is the point where posted entries harden: the period
//! flips to closed and every posted entry dated inside the range is locked,
//! in one transaction.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::repos::journal_repo;
use crate::repos::period_repo::{self, AccountingPeriod, PeriodError};
use crate::services::audit_service::AuditService;

const SERVICE_NAME: &str = "PeriodCloseService";

/// Result of a period close
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeriodCloseSummary {
    pub period_id: Uuid,
    pub period_name: String,
    pub entries_locked: u64,
}

pub struct PeriodCloseService {
    pool: SqlitePool,
    audit: Arc<AuditService>,
}

impl PeriodCloseService {
    pub fn new(pool: SqlitePool, audit: Arc<AuditService>) -> Self {
        Self { pool, audit }
    }

    /// Create a new open period; ranges must not overlap existing periods
    pub async fn create_period(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        user: &str,
    ) -> Result<AccountingPeriod, PeriodError> {
        let period = period_repo::insert_period(&self.pool, name, start_date, end_date).await?;

        self.audit
            .record_operation(
                "AccountingPeriod",
                &period.id.to_string(),
                "PERIOD_CREATED",
                user,
                SERVICE_NAME,
                None,
                Some(json!({
                    "name": name,
                    "start_date": start_date,
                    "end_date": end_date,
                })),
            )
            .await?;

        Ok(period)
    }

    pub async fn find_by_id(
        &self,
        period_id: Uuid,
    ) -> Result<Option<AccountingPeriod>, PeriodError> {
        period_repo::find_by_id(&self.pool, period_id).await
    }

    pub async fn find_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Option<AccountingPeriod>, PeriodError> {
        period_repo::find_by_date(&self.pool, date).await
    }

    /// Close a period and lock every posted entry in its range
    ///
    /// Closed is final; there is no reopen operation.
    pub async fn close_period(
        &self,
        period_id: Uuid,
        user: &str,
    ) -> Result<PeriodCloseSummary, PeriodError> {
        let period = period_repo::find_by_id(&self.pool, period_id)
            .await?
            .ok_or(PeriodError::NotFound(period_id))?;

        if period.is_closed() {
            return Err(PeriodError::AlreadyClosed(period_id));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        period_repo::close_tx(&mut tx, period_id, user, now).await?;

        let entries_locked = journal_repo::lock_posted_in_range_tx(
            &mut tx,
            period.start_date,
            period.end_date,
            user,
            now,
        )
        .await?;

        self.audit
            .record_operation_tx(
                &mut tx,
                "AccountingPeriod",
                &period_id.to_string(),
                "PERIOD_CLOSED",
                user,
                SERVICE_NAME,
                Some(json!({ "status": "open" })),
                Some(json!({ "status": "closed", "entries_locked": entries_locked })),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            period = %period.name,
            entries_locked,
            "accounting period closed"
        );

        Ok(PeriodCloseSummary {
            period_id,
            period_name: period.name,
            entries_locked,
        })
    }
}
