//! Keyed outcome cache for side-effecting operations
//!
//! Each operation runs under an (operation_type, key) pair. The store
//! remembers whether the operation started, completed with a result, or
//! failed with an error code, and replays outcomes to retries instead of
//! re-executing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::repos::idempotency_repo::{self, IdempotencyStatus, InsertOutcome};

pub const OP_JOURNAL_ENTRY: &str = "journal_entry";
pub const OP_STOCK_MOVEMENT: &str = "stock_movement";
pub const OP_SIGNAL_HANDLER: &str = "signal_handler";

/// Handle to a `started` record held by the winning caller
#[derive(Debug, Clone)]
pub struct IdempotencyToken {
    pub record_id: Uuid,
    pub operation_type: String,
    pub idempotency_key: String,
}

/// What `probe` observed for a key
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Absent,
    Started,
    Completed(JsonValue),
    Failed(String),
}

/// Result of trying to claim a key
#[derive(Debug)]
pub enum BeginOutcome {
    /// This caller owns the key and must complete or fail it.
    Fresh(IdempotencyToken),
    /// A prior call completed; the stored result should be replayed.
    Replay(JsonValue),
    /// Another caller holds the key right now.
    InProgress,
    /// A prior call failed and the policy does not re-arm failures.
    PriorFailure(String),
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency key must not be empty")]
    EmptyKey,

    #[error("Operation did not resolve within the retry budget: {operation_type}:{key}")]
    Unresolved { operation_type: String, key: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Health view over the store
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdempotencyHealth {
    pub started: i64,
    pub completed: i64,
    pub failed: i64,
    pub expired_backlog: i64,
    pub stuck_started: i64,
    pub healthy: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IdempotencyStatistics {
    pub total_records: i64,
    pub started: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Options for a cleanup sweep
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub batch_size: i64,
    pub max_age: ChronoDuration,
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_age: ChronoDuration::days(30),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CleanupSummary {
    pub removed: u64,
    pub batches: u32,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct IdempotencyService {
    pool: SqlitePool,
    ttl: ChronoDuration,
    retry: RetryPolicy,
}

impl IdempotencyService {
    pub fn new(pool: SqlitePool, ttl: std::time::Duration, retry: RetryPolicy) -> Self {
        Self {
            pool,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24)),
            retry,
        }
    }

    /// Deterministic key for a journal-entry producing operation
    pub fn journal_entry_key(module: &str, model: &str, id: i64, event: &str) -> String {
        format!("JE:{module}:{model}:{id}:{event}")
    }

    /// Deterministic key for a stock movement
    pub fn stock_movement_key(
        product_id: i64,
        movement_type: &str,
        reference: &str,
        event: &str,
    ) -> String {
        format!("SM:{product_id}:{movement_type}:{reference}:{event}")
    }

    /// Observe the current outcome for a key without claiming it
    pub async fn probe(
        &self,
        operation_type: &str,
        key: &str,
    ) -> Result<ProbeOutcome, IdempotencyError> {
        let record = idempotency_repo::find(&self.pool, operation_type, key).await?;

        Ok(match record {
            None => ProbeOutcome::Absent,
            Some(r) => match r.status {
                IdempotencyStatus::Started => ProbeOutcome::Started,
                IdempotencyStatus::Completed => {
                    ProbeOutcome::Completed(r.result_data.unwrap_or(JsonValue::Null))
                }
                IdempotencyStatus::Failed => ProbeOutcome::Failed(
                    r.error_code.unwrap_or_else(|| "unknown".to_string()),
                ),
            },
        })
    }

    /// Claim a key, or learn why it cannot be claimed
    ///
    /// The insert is the linearisation point: of two racing callers exactly
    /// one receives [`BeginOutcome::Fresh`].
    pub async fn begin(
        &self,
        operation_type: &str,
        key: &str,
        context: Option<JsonValue>,
        user: Option<&str>,
    ) -> Result<BeginOutcome, IdempotencyError> {
        if key.is_empty() {
            return Err(IdempotencyError::EmptyKey);
        }

        let expires_at = Utc::now() + self.ttl;

        match idempotency_repo::insert_started(
            &self.pool,
            operation_type,
            key,
            context.as_ref(),
            user,
            expires_at,
        )
        .await?
        {
            InsertOutcome::Inserted(record_id) => Ok(BeginOutcome::Fresh(IdempotencyToken {
                record_id,
                operation_type: operation_type.to_string(),
                idempotency_key: key.to_string(),
            })),
            InsertOutcome::Conflict => match self.probe(operation_type, key).await? {
                ProbeOutcome::Started => Ok(BeginOutcome::InProgress),
                ProbeOutcome::Completed(result) => Ok(BeginOutcome::Replay(result)),
                ProbeOutcome::Failed(code) => {
                    if self.retry.retry_after_failure {
                        if let Some(record_id) = idempotency_repo::rearm_failed(
                            &self.pool,
                            operation_type,
                            key,
                            expires_at,
                        )
                        .await?
                        {
                            return Ok(BeginOutcome::Fresh(IdempotencyToken {
                                record_id,
                                operation_type: operation_type.to_string(),
                                idempotency_key: key.to_string(),
                            }));
                        }
                        // Someone else re-armed it first.
                        Ok(BeginOutcome::InProgress)
                    } else {
                        Ok(BeginOutcome::PriorFailure(code))
                    }
                }
                // The row vanished between insert and probe (cleanup race);
                // treat as in progress and let the caller retry.
                ProbeOutcome::Absent => Ok(BeginOutcome::InProgress),
            },
        }
    }

    /// Mark the claimed operation completed, inside the caller's transaction
    pub async fn complete_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        token: &IdempotencyToken,
        result: &JsonValue,
    ) -> Result<(), IdempotencyError> {
        let expires_at = Utc::now() + self.ttl;
        idempotency_repo::complete_tx(tx, token.record_id, result, expires_at).await?;
        Ok(())
    }

    /// Mark the claimed operation failed with an error code
    pub async fn fail(
        &self,
        token: &IdempotencyToken,
        error_code: &str,
    ) -> Result<(), IdempotencyError> {
        idempotency_repo::mark_failed(&self.pool, token.record_id, error_code).await?;
        Ok(())
    }

    /// Wait for another caller's in-flight operation to resolve
    ///
    /// Applies the configured backoff schedule; gives up with
    /// [`IdempotencyError::Unresolved`] when the budget runs out.
    pub async fn wait_for_completion(
        &self,
        operation_type: &str,
        key: &str,
    ) -> Result<ProbeOutcome, IdempotencyError> {
        for attempt in 1..=self.retry.max_attempts {
            match self.probe(operation_type, key).await? {
                ProbeOutcome::Started => {
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                resolved => return Ok(resolved),
            }
        }

        Err(IdempotencyError::Unresolved {
            operation_type: operation_type.to_string(),
            key: key.to_string(),
        })
    }

    /// Remove expired and aged-out records in bounded batches
    ///
    /// Each batch is an independent delete, so a cancelled sweep leaves no
    /// partial batch behind.
    pub async fn cleanup(&self, options: &CleanupOptions) -> Result<CleanupSummary, IdempotencyError> {
        let now = Utc::now();
        let older_than = now - options.max_age;

        if options.dry_run {
            let expired = idempotency_repo::expired_count(&self.pool, now).await?;
            return Ok(CleanupSummary {
                removed: expired as u64,
                batches: 0,
                dry_run: true,
            });
        }

        let mut removed = 0u64;
        let mut batches = 0u32;

        loop {
            let batch =
                idempotency_repo::cleanup_batch(&self.pool, now, older_than, options.batch_size)
                    .await?;
            if batch == 0 {
                break;
            }
            removed += batch;
            batches += 1;
        }

        tracing::info!(removed, batches, "idempotency cleanup finished");

        Ok(CleanupSummary {
            removed,
            batches,
            dry_run: false,
        })
    }

    pub async fn get_health(&self) -> Result<IdempotencyHealth, IdempotencyError> {
        let now = Utc::now();
        let counts = idempotency_repo::counts_by_status(&self.pool).await?;

        let mut started = 0;
        let mut completed = 0;
        let mut failed = 0;
        for (status, count) in counts {
            match status {
                IdempotencyStatus::Started => started = count,
                IdempotencyStatus::Completed => completed = count,
                IdempotencyStatus::Failed => failed = count,
            }
        }

        let expired_backlog = idempotency_repo::expired_count(&self.pool, now).await?;
        let stuck_started =
            idempotency_repo::stuck_started_count(&self.pool, now - ChronoDuration::hours(1))
                .await?;

        Ok(IdempotencyHealth {
            started,
            completed,
            failed,
            expired_backlog,
            stuck_started,
            healthy: stuck_started == 0,
        })
    }

    pub async fn get_statistics(&self) -> Result<IdempotencyStatistics, IdempotencyError> {
        let counts = idempotency_repo::counts_by_status(&self.pool).await?;

        let mut stats = IdempotencyStatistics {
            total_records: 0,
            started: 0,
            completed: 0,
            failed: 0,
        };
        for (status, count) in counts {
            stats.total_records += count;
            match status {
                IdempotencyStatus::Started => stats.started = count,
                IdempotencyStatus::Completed => stats.completed = count,
                IdempotencyStatus::Failed => stats.failed = count,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_entry_key_format() {
        assert_eq!(
            IdempotencyService::journal_entry_key("students", "StudentFee", 123, "create"),
            "JE:students:StudentFee:123:create"
        );
    }

    #[test]
    fn stock_movement_key_format() {
        assert_eq!(
            IdempotencyService::stock_movement_key(7, "out", "SO-99", "create"),
            "SM:7:out:SO-99:create"
        );
    }
}
