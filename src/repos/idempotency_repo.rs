//! Repository for idempotency records
//!
//! The uniqueness constraint on (operation_type, idempotency_key) is the
//! linearisation point for duplicate suppression: racing inserts resolve
//! to exactly one `started` row.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Started,
    Completed,
    Failed,
}

/// Idempotency record (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub operation_type: String,
    pub idempotency_key: String,
    pub status: IdempotencyStatus,
    pub context_data: Option<JsonValue>,
    pub result_data: Option<JsonValue>,
    pub error_code: Option<String>,
    pub user_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

const SELECT_RECORD: &str = r#"
    SELECT id, operation_type, idempotency_key, status, context_data, result_data,
           error_code, user_ref, created_at, expires_at
    FROM idempotency_records
"#;

/// Outcome of attempting to insert a `started` row
pub enum InsertOutcome {
    Inserted(Uuid),
    /// The uniqueness constraint rejected the insert; another record holds
    /// the key.
    Conflict,
}

/// Insert a `started` record, relying on the uniqueness constraint to
/// arbitrate races
pub async fn insert_started(
    pool: &SqlitePool,
    operation_type: &str,
    idempotency_key: &str,
    context_data: Option<&JsonValue>,
    user_ref: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<InsertOutcome, sqlx::Error> {
    let id = Uuid::new_v4();

    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_records
            (id, operation_type, idempotency_key, status, context_data, user_ref,
             created_at, expires_at)
        VALUES ($1, $2, $3, 'started', $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(operation_type)
    .bind(idempotency_key)
    .bind(context_data)
    .bind(user_ref)
    .bind(Utc::now())
    .bind(expires_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted(id)),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(InsertOutcome::Conflict),
        Err(e) => Err(e),
    }
}

/// Fetch the record for a key, if any
pub async fn find(
    pool: &SqlitePool,
    operation_type: &str,
    idempotency_key: &str,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as::<_, IdempotencyRecord>(&format!(
        "{SELECT_RECORD} WHERE operation_type = $1 AND idempotency_key = $2"
    ))
    .bind(operation_type)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

/// Transition a `started` record to `completed`, storing the result payload
pub async fn complete_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: Uuid,
    result_data: &JsonValue,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = 'completed', result_data = $1, expires_at = $2
        WHERE id = $3 AND status = 'started'
        "#,
    )
    .bind(result_data)
    .bind(expires_at)
    .bind(record_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Transition a `started` record to `failed` with the error code
pub async fn mark_failed(
    pool: &SqlitePool,
    record_id: Uuid,
    error_code: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = 'failed', error_code = $1
        WHERE id = $2 AND status = 'started'
        "#,
    )
    .bind(error_code)
    .bind(record_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Re-arm a `failed` record for another attempt
///
/// Returns true if the record was re-armed.
pub async fn rearm_failed(
    pool: &SqlitePool,
    operation_type: &str,
    idempotency_key: &str,
    expires_at: DateTime<Utc>,
) -> Result<Option<Uuid>, sqlx::Error> {
    let id: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE idempotency_records
        SET status = 'started', error_code = NULL, created_at = $1, expires_at = $2
        WHERE operation_type = $3 AND idempotency_key = $4 AND status = 'failed'
        RETURNING id
        "#,
    )
    .bind(Utc::now())
    .bind(expires_at)
    .bind(operation_type)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Delete one batch of expired or aged-out records
///
/// Returns the number of rows removed.
pub async fn cleanup_batch(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    older_than: DateTime<Utc>,
    batch_size: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM idempotency_records
        WHERE id IN (
            SELECT id FROM idempotency_records
            WHERE expires_at < $1 OR created_at < $2
            LIMIT $3
        )
        "#,
    )
    .bind(now)
    .bind(older_than)
    .bind(batch_size)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Record counts grouped by status
pub async fn counts_by_status(
    pool: &SqlitePool,
) -> Result<Vec<(IdempotencyStatus, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (IdempotencyStatus, i64)>(
        "SELECT status, COUNT(*) FROM idempotency_records GROUP BY status",
    )
    .fetch_all(pool)
    .await
}

/// Count of expired records still present
pub async fn expired_count(pool: &SqlitePool, now: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM idempotency_records WHERE expires_at < $1")
        .bind(now)
        .fetch_one(pool)
        .await
}

/// Count of `started` records older than the given instant
///
/// A stuck `started` row means a writer died mid-operation; these need
/// operator attention because they block the key until expiry.
pub async fn stuck_started_count(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM idempotency_records WHERE status = 'started' AND created_at < $1",
    )
    .bind(older_than)
    .fetch_one(pool)
    .await
}
