//! Repository over the business-record registry
//!
//! Domain modules sync their rows into `business_records`; the governance
//! core reads it to resolve source-linkage triples and to run the
//! configurable singleton checks.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Does a live record exist for the triple?
pub async fn exists(
    pool: &SqlitePool,
    module: &str,
    model: &str,
    record_id: i64,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM business_records
        WHERE module = $1 AND model = $2 AND record_id = $3
        "#,
    )
    .bind(module)
    .bind(model)
    .bind(record_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Same check within a transaction
pub async fn exists_tx(
    tx: &mut Transaction<'_, Sqlite>,
    module: &str,
    model: &str,
    record_id: i64,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM business_records
        WHERE module = $1 AND model = $2 AND record_id = $3
        "#,
    )
    .bind(module)
    .bind(model)
    .bind(record_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count > 0)
}

/// Register a business record (used by domain sync and tests)
pub async fn register(
    pool: &SqlitePool,
    module: &str,
    model: &str,
    record_id: i64,
    is_active: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO business_records (module, model, record_id, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (module, model, record_id) DO UPDATE SET is_active = excluded.is_active
        "#,
    )
    .bind(module)
    .bind(model)
    .bind(record_id)
    .bind(is_active)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Active record ids for a `module.model` entity, for singleton checks
pub async fn active_record_ids(
    pool: &SqlitePool,
    module: &str,
    model: &str,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT record_id
        FROM business_records
        WHERE module = $1 AND model = $2 AND is_active = 1
        ORDER BY record_id
        "#,
    )
    .bind(module)
    .bind(model)
    .fetch_all(pool)
    .await
}
