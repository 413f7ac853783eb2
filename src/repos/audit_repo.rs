//! Repository for the append-only audit trail
//!
//! Insert and read only. There is intentionally no update or delete
//! function in this module.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Audit trail row (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub model_name: String,
    pub object_id: String,
    pub operation: String,
    pub username: String,
    pub service: String,
    pub before_data: Option<JsonValue>,
    pub after_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// Struct for inserting an audit row
#[derive(Debug, Clone)]
pub struct AuditInsert {
    pub model_name: String,
    pub object_id: String,
    pub operation: String,
    pub username: String,
    pub service: String,
    pub before_data: Option<JsonValue>,
    pub after_data: Option<JsonValue>,
}

const INSERT_AUDIT: &str = r#"
    INSERT INTO audit_trail
        (id, model_name, object_id, operation, username, service,
         before_data, after_data, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

const SELECT_AUDIT: &str = r#"
    SELECT id, model_name, object_id, operation, username, service,
           before_data, after_data, created_at
    FROM audit_trail
"#;

/// Append an audit row
pub async fn insert(pool: &SqlitePool, record: &AuditInsert) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(INSERT_AUDIT)
        .bind(id)
        .bind(&record.model_name)
        .bind(&record.object_id)
        .bind(&record.operation)
        .bind(&record.username)
        .bind(&record.service)
        .bind(&record.before_data)
        .bind(&record.after_data)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(id)
}

/// Append an audit row within a transaction
pub async fn insert_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &AuditInsert,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(INSERT_AUDIT)
        .bind(id)
        .bind(&record.model_name)
        .bind(&record.object_id)
        .bind(&record.operation)
        .bind(&record.username)
        .bind(&record.service)
        .bind(&record.before_data)
        .bind(&record.after_data)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

    Ok(id)
}

/// Audit rows for one object, oldest first
pub async fn for_object(
    pool: &SqlitePool,
    model_name: &str,
    object_id: &str,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(&format!(
        "{SELECT_AUDIT} WHERE model_name = $1 AND object_id = $2 ORDER BY created_at"
    ))
    .bind(model_name)
    .bind(object_id)
    .fetch_all(pool)
    .await
}

/// Most recent audit rows
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(&format!(
        "{SELECT_AUDIT} ORDER BY created_at DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Audit rows recorded under a given operation name
pub async fn for_operation(
    pool: &SqlitePool,
    operation: &str,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(&format!(
        "{SELECT_AUDIT} WHERE operation = $1 ORDER BY created_at"
    ))
    .bind(operation)
    .fetch_all(pool)
    .await
}

/// Total number of audit rows
pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_trail")
        .fetch_one(pool)
        .await
}
