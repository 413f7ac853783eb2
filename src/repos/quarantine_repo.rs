//! Repository for quarantined records
//!
//! Quarantined data is never deleted; rows are marked and left queryable
//! for review.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub enum QuarantineStatus {
    Quarantined,
    Released,
    Discarded,
}

/// Quarantine record (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct QuarantineRecord {
    pub id: Uuid,
    pub model_name: String,
    pub object_id: String,
    pub corruption_type: String,
    pub confidence: Confidence,
    pub reason: String,
    pub evidence: JsonValue,
    pub original_data: Option<JsonValue>,
    pub status: QuarantineStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
}

/// Struct for inserting a quarantine record
#[derive(Debug, Clone)]
pub struct QuarantineInsert {
    pub model_name: String,
    pub object_id: String,
    pub corruption_type: String,
    pub confidence: Confidence,
    pub reason: String,
    pub evidence: JsonValue,
    pub original_data: Option<JsonValue>,
    pub created_by: String,
}

const SELECT_RECORD: &str = r#"
    SELECT id, model_name, object_id, corruption_type, confidence, reason, evidence,
           original_data, status, created_by, created_at, reviewed_at, reviewed_by
    FROM quarantine_records
"#;

/// Insert a quarantine record, returning its id
pub async fn insert(pool: &SqlitePool, record: &QuarantineInsert) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO quarantine_records
            (id, model_name, object_id, corruption_type, confidence, reason, evidence,
             original_data, status, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'quarantined', $9, $10)
        "#,
    )
    .bind(id)
    .bind(&record.model_name)
    .bind(&record.object_id)
    .bind(&record.corruption_type)
    .bind(record.confidence)
    .bind(&record.reason)
    .bind(&record.evidence)
    .bind(&record.original_data)
    .bind(&record.created_by)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(id)
}

/// Same insert within a transaction
pub async fn insert_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &QuarantineInsert,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO quarantine_records
            (id, model_name, object_id, corruption_type, confidence, reason, evidence,
             original_data, status, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'quarantined', $9, $10)
        "#,
    )
    .bind(id)
    .bind(&record.model_name)
    .bind(&record.object_id)
    .bind(&record.corruption_type)
    .bind(record.confidence)
    .bind(&record.reason)
    .bind(&record.evidence)
    .bind(&record.original_data)
    .bind(&record.created_by)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Fetch a quarantine record by id
pub async fn fetch(
    pool: &SqlitePool,
    record_id: Uuid,
) -> Result<Option<QuarantineRecord>, sqlx::Error> {
    sqlx::query_as::<_, QuarantineRecord>(&format!("{SELECT_RECORD} WHERE id = $1"))
        .bind(record_id)
        .fetch_optional(pool)
        .await
}

/// Transition a record's review status
pub async fn update_status(
    pool: &SqlitePool,
    record_id: Uuid,
    status: QuarantineStatus,
    reviewed_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE quarantine_records
        SET status = $1, reviewed_at = $2, reviewed_by = $3
        WHERE id = $4
        "#,
    )
    .bind(status)
    .bind(Utc::now())
    .bind(reviewed_by)
    .bind(record_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Query records by optional corruption type, minimum confidence, and age
pub async fn query(
    pool: &SqlitePool,
    corruption_type: Option<&str>,
    min_confidence: Option<Confidence>,
    created_before: Option<DateTime<Utc>>,
) -> Result<Vec<QuarantineRecord>, sqlx::Error> {
    let mut records = sqlx::query_as::<_, QuarantineRecord>(&format!(
        "{SELECT_RECORD} WHERE status = 'quarantined' ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;

    if let Some(ctype) = corruption_type {
        records.retain(|r| r.corruption_type == ctype);
    }
    if let Some(min) = min_confidence {
        records.retain(|r| r.confidence >= min);
    }
    if let Some(before) = created_before {
        records.retain(|r| r.created_at < before);
    }

    Ok(records)
}

/// Counts of quarantined rows grouped by corruption type
pub async fn counts_by_type(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT corruption_type, COUNT(*)
        FROM quarantine_records
        WHERE status = 'quarantined'
        GROUP BY corruption_type
        ORDER BY corruption_type
        "#,
    )
    .fetch_all(pool)
    .await
}
