//! Repository for journal entries, their lines, and number minting
//!
//! All writes to these tables go through the accounting gateway; nothing
//! else in the system inserts or mutates ledger rows.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Canonical entry-number prefix. Legacy prefixes are a migration concern.
pub const ENTRY_NUMBER_PREFIX: &str = "JE";

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "snake_case")]
pub enum EntryType {
    Manual,
    Automatic,
    Adjustment,
    Closing,
    Opening,
    Reversal,
    Fee,
    TuitionFee,
    ApplicationFee,
    Transfer,
    Refund,
    Settlement,
}

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
    Cancelled,
}

/// Journal entry header (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub number: String,
    pub entry_date: NaiveDate,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub description: String,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub source_module: String,
    pub source_model: String,
    pub source_id: i64,
    pub period_id: Uuid,
    pub financial_category: Option<String>,
    pub financial_subcategory: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_by_service: String,
    pub original_entry_id: Option<Uuid>,
    pub is_reversal: bool,
    pub reversal_reason: Option<String>,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }
}

/// Journal line (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct JournalLine {
    pub id: Uuid,
    pub journal_entry_id: Uuid,
    pub line_no: i64,
    pub account_code: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub description: Option<String>,
    pub cost_center: Option<String>,
    pub project: Option<String>,
}

/// Struct for inserting a journal entry header
#[derive(Debug, Clone)]
pub struct JournalEntryInsert {
    pub id: Uuid,
    pub number: String,
    pub entry_date: NaiveDate,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub description: String,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub source_module: String,
    pub source_model: String,
    pub source_id: i64,
    pub period_id: Uuid,
    pub financial_category: Option<String>,
    pub financial_subcategory: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub original_entry_id: Option<Uuid>,
    pub is_reversal: bool,
    pub reversal_reason: Option<String>,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_by: String,
}

/// Struct for inserting a journal line
#[derive(Debug, Clone)]
pub struct JournalLineInsert {
    pub id: Uuid,
    pub line_no: i64,
    pub account_code: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub description: Option<String>,
    pub cost_center: Option<String>,
    pub project: Option<String>,
}

const SELECT_ENTRY: &str = r#"
    SELECT id, number, entry_date, entry_type, status, description,
           reference, reference_type, reference_id,
           source_module, source_model, source_id, period_id,
           financial_category, financial_subcategory,
           posted_at, posted_by, idempotency_key, created_by_service,
           original_entry_id, is_reversal, reversal_reason,
           is_locked, locked_at, locked_by, created_by, created_at
    FROM journal_entries
"#;

/// Mint the next entry number for a prefix under the sequence row
///
/// The counter lives in `entry_sequences` and is incremented inside the
/// caller's transaction, so committed numbers are gap-free and monotonic
/// in commit order.
pub async fn next_entry_number(
    tx: &mut Transaction<'_, Sqlite>,
    prefix: &str,
) -> Result<String, sqlx::Error> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO entry_sequences (prefix, value)
        VALUES ($1, 1)
        ON CONFLICT (prefix) DO UPDATE SET value = value + 1
        RETURNING value
        "#,
    )
    .bind(prefix)
    .fetch_one(&mut **tx)
    .await?;

    Ok(format!("{}-{:04}", prefix, value))
}

/// Insert a journal entry header
pub async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &JournalEntryInsert,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO journal_entries
            (id, number, entry_date, entry_type, status, description,
             reference, reference_type, reference_id,
             source_module, source_model, source_id, period_id,
             financial_category, financial_subcategory,
             posted_at, posted_by, idempotency_key, created_by_service,
             original_entry_id, is_reversal, reversal_reason,
             is_locked, locked_at, locked_by, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.number)
    .bind(entry.entry_date)
    .bind(entry.entry_type)
    .bind(entry.status)
    .bind(&entry.description)
    .bind(&entry.reference)
    .bind(&entry.reference_type)
    .bind(&entry.reference_id)
    .bind(&entry.source_module)
    .bind(&entry.source_model)
    .bind(entry.source_id)
    .bind(entry.period_id)
    .bind(&entry.financial_category)
    .bind(&entry.financial_subcategory)
    .bind(entry.posted_at)
    .bind(&entry.posted_by)
    .bind(&entry.idempotency_key)
    .bind("AccountingGateway")
    .bind(entry.original_entry_id)
    .bind(entry.is_reversal)
    .bind(&entry.reversal_reason)
    .bind(entry.is_locked)
    .bind(entry.locked_at)
    .bind(&entry.locked_by)
    .bind(&entry.created_by)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(entry.id)
}

/// Bulk insert journal lines for a journal entry
pub async fn bulk_insert_lines(
    tx: &mut Transaction<'_, Sqlite>,
    journal_entry_id: Uuid,
    lines: &[JournalLineInsert],
) -> Result<(), sqlx::Error> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO journal_entry_lines
                (id, journal_entry_id, line_no, account_code, debit_minor, credit_minor,
                 description, cost_center, project)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(line.id)
        .bind(journal_entry_id)
        .bind(line.line_no)
        .bind(&line.account_code)
        .bind(line.debit_minor)
        .bind(line.credit_minor)
        .bind(&line.description)
        .bind(&line.cost_center)
        .bind(&line.project)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Fetch a journal entry by id
pub async fn fetch_entry(
    pool: &SqlitePool,
    entry_id: Uuid,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{SELECT_ENTRY} WHERE id = $1"))
        .bind(entry_id)
        .fetch_optional(pool)
        .await
}

/// Fetch a journal entry by id within a transaction
pub async fn fetch_entry_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Uuid,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{SELECT_ENTRY} WHERE id = $1"))
        .bind(entry_id)
        .fetch_optional(&mut **tx)
        .await
}

/// Fetch a journal entry by its minted number
pub async fn fetch_entry_by_number(
    pool: &SqlitePool,
    number: &str,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{SELECT_ENTRY} WHERE number = $1"))
        .bind(number)
        .fetch_optional(pool)
        .await
}

/// Fetch the lines of an entry ordered by line number
pub async fn fetch_lines(
    pool: &SqlitePool,
    entry_id: Uuid,
) -> Result<Vec<JournalLine>, sqlx::Error> {
    sqlx::query_as::<_, JournalLine>(
        r#"
        SELECT id, journal_entry_id, line_no, account_code, debit_minor, credit_minor,
               description, cost_center, project
        FROM journal_entry_lines
        WHERE journal_entry_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(entry_id)
    .fetch_all(pool)
    .await
}

/// Fetch a journal entry with its lines
pub async fn fetch_entry_with_lines(
    pool: &SqlitePool,
    entry_id: Uuid,
) -> Result<Option<(JournalEntry, Vec<JournalLine>)>, sqlx::Error> {
    let Some(entry) = fetch_entry(pool, entry_id).await? else {
        return Ok(None);
    };

    let lines = fetch_lines(pool, entry_id).await?;

    Ok(Some((entry, lines)))
}

/// Fetch the entry persisted under an idempotency key, if any
pub async fn find_by_idempotency_key(
    pool: &SqlitePool,
    idempotency_key: &str,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{SELECT_ENTRY} WHERE idempotency_key = $1"))
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
}

/// Find the reversal entry that references the given original, if any
pub async fn find_reversal_of(
    pool: &SqlitePool,
    original_entry_id: Uuid,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!(
        "{SELECT_ENTRY} WHERE original_entry_id = $1 AND is_reversal = 1 LIMIT 1"
    ))
    .bind(original_entry_id)
    .fetch_optional(pool)
    .await
}

/// Transition a draft entry to posted
pub async fn mark_posted_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Uuid,
    posted_by: &str,
    posted_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE journal_entries
        SET status = 'posted', posted_at = $1, posted_by = $2
        WHERE id = $3
        "#,
    )
    .bind(posted_at)
    .bind(posted_by)
    .bind(entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Lock a single posted entry
pub async fn mark_locked_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Uuid,
    locked_by: &str,
    locked_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE journal_entries
        SET is_locked = 1, locked_at = $1, locked_by = $2
        WHERE id = $3
        "#,
    )
    .bind(locked_at)
    .bind(locked_by)
    .bind(entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Transition a draft entry to cancelled
pub async fn mark_cancelled_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE journal_entries SET status = 'cancelled' WHERE id = $1")
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Delete a draft entry and its lines
pub async fn delete_entry_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM journal_entry_lines WHERE journal_entry_id = $1")
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM journal_entries WHERE id = $1")
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Lock every posted, unlocked entry dated inside the given range
///
/// Returns the number of entries locked.
pub async fn lock_posted_in_range_tx(
    tx: &mut Transaction<'_, Sqlite>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    locked_by: &str,
    locked_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE journal_entries
        SET is_locked = 1, locked_at = $1, locked_by = $2
        WHERE status = 'posted'
          AND is_locked = 0
          AND entry_date >= $3
          AND entry_date <= $4
        "#,
    )
    .bind(locked_at)
    .bind(locked_by)
    .bind(start_date)
    .bind(end_date)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Posted entries in the given date range that are not yet locked
pub async fn unlocked_posted_in_range(
    pool: &SqlitePool,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!(
        r#"{SELECT_ENTRY}
        WHERE status = 'posted'
          AND is_locked = 0
          AND entry_date >= $1
          AND entry_date <= $2
        ORDER BY number
        "#
    ))
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await
}

/// Count posted entries in the given date range
pub async fn count_posted_in_range(
    pool: &SqlitePool,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM journal_entries
        WHERE status = 'posted'
          AND entry_date >= $1
          AND entry_date <= $2
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_one(pool)
    .await
}

/// All entries produced by a given source pair
pub async fn entries_for_source(
    pool: &SqlitePool,
    source_module: &str,
    source_model: &str,
) -> Result<Vec<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!(
        "{SELECT_ENTRY} WHERE source_module = $1 AND source_model = $2 ORDER BY number"
    ))
    .bind(source_module)
    .bind(source_model)
    .fetch_all(pool)
    .await
}

/// All entries, for linkage scans
pub async fn all_entries(pool: &SqlitePool) -> Result<Vec<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{SELECT_ENTRY} ORDER BY number"))
        .fetch_all(pool)
        .await
}

/// Posted entries whose line totals differ by more than the tolerance
///
/// Returns (entry id, number, debit total, credit total) tuples.
pub async fn unbalanced_posted(
    pool: &SqlitePool,
    tolerance_minor: i64,
) -> Result<Vec<(Uuid, String, i64, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, String, i64, i64)>(
        r#"
        SELECT je.id, je.number,
               COALESCE(SUM(jl.debit_minor), 0) AS debit_total,
               COALESCE(SUM(jl.credit_minor), 0) AS credit_total
        FROM journal_entries je
        LEFT JOIN journal_entry_lines jl ON jl.journal_entry_id = je.id
        WHERE je.status = 'posted'
        GROUP BY je.id, je.number
        HAVING ABS(COALESCE(SUM(jl.debit_minor), 0) - COALESCE(SUM(jl.credit_minor), 0)) > $1
        ORDER BY je.number
        "#,
    )
    .bind(tolerance_minor)
    .fetch_all(pool)
    .await
}

/// Total number of journal entries
pub async fn count_entries(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM journal_entries")
        .fetch_one(pool)
        .await
}
