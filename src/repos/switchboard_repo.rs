//! Persistence for switchboard flag state and snapshots
//!
//! Flag metadata (criticality, dependencies, risk levels) lives in the
//! startup registry; only the mutable enabled/active bit is stored here.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// A persisted flag bit
#[derive(Debug, Clone, FromRow)]
pub struct FlagRow {
    pub name: String,
    pub enabled: bool,
}

/// A persisted switchboard snapshot
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub reason: String,
    pub created_by: String,
    pub state_json: String,
    pub state_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Load all component flag bits
pub async fn load_component_flags(pool: &SqlitePool) -> Result<Vec<FlagRow>, sqlx::Error> {
    sqlx::query_as::<_, FlagRow>("SELECT name, enabled FROM component_flags")
        .fetch_all(pool)
        .await
}

/// Load all workflow flag bits
pub async fn load_workflow_flags(pool: &SqlitePool) -> Result<Vec<FlagRow>, sqlx::Error> {
    sqlx::query_as::<_, FlagRow>("SELECT name, enabled FROM workflow_flags")
        .fetch_all(pool)
        .await
}

/// Load all emergency flag bits
pub async fn load_emergency_flags(pool: &SqlitePool) -> Result<Vec<FlagRow>, sqlx::Error> {
    sqlx::query_as::<_, FlagRow>("SELECT name, active AS enabled FROM emergency_flags")
        .fetch_all(pool)
        .await
}

/// Persist a component flag bit
pub async fn upsert_component_tx(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    enabled: bool,
    updated_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO component_flags (name, enabled, updated_at, updated_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
            SET enabled = excluded.enabled,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
        "#,
    )
    .bind(name)
    .bind(enabled)
    .bind(Utc::now())
    .bind(updated_by)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Persist a workflow flag bit
pub async fn upsert_workflow_tx(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    enabled: bool,
    updated_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflow_flags (name, enabled, updated_at, updated_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
            SET enabled = excluded.enabled,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
        "#,
    )
    .bind(name)
    .bind(enabled)
    .bind(Utc::now())
    .bind(updated_by)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Persist an emergency flag bit
pub async fn upsert_emergency_tx(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    active: bool,
    updated_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO emergency_flags (name, active, updated_at, updated_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
            SET active = excluded.active,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
        "#,
    )
    .bind(name)
    .bind(active)
    .bind(Utc::now())
    .bind(updated_by)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Insert a snapshot row
pub async fn insert_snapshot(
    pool: &SqlitePool,
    reason: &str,
    created_by: &str,
    state_json: &str,
    state_hash: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO switchboard_snapshots (id, reason, created_by, state_json, state_hash, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(reason)
    .bind(created_by)
    .bind(state_json)
    .bind(state_hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(id)
}

/// Fetch a snapshot by id
pub async fn fetch_snapshot(
    pool: &SqlitePool,
    snapshot_id: Uuid,
) -> Result<Option<SnapshotRow>, sqlx::Error> {
    sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, reason, created_by, state_json, state_hash, created_at
        FROM switchboard_snapshots
        WHERE id = $1
        "#,
    )
    .bind(snapshot_id)
    .fetch_optional(pool)
    .await
}

/// Most recent snapshots, newest first
pub async fn list_snapshots(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<SnapshotRow>, sqlx::Error> {
    sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, reason, created_by, state_json, state_hash, created_at
        FROM switchboard_snapshots
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
