//! Append-only audit trail service
//!
//! Every governed operation records exactly one audit row on success and a
//! failure row when it aborts. All components write through this service.

use serde_json::Value as JsonValue;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::repos::audit_repo::{self, AuditInsert, AuditRecord};

#[derive(Debug, Clone)]
pub struct AuditService {
    pool: SqlitePool,
}

impl AuditService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an operation against an object
    pub async fn record_operation(
        &self,
        model_name: &str,
        object_id: &str,
        operation: &str,
        username: &str,
        service: &str,
        before_data: Option<JsonValue>,
        after_data: Option<JsonValue>,
    ) -> Result<Uuid, sqlx::Error> {
        audit_repo::insert(
            &self.pool,
            &AuditInsert {
                model_name: model_name.to_string(),
                object_id: object_id.to_string(),
                operation: operation.to_string(),
                username: username.to_string(),
                service: service.to_string(),
                before_data,
                after_data,
            },
        )
        .await
    }

    /// Record an operation inside the caller's transaction so the audit row
    /// commits with the rest of the atomic unit
    pub async fn record_operation_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        model_name: &str,
        object_id: &str,
        operation: &str,
        username: &str,
        service: &str,
        before_data: Option<JsonValue>,
        after_data: Option<JsonValue>,
    ) -> Result<Uuid, sqlx::Error> {
        audit_repo::insert_tx(
            tx,
            &AuditInsert {
                model_name: model_name.to_string(),
                object_id: object_id.to_string(),
                operation: operation.to_string(),
                username: username.to_string(),
                service: service.to_string(),
                before_data,
                after_data,
            },
        )
        .await
    }

    pub async fn history_for(
        &self,
        model_name: &str,
        object_id: &str,
    ) -> Result<Vec<AuditRecord>, sqlx::Error> {
        audit_repo::for_object(&self.pool, model_name, object_id).await
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>, sqlx::Error> {
        audit_repo::recent(&self.pool, limit).await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        audit_repo::count(&self.pool).await
    }
}

/// Top-level keys whose values differ between two object snapshots.
pub fn changed_fields(before: &JsonValue, after: &JsonValue) -> Vec<String> {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return Vec::new();
    };

    let mut changed: Vec<String> = before
        .iter()
        .filter(|(key, value)| after.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect();

    for key in after.keys() {
        if !before.contains_key(key) {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}
