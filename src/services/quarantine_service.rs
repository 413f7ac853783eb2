//! Quarantine store for records suspected of corruption
//!
//! Suspect rows are marked and moved out of the reachable set for normal
//! reads; nothing is deleted. Review transitions them to released or
//! discarded.

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::repos::quarantine_repo::{
    self, Confidence, QuarantineInsert, QuarantineRecord, QuarantineStatus,
};
use crate::services::audit_service::AuditService;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("Quarantine record not found: {0}")]
    NotFound(Uuid),

    #[error("Record already reviewed: {0}")]
    AlreadyReviewed(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A submission to the quarantine store
#[derive(Debug, Clone)]
pub struct QuarantineSubmission {
    pub model_name: String,
    pub object_id: String,
    pub corruption_type: String,
    pub confidence: Confidence,
    pub reason: String,
    pub evidence: JsonValue,
    pub original_data: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct QuarantineService {
    pool: SqlitePool,
    audit: Arc<AuditService>,
}

impl QuarantineService {
    pub fn new(pool: SqlitePool, audit: Arc<AuditService>) -> Self {
        Self { pool, audit }
    }

    /// Accept a submission and record the isolation in the audit trail
    pub async fn quarantine(
        &self,
        submission: QuarantineSubmission,
        user: &str,
    ) -> Result<Uuid, QuarantineError> {
        let record_id = quarantine_repo::insert(
            &self.pool,
            &QuarantineInsert {
                model_name: submission.model_name.clone(),
                object_id: submission.object_id.clone(),
                corruption_type: submission.corruption_type.clone(),
                confidence: submission.confidence,
                reason: submission.reason.clone(),
                evidence: submission.evidence.clone(),
                original_data: submission.original_data.clone(),
                created_by: user.to_string(),
            },
        )
        .await?;

        self.audit
            .record_operation(
                &submission.model_name,
                &submission.object_id,
                "RECORD_QUARANTINED",
                user,
                "QuarantineService",
                None,
                Some(json!({
                    "quarantine_id": record_id,
                    "corruption_type": submission.corruption_type,
                    "confidence": submission.confidence.as_str(),
                    "reason": submission.reason,
                })),
            )
            .await?;

        tracing::warn!(
            model = %submission.model_name,
            object_id = submission.object_id,
            corruption_type = %submission.corruption_type,
            "record quarantined"
        );

        Ok(record_id)
    }

    async fn review(
        &self,
        record_id: Uuid,
        status: QuarantineStatus,
        operation: &str,
        user: &str,
    ) -> Result<(), QuarantineError> {
        let record = quarantine_repo::fetch(&self.pool, record_id)
            .await?
            .ok_or(QuarantineError::NotFound(record_id))?;

        if record.status != QuarantineStatus::Quarantined {
            return Err(QuarantineError::AlreadyReviewed(record_id));
        }

        quarantine_repo::update_status(&self.pool, record_id, status, user).await?;

        self.audit
            .record_operation(
                &record.model_name,
                &record.object_id,
                operation,
                user,
                "QuarantineService",
                None,
                Some(json!({"quarantine_id": record_id})),
            )
            .await?;

        Ok(())
    }

    /// Release a record back to the reachable set
    pub async fn release(&self, record_id: Uuid, user: &str) -> Result<(), QuarantineError> {
        self.review(record_id, QuarantineStatus::Released, "QUARANTINE_RELEASED", user)
            .await
    }

    /// Mark a record discarded; the row itself remains
    pub async fn discard(&self, record_id: Uuid, user: &str) -> Result<(), QuarantineError> {
        self.review(record_id, QuarantineStatus::Discarded, "QUARANTINE_DISCARDED", user)
            .await
    }

    pub async fn fetch(&self, record_id: Uuid) -> Result<Option<QuarantineRecord>, QuarantineError> {
        Ok(quarantine_repo::fetch(&self.pool, record_id).await?)
    }

    /// Quarantined records filtered by type, minimum confidence, and age
    pub async fn find(
        &self,
        corruption_type: Option<&str>,
        min_confidence: Option<Confidence>,
        created_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<QuarantineRecord>, QuarantineError> {
        Ok(quarantine_repo::query(&self.pool, corruption_type, min_confidence, created_before)
            .await?)
    }

    /// Open quarantine counts grouped by corruption type
    pub async fn summary(&self) -> Result<Vec<(String, i64)>, QuarantineError> {
        Ok(quarantine_repo::counts_by_type(&self.pool).await?)
    }
}
