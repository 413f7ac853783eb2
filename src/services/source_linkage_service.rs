//! Source linkage contract
//!
//! Every journal entry must trace back to a real business record through
//! its (module, model, id) triple. The allowed pairs come from the startup
//! allowlist; scans and backfills always consult it through this service,
//! never through a literal.

use serde_json::json;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{GovernanceConfig, SourceRule};
use crate::repos::{journal_repo, source_repo};
use crate::services::audit_service::AuditService;

#[derive(Debug, Error)]
pub enum LinkageError {
    #[error("Journal entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Source pair not in allowlist: {module}.{model}")]
    NotAllowlisted { module: String, model: String },

    #[error("Source record does not exist: {module}.{model}#{id}")]
    RecordMissing {
        module: String,
        model: String,
        id: i64,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An entry whose triple no longer resolves
#[derive(Debug, Clone)]
pub struct OrphanedEntry {
    pub entry_id: Uuid,
    pub number: String,
    pub source_module: String,
    pub source_model: String,
    pub source_id: i64,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReason {
    NotAllowlisted,
    RecordMissing,
}

#[derive(Debug, Clone)]
pub struct BackfillOutcome {
    pub entry_id: Uuid,
    pub applied: bool,
    pub previous: (String, String, i64),
    pub replacement: (String, String, i64),
}

#[derive(Debug, Clone)]
pub struct SourceLinkageService {
    pool: SqlitePool,
    config: Arc<GovernanceConfig>,
    audit: Arc<AuditService>,
}

impl SourceLinkageService {
    pub fn new(pool: SqlitePool, config: Arc<GovernanceConfig>, audit: Arc<AuditService>) -> Self {
        Self { pool, config, audit }
    }

    /// The allowlist rule for a pair, if any
    pub fn rule_for(&self, module: &str, model: &str) -> Option<&SourceRule> {
        self.config.rule_for(module, model)
    }

    /// Is the pair allowlisted and the record present?
    pub async fn validate(
        &self,
        module: &str,
        model: &str,
        id: i64,
    ) -> Result<bool, LinkageError> {
        if !self.config.is_allowed(module, model) {
            return Ok(false);
        }

        Ok(source_repo::exists(&self.pool, module, model, id).await?)
    }

    /// Validation within a transaction, returning the specific failure
    pub async fn check_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        module: &str,
        model: &str,
        id: i64,
    ) -> Result<(), LinkageError> {
        if !self.config.is_allowed(module, model) {
            return Err(LinkageError::NotAllowlisted {
                module: module.to_string(),
                model: model.to_string(),
            });
        }

        if !source_repo::exists_tx(tx, module, model, id).await? {
            return Err(LinkageError::RecordMissing {
                module: module.to_string(),
                model: model.to_string(),
                id,
            });
        }

        Ok(())
    }

    /// Walk the ledger and return every entry failing validation
    pub async fn scan_orphans(&self) -> Result<Vec<OrphanedEntry>, LinkageError> {
        let entries = journal_repo::all_entries(&self.pool).await?;
        let mut orphans = Vec::new();

        for entry in entries {
            if !self
                .config
                .is_allowed(&entry.source_module, &entry.source_model)
            {
                orphans.push(OrphanedEntry {
                    entry_id: entry.id,
                    number: entry.number,
                    source_module: entry.source_module,
                    source_model: entry.source_model,
                    source_id: entry.source_id,
                    reason: OrphanReason::NotAllowlisted,
                });
                continue;
            }

            let exists = source_repo::exists(
                &self.pool,
                &entry.source_module,
                &entry.source_model,
                entry.source_id,
            )
            .await?;

            if !exists {
                orphans.push(OrphanedEntry {
                    entry_id: entry.id,
                    number: entry.number,
                    source_module: entry.source_module,
                    source_model: entry.source_model,
                    source_id: entry.source_id,
                    reason: OrphanReason::RecordMissing,
                });
            }
        }

        Ok(orphans)
    }

    /// Repair an orphan's triple
    ///
    /// The replacement must itself pass validation. Dry runs report what
    /// would change without touching the row; applied repairs are audited
    /// with before and after triples.
    pub async fn backfill(
        &self,
        entry_id: Uuid,
        module: &str,
        model: &str,
        id: i64,
        dry_run: bool,
        user: &str,
    ) -> Result<BackfillOutcome, LinkageError> {
        let entry = journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(LinkageError::EntryNotFound(entry_id))?;

        if !self.config.is_allowed(module, model) {
            return Err(LinkageError::NotAllowlisted {
                module: module.to_string(),
                model: model.to_string(),
            });
        }

        if !source_repo::exists(&self.pool, module, model, id).await? {
            return Err(LinkageError::RecordMissing {
                module: module.to_string(),
                model: model.to_string(),
                id,
            });
        }

        let previous = (
            entry.source_module.clone(),
            entry.source_model.clone(),
            entry.source_id,
        );
        let replacement = (module.to_string(), model.to_string(), id);

        if dry_run {
            return Ok(BackfillOutcome {
                entry_id,
                applied: false,
                previous,
                replacement,
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE journal_entries
            SET source_module = $1, source_model = $2, source_id = $3
            WHERE id = $4
            "#,
        )
        .bind(module)
        .bind(model)
        .bind(id)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &entry_id.to_string(),
                "SOURCE_LINKAGE_BACKFILL",
                user,
                "SourceLinkageService",
                Some(json!({
                    "source_module": previous.0,
                    "source_model": previous.1,
                    "source_id": previous.2,
                })),
                Some(json!({
                    "source_module": module,
                    "source_model": model,
                    "source_id": id,
                })),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            entry_id = %entry_id,
            number = %entry.number,
            "source linkage backfilled"
        );

        Ok(BackfillOutcome {
            entry_id,
            applied: true,
            previous,
            replacement,
        })
    }
}
