//! Accounting gateway: the sole authorised producer of journal entries
//!
//! Every ledger write, including those triggered by domain signals, goes
//! through [`AccountingGateway::create_journal_entry`]. The gateway checks
//! governance flags, the source-linkage contract, the idempotency store,
//! period locks, and line validity before persisting the entry, its lines,
//! the idempotency completion, and the audit row as one atomic unit.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::SourceRule;
use crate::repos::account_repo::AccountError;
use crate::repos::journal_repo::{
    self, EntryStatus, EntryType, JournalEntry, JournalEntryInsert, JournalLineInsert,
    ENTRY_NUMBER_PREFIX,
};
use crate::repos::period_repo::{self, PeriodError};
use crate::services::idempotency_service::{
    BeginOutcome, IdempotencyError, IdempotencyService, IdempotencyToken, OP_JOURNAL_ENTRY,
};
use crate::services::audit_service::AuditService;
use crate::services::source_linkage_service::{LinkageError, SourceLinkageService};
use crate::services::switchboard::{Switchboard, WorkflowStatus};
use crate::validation::{self, LineSpec, ValidationError};

const SERVICE_NAME: &str = "AccountingGateway";

/// The source-linkage triple tying an entry to a business record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub module: String,
    pub model: String,
    pub id: i64,
}

impl SourceRef {
    pub fn new(module: &str, model: &str, id: i64) -> Self {
        Self {
            module: module.to_string(),
            model: model.to_string(),
            id,
        }
    }
}

/// Link from a reversal entry to the entry it undoes
#[derive(Debug, Clone)]
pub struct ReversalLink {
    pub original_entry_id: Uuid,
    pub reason: String,
}

/// Strongly-typed options for one create-entry call
#[derive(Debug, Clone)]
pub struct CreateEntryRequest {
    pub source: SourceRef,
    pub lines: Vec<LineSpec>,
    pub idempotency_key: String,
    pub entry_type: EntryType,
    pub description: String,
    pub reference: Option<String>,
    /// Defaults to today when absent.
    pub entry_date: Option<NaiveDate>,
    pub financial_category: Option<String>,
    pub financial_subcategory: Option<String>,
    pub auto_post: bool,
    /// Only accepted for reversal flows; everyone else posts into the
    /// period containing the entry date.
    pub period_override: Option<Uuid>,
    pub reversal: Option<ReversalLink>,
}

impl CreateEntryRequest {
    /// An automatic entry with the defaults domain producers use
    pub fn automatic(
        source: SourceRef,
        lines: Vec<LineSpec>,
        idempotency_key: &str,
        description: &str,
    ) -> Self {
        Self {
            source,
            lines,
            idempotency_key: idempotency_key.to_string(),
            entry_type: EntryType::Automatic,
            description: description.to_string(),
            reference: None,
            entry_date: None,
            financial_category: None,
            financial_subcategory: None,
            auto_post: true,
            period_override: None,
            reversal: None,
        }
    }
}

/// Errors surfaced by gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Workflow '{workflow}' is disabled")]
    WorkflowDisabled { workflow: String },

    #[error("Emergency flag '{flag}' is active")]
    EmergencyDisabled { flag: String },

    #[error("Invalid source linkage: {module}.{model}#{id}")]
    InvalidSourceLinkage {
        module: String,
        model: String,
        id: i64,
    },

    #[error("Operation already in progress for key '{key}'")]
    OperationInProgress { key: String },

    #[error("Prior attempt for key '{key}' failed with code '{code}'")]
    PriorAttemptFailed { key: String, code: String },

    #[error("No open accounting period contains {date}")]
    NoOpenPeriod { date: NaiveDate },

    #[error("Accounting period '{period}' is closed")]
    PeriodClosed { period: String },

    #[error("Posted entry {number} is immutable; use a reversal")]
    PostedEntryImmutable { number: String },

    #[error("Reversal not allowed: {reason}")]
    ReversalNotAllowed { reason: String },

    #[error("Entry {number} cannot transition from {from:?}: {detail}")]
    InvalidTransition {
        number: String,
        from: EntryStatus,
        detail: String,
    },

    #[error("Journal entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Accounting period not found: {0}")]
    PeriodNotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code stored in failed idempotency records and audit rows
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::WorkflowDisabled { .. } => "WORKFLOW_DISABLED",
            GatewayError::EmergencyDisabled { .. } => "EMERGENCY_DISABLED",
            GatewayError::InvalidSourceLinkage { .. } => "INVALID_SOURCE_LINKAGE",
            GatewayError::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            GatewayError::PriorAttemptFailed { .. } => "PRIOR_ATTEMPT_FAILED",
            GatewayError::NoOpenPeriod { .. } => "NO_OPEN_PERIOD",
            GatewayError::PeriodClosed { .. } => "PERIOD_CLOSED",
            GatewayError::PostedEntryImmutable { .. } => "POSTED_ENTRY_IMMUTABLE",
            GatewayError::ReversalNotAllowed { .. } => "REVERSAL_NOT_ALLOWED",
            GatewayError::InvalidTransition { .. } => "INVALID_TRANSITION",
            GatewayError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            GatewayError::PeriodNotFound(_) => "PERIOD_NOT_FOUND",
            GatewayError::Validation(ValidationError::UnbalancedEntry { .. }) => "UNBALANCED_ENTRY",
            GatewayError::Validation(_) => "INVALID_LINE",
            GatewayError::Account(_) => "INVALID_ACCOUNT",
            GatewayError::Idempotency(_) => "IDEMPOTENCY_ERROR",
            GatewayError::Database(_) => "INTEGRITY_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<LinkageError> for GatewayError {
    fn from(err: LinkageError) -> Self {
        match err {
            LinkageError::NotAllowlisted { module, model } => GatewayError::InvalidSourceLinkage {
                module,
                model,
                id: 0,
            },
            LinkageError::RecordMissing { module, model, id } => {
                GatewayError::InvalidSourceLinkage { module, model, id }
            }
            LinkageError::EntryNotFound(id) => GatewayError::EntryNotFound(id),
            LinkageError::Database(e) => GatewayError::Database(e),
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Compliance report for a period's lock state
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeriodLockReport {
    pub period_id: Uuid,
    pub period_name: String,
    pub closed: bool,
    pub posted_entries: i64,
    pub unlocked_entry_numbers: Vec<String>,
    pub compliant: bool,
}

/// Summary of a batch lock pass over one source workflow
#[derive(Debug, Clone, serde::Serialize)]
pub struct LockSummary {
    pub source_module: String,
    pub source_model: String,
    pub examined: u64,
    pub locked: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStatistics {
    pub entries_created: u64,
    pub replays_served: u64,
    pub failures: u64,
}

pub struct AccountingGateway {
    pool: SqlitePool,
    switchboard: Arc<Switchboard>,
    linkage: Arc<SourceLinkageService>,
    idempotency: Arc<IdempotencyService>,
    audit: Arc<AuditService>,
    created: AtomicU64,
    replayed: AtomicU64,
    failed: AtomicU64,
}

impl AccountingGateway {
    pub fn new(
        pool: SqlitePool,
        switchboard: Arc<Switchboard>,
        linkage: Arc<SourceLinkageService>,
        idempotency: Arc<IdempotencyService>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            pool,
            switchboard,
            linkage,
            idempotency,
            audit,
            created: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create (and usually post) a journal entry
    ///
    /// Returns the previously-created entry when the idempotency key has
    /// already completed. Governance refusals never poison the key; every
    /// failure past the idempotency claim marks the key failed so retries
    /// surface the same outcome.
    pub async fn create_journal_entry(
        &self,
        request: CreateEntryRequest,
        user: &str,
    ) -> GatewayResult<JournalEntry> {
        let rule = self
            .linkage
            .rule_for(&request.source.module, &request.source.model)
            .cloned();

        // Governance check happens before the key is claimed: a refusal
        // here must not block the same key after the workflow is enabled.
        if let Some(ref rule) = rule {
            match self.switchboard.workflow_status(&rule.workflow) {
                WorkflowStatus::Enabled => {}
                WorkflowStatus::EmergencyDisabled(flag) => {
                    let err = GatewayError::EmergencyDisabled { flag };
                    self.record_failure(&request, user, None, &err).await;
                    return Err(err);
                }
                _ => {
                    let err = GatewayError::WorkflowDisabled {
                        workflow: rule.workflow.clone(),
                    };
                    self.record_failure(&request, user, None, &err).await;
                    return Err(err);
                }
            }
        }

        let context = json!({
            "source_module": request.source.module,
            "source_model": request.source.model,
            "source_id": request.source.id,
            "entry_type": format!("{:?}", request.entry_type),
        });

        let token = match self
            .idempotency
            .begin(
                OP_JOURNAL_ENTRY,
                &request.idempotency_key,
                Some(context),
                Some(user),
            )
            .await?
        {
            BeginOutcome::Fresh(token) => token,
            BeginOutcome::Replay(result) => {
                let entry = self.fetch_replayed_entry(&result).await?;
                self.replayed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    key = %request.idempotency_key,
                    number = %entry.number,
                    "journal entry replayed from idempotency store"
                );
                return Ok(entry);
            }
            BeginOutcome::InProgress => {
                return Err(GatewayError::OperationInProgress {
                    key: request.idempotency_key,
                })
            }
            BeginOutcome::PriorFailure(code) => {
                return Err(GatewayError::PriorAttemptFailed {
                    key: request.idempotency_key,
                    code,
                })
            }
        };

        match self.execute_create(&request, rule.as_ref(), user, &token).await {
            Ok(entry) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    number = %entry.number,
                    source_module = %request.source.module,
                    source_model = %request.source.model,
                    source_id = request.source.id,
                    "journal entry created"
                );
                Ok(entry)
            }
            Err(err) => {
                self.record_failure(&request, user, Some(&token), &err).await;
                Err(err)
            }
        }
    }

    async fn fetch_replayed_entry(
        &self,
        result: &serde_json::Value,
    ) -> GatewayResult<JournalEntry> {
        let entry_id = result
            .get("entry_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                GatewayError::Internal("completed idempotency record lacks entry_id".to_string())
            })?;

        journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))
    }

    async fn execute_create(
        &self,
        request: &CreateEntryRequest,
        rule: Option<&SourceRule>,
        user: &str,
        token: &IdempotencyToken,
    ) -> GatewayResult<JournalEntry> {
        if request.reversal.is_some() && request.entry_type != EntryType::Reversal {
            return Err(GatewayError::ReversalNotAllowed {
                reason: "entries linked to an original must use the reversal entry type".to_string(),
            });
        }
        if request.reversal.is_none() && request.entry_type == EntryType::Reversal {
            return Err(GatewayError::ReversalNotAllowed {
                reason: "reversal entries must reference their original entry".to_string(),
            });
        }

        validation::validate_description(&request.description)?;
        let validated = validation::validate_lines(&request.lines)?;

        let entry_date = request
            .entry_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.pool.begin().await?;

        // Allowlist + existence under the transaction.
        self.linkage
            .check_tx(
                &mut tx,
                &request.source.module,
                &request.source.model,
                request.source.id,
            )
            .await?;

        let period = match request.period_override {
            Some(period_id) => {
                if request.reversal.is_none() {
                    return Err(GatewayError::ReversalNotAllowed {
                        reason: "explicit period override is reserved for reversal flows"
                            .to_string(),
                    });
                }
                let period = period_repo::find_by_id_tx(&mut tx, period_id)
                    .await
                    .map_err(map_period_error)?
                    .ok_or(GatewayError::PeriodNotFound(period_id))?;
                if period.is_closed() {
                    return Err(GatewayError::PeriodClosed {
                        period: period.name,
                    });
                }
                period
            }
            None => period_repo::validate_posting_date_tx(&mut tx, entry_date)
                .await
                .map_err(map_period_error)?,
        };

        for line in &validated.lines {
            crate::repos::account_repo::find_postable_by_code_tx(&mut tx, &line.account_code)
                .await?;
        }

        let number = journal_repo::next_entry_number(&mut tx, ENTRY_NUMBER_PREFIX).await?;
        let entry_id = Uuid::new_v4();
        let now = Utc::now();

        let should_post = request.auto_post || request.entry_type == EntryType::Reversal;
        let high_priority = rule.map(|r| r.high_priority).unwrap_or(false);
        let lock_on_post = should_post && high_priority;

        let insert = JournalEntryInsert {
            id: entry_id,
            number: number.clone(),
            entry_date,
            entry_type: request.entry_type,
            status: if should_post {
                EntryStatus::Posted
            } else {
                EntryStatus::Draft
            },
            description: request.description.clone(),
            reference: request.reference.clone().or_else(|| {
                Some(format!("{}-{}", request.source.model, request.source.id))
            }),
            reference_type: None,
            reference_id: None,
            source_module: request.source.module.clone(),
            source_model: request.source.model.clone(),
            source_id: request.source.id,
            period_id: period.id,
            financial_category: request.financial_category.clone(),
            financial_subcategory: request.financial_subcategory.clone(),
            posted_at: should_post.then_some(now),
            posted_by: should_post.then(|| user.to_string()),
            idempotency_key: Some(request.idempotency_key.clone()),
            original_entry_id: request.reversal.as_ref().map(|r| r.original_entry_id),
            is_reversal: request.reversal.is_some(),
            reversal_reason: request.reversal.as_ref().map(|r| r.reason.clone()),
            is_locked: lock_on_post,
            locked_at: lock_on_post.then_some(now),
            locked_by: lock_on_post.then(|| user.to_string()),
            created_by: user.to_string(),
        };

        journal_repo::insert_entry(&mut tx, &insert).await?;

        let line_inserts: Vec<JournalLineInsert> = validated
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| JournalLineInsert {
                id: Uuid::new_v4(),
                line_no: (idx + 1) as i64,
                account_code: line.account_code.clone(),
                debit_minor: line.debit_minor,
                credit_minor: line.credit_minor,
                description: line.description.clone(),
                cost_center: line.cost_center.clone(),
                project: line.project.clone(),
            })
            .collect();

        journal_repo::bulk_insert_lines(&mut tx, entry_id, &line_inserts).await?;

        self.idempotency
            .complete_tx(
                &mut tx,
                token,
                &json!({ "entry_id": entry_id, "entry_number": number }),
            )
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &entry_id.to_string(),
                "JOURNAL_ENTRY_CREATED",
                user,
                SERVICE_NAME,
                None,
                Some(json!({
                    "number": number,
                    "status": if should_post { "posted" } else { "draft" },
                    "entry_date": entry_date,
                    "source_module": request.source.module,
                    "source_model": request.source.model,
                    "source_id": request.source.id,
                    "total_debit_minor": validated.total_debit_minor,
                    "total_credit_minor": validated.total_credit_minor,
                    "is_locked": lock_on_post,
                })),
            )
            .await?;

        tx.commit().await?;

        journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or_else(|| GatewayError::Internal("created entry vanished".to_string()))
    }

    async fn record_failure(
        &self,
        request: &CreateEntryRequest,
        user: &str,
        token: Option<&IdempotencyToken>,
        err: &GatewayError,
    ) {
        self.failed.fetch_add(1, Ordering::Relaxed);

        if let Some(token) = token {
            if let Err(fail_err) = self.idempotency.fail(token, err.code()).await {
                tracing::error!(
                    key = %request.idempotency_key,
                    error = %fail_err,
                    "failed to mark idempotency record failed"
                );
            }
        }

        let audit_result = self
            .audit
            .record_operation(
                "JournalEntry",
                &request.idempotency_key,
                "JOURNAL_ENTRY_FAILED",
                user,
                SERVICE_NAME,
                None,
                Some(json!({
                    "code": err.code(),
                    "error": err.to_string(),
                    "source_module": request.source.module,
                    "source_model": request.source.model,
                    "source_id": request.source.id,
                })),
            )
            .await;

        if let Err(audit_err) = audit_result {
            tracing::error!(
                key = %request.idempotency_key,
                error = %audit_err,
                "failed to record gateway failure in audit trail"
            );
        }

        tracing::warn!(
            key = %request.idempotency_key,
            code = err.code(),
            "journal entry creation failed"
        );
    }

    /// Post a draft entry
    pub async fn post_entry(&self, entry_id: Uuid, user: &str) -> GatewayResult<JournalEntry> {
        let entry = journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))?;

        match entry.status {
            EntryStatus::Posted => {
                return Err(GatewayError::PostedEntryImmutable {
                    number: entry.number,
                })
            }
            EntryStatus::Cancelled => {
                return Err(GatewayError::InvalidTransition {
                    number: entry.number,
                    from: EntryStatus::Cancelled,
                    detail: "cancelled entries cannot be posted".to_string(),
                })
            }
            EntryStatus::Draft => {}
        }

        let lines = journal_repo::fetch_lines(&self.pool, entry_id).await?;
        let debit: i64 = lines.iter().map(|l| l.debit_minor).sum();
        let credit: i64 = lines.iter().map(|l| l.credit_minor).sum();
        if (debit - credit).abs() > validation::BALANCE_TOLERANCE_MINOR {
            return Err(GatewayError::Validation(ValidationError::UnbalancedEntry {
                debits: validation::from_minor(debit),
                credits: validation::from_minor(credit),
                difference: validation::from_minor(debit - credit),
            }));
        }

        let mut tx = self.pool.begin().await?;

        period_repo::validate_posting_date_tx(&mut tx, entry.entry_date)
            .await
            .map_err(map_period_error)?;

        let now = Utc::now();
        journal_repo::mark_posted_tx(&mut tx, entry_id, user, now).await?;

        let high_priority = self
            .linkage
            .rule_for(&entry.source_module, &entry.source_model)
            .map(|r| r.high_priority)
            .unwrap_or(false);
        if high_priority {
            journal_repo::mark_locked_tx(&mut tx, entry_id, user, now).await?;
        }

        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &entry_id.to_string(),
                "JOURNAL_ENTRY_POSTED",
                user,
                SERVICE_NAME,
                Some(json!({ "status": "draft" })),
                Some(json!({ "status": "posted", "is_locked": high_priority })),
            )
            .await?;

        tx.commit().await?;

        journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))
    }

    /// Cancel a draft entry
    pub async fn cancel_entry(&self, entry_id: Uuid, user: &str) -> GatewayResult<JournalEntry> {
        let entry = journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))?;

        match entry.status {
            EntryStatus::Posted => {
                return Err(GatewayError::PostedEntryImmutable {
                    number: entry.number,
                })
            }
            EntryStatus::Cancelled => return Ok(entry),
            EntryStatus::Draft => {}
        }

        let mut tx = self.pool.begin().await?;
        journal_repo::mark_cancelled_tx(&mut tx, entry_id).await?;
        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &entry_id.to_string(),
                "JOURNAL_ENTRY_CANCELLED",
                user,
                SERVICE_NAME,
                Some(json!({ "status": "draft" })),
                Some(json!({ "status": "cancelled" })),
            )
            .await?;
        tx.commit().await?;

        journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))
    }

    /// Delete a draft entry; its lines die with it
    pub async fn delete_draft(&self, entry_id: Uuid, user: &str) -> GatewayResult<()> {
        let entry = journal_repo::fetch_entry(&self.pool, entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(entry_id))?;

        match entry.status {
            EntryStatus::Posted => {
                return Err(GatewayError::PostedEntryImmutable {
                    number: entry.number,
                })
            }
            EntryStatus::Cancelled => {
                return Err(GatewayError::InvalidTransition {
                    number: entry.number,
                    from: EntryStatus::Cancelled,
                    detail: "only draft entries may be deleted".to_string(),
                })
            }
            EntryStatus::Draft => {}
        }

        let mut tx = self.pool.begin().await?;
        journal_repo::delete_entry_tx(&mut tx, entry_id).await?;
        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &entry_id.to_string(),
                "JOURNAL_ENTRY_DELETED",
                user,
                SERVICE_NAME,
                Some(json!({ "number": entry.number, "status": "draft" })),
                None,
            )
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Report how many posted entries in a period are still unlocked
    pub async fn validate_period_lock_compliance(
        &self,
        period_id: Uuid,
    ) -> GatewayResult<PeriodLockReport> {
        let period = period_repo::find_by_id(&self.pool, period_id)
            .await
            .map_err(map_period_error)?
            .ok_or(GatewayError::PeriodNotFound(period_id))?;

        let posted =
            journal_repo::count_posted_in_range(&self.pool, period.start_date, period.end_date)
                .await?;
        let unlocked =
            journal_repo::unlocked_posted_in_range(&self.pool, period.start_date, period.end_date)
                .await?;

        let closed = period.is_closed();
        let unlocked_entry_numbers: Vec<String> =
            unlocked.into_iter().map(|e| e.number).collect();

        Ok(PeriodLockReport {
            period_id,
            period_name: period.name,
            closed,
            posted_entries: posted,
            compliant: !closed || unlocked_entry_numbers.is_empty(),
            unlocked_entry_numbers,
        })
    }

    /// Lock every posted entry of a source workflow whose period has closed
    pub async fn enforce_period_locks_for_workflow(
        &self,
        source_module: &str,
        source_model: &str,
        user: &str,
    ) -> GatewayResult<LockSummary> {
        let entries =
            journal_repo::entries_for_source(&self.pool, source_module, source_model).await?;

        let mut examined = 0u64;
        let mut locked = 0u64;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        for entry in &entries {
            if !entry.is_posted() || entry.is_locked {
                continue;
            }
            examined += 1;

            let period = period_repo::find_by_id_tx(&mut tx, entry.period_id)
                .await
                .map_err(map_period_error)?;

            if period.map(|p| p.is_closed()).unwrap_or(false) {
                journal_repo::mark_locked_tx(&mut tx, entry.id, user, now).await?;
                locked += 1;
            }
        }

        self.audit
            .record_operation_tx(
                &mut tx,
                "JournalEntry",
                &format!("{source_module}.{source_model}"),
                "PERIOD_LOCKS_ENFORCED",
                user,
                SERVICE_NAME,
                None,
                Some(json!({ "examined": examined, "locked": locked })),
            )
            .await?;

        tx.commit().await?;

        Ok(LockSummary {
            source_module: source_module.to_string(),
            source_model: source_model.to_string(),
            examined,
            locked,
        })
    }

    pub fn get_statistics(&self) -> GatewayStatistics {
        GatewayStatistics {
            entries_created: self.created.load(Ordering::Relaxed),
            replays_served: self.replayed.load(Ordering::Relaxed),
            failures: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn map_period_error(err: PeriodError) -> GatewayError {
    match err {
        PeriodError::NoPeriodForDate(date) => GatewayError::NoOpenPeriod { date },
        PeriodError::PeriodClosed { name, .. } => GatewayError::PeriodClosed { period: name },
        PeriodError::Database(e) => GatewayError::Database(e),
        other => GatewayError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = GatewayError::WorkflowDisabled {
            workflow: "student_fee_to_journal_entry".to_string(),
        };
        assert_eq!(err.code(), "WORKFLOW_DISABLED");

        let err = GatewayError::Validation(ValidationError::InsufficientLines(1));
        assert_eq!(err.code(), "INVALID_LINE");
    }

    #[test]
    fn source_ref_equality() {
        assert_eq!(
            SourceRef::new("students", "StudentFee", 123),
            SourceRef::new("students", "StudentFee", 123)
        );
    }
}
