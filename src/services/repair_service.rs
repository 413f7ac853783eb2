//! Read-only corruption scanner and repair-plan generator
//!
//! Scanners detect corruption and report findings with confidence and
//! evidence; the policy framework turns findings into plans. Nothing here
//! executes a repair: every report carries `execution_blocked` and
//! `approval_required`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::GovernanceConfig;
use crate::repos::movement_repo;
use crate::repos::quarantine_repo::Confidence;
use crate::repos::{journal_repo, source_repo};
use crate::services::quarantine_service::{QuarantineService, QuarantineSubmission};
use crate::services::repair_policy::{
    CorruptionType, DetailedRepairPlan, PlanRisk, RepairPolicyFramework,
};
use crate::services::source_linkage_service::SourceLinkageService;
use crate::validation::BALANCE_TOLERANCE_MINOR;

/// Which scanners to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerKind {
    OrphanedJournalEntries,
    NegativeStock,
    MultipleActiveSingleton,
    UnbalancedJournalEntries,
}

impl ScannerKind {
    pub const ALL: [ScannerKind; 4] = [
        ScannerKind::OrphanedJournalEntries,
        ScannerKind::NegativeStock,
        ScannerKind::MultipleActiveSingleton,
        ScannerKind::UnbalancedJournalEntries,
    ];

    pub fn parse(name: &str) -> Option<ScannerKind> {
        match name {
            "orphaned_journal_entries" => Some(ScannerKind::OrphanedJournalEntries),
            "negative_stock" => Some(ScannerKind::NegativeStock),
            "multiple_active_singleton" => Some(ScannerKind::MultipleActiveSingleton),
            "unbalanced_journal_entries" => Some(ScannerKind::UnbalancedJournalEntries),
            _ => None,
        }
    }
}

/// One scanner's verdict
#[derive(Debug, Clone)]
pub struct CorruptionFinding {
    pub corruption_type: CorruptionType,
    pub issues: Vec<JsonValue>,
    pub confidence: Confidence,
    pub evidence: JsonValue,
}

impl CorruptionFinding {
    /// Object ids referenced by the issues, for plan generation
    pub fn object_ids(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter_map(|issue| issue.get("object_id"))
            .filter_map(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }
}

/// Aggregated scan results
#[derive(Debug, Clone)]
pub struct CorruptionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub findings: Vec<CorruptionFinding>,
}

impl CorruptionReport {
    pub fn total_issues(&self) -> usize {
        self.findings.iter().map(|f| f.issues.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn summary(&self) -> JsonValue {
        json!({
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "corruption_types": self.findings.iter().map(|f| f.corruption_type.label()).collect::<Vec<_>>(),
            "total_issues": self.total_issues(),
        })
    }
}

/// The non-executable repair report handed to operators
#[derive(Debug, Clone, serde::Serialize)]
pub struct RepairReport {
    pub scan_summary: JsonValue,
    pub plans: Vec<DetailedRepairPlan>,
    pub overall_risk: PlanRisk,
    pub total_estimated_duration_secs: u64,
    pub approval_required: bool,
    pub execution_blocked: bool,
    pub next_steps: Vec<String>,
}

pub struct RepairService {
    pool: SqlitePool,
    config: Arc<GovernanceConfig>,
    linkage: Arc<SourceLinkageService>,
    quarantine: Arc<QuarantineService>,
}

impl RepairService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<GovernanceConfig>,
        linkage: Arc<SourceLinkageService>,
        quarantine: Arc<QuarantineService>,
    ) -> Self {
        Self {
            pool,
            config,
            linkage,
            quarantine,
        }
    }

    /// Run the requested scanners (all of them by default)
    ///
    /// Scanners never propagate their own failures; a failing scanner
    /// becomes a finding so the rest of the scan continues.
    pub async fn scan_for_corruption(
        &self,
        kinds: Option<&[ScannerKind]>,
    ) -> CorruptionReport {
        let started_at = Utc::now();
        let kinds = kinds.unwrap_or(&ScannerKind::ALL);
        let mut findings = Vec::new();

        for kind in kinds {
            let result = match kind {
                ScannerKind::OrphanedJournalEntries => self.scan_orphaned_entries().await,
                ScannerKind::NegativeStock => self.scan_negative_stock().await,
                ScannerKind::MultipleActiveSingleton => self.scan_singletons().await,
                ScannerKind::UnbalancedJournalEntries => self.scan_unbalanced_entries().await,
            };

            match result {
                Ok(mut scanner_findings) => findings.append(&mut scanner_findings),
                Err(err) => {
                    tracing::error!(scanner = ?kind, error = %err, "corruption scanner failed");
                    findings.push(CorruptionFinding {
                        corruption_type: CorruptionType::ScanFailure {
                            scanner: format!("{kind:?}"),
                        },
                        issues: vec![json!({ "error": err.to_string() })],
                        confidence: Confidence::Low,
                        evidence: json!({ "error": err.to_string() }),
                    });
                }
            }
        }

        CorruptionReport {
            started_at,
            finished_at: Utc::now(),
            findings,
        }
    }

    async fn scan_orphaned_entries(&self) -> Result<Vec<CorruptionFinding>, sqlx::Error> {
        let orphans = self
            .linkage
            .scan_orphans()
            .await
            .map_err(|e| match e {
                crate::services::source_linkage_service::LinkageError::Database(e) => e,
                other => sqlx::Error::Protocol(other.to_string()),
            })?;

        if orphans.is_empty() {
            return Ok(Vec::new());
        }

        let scanned = journal_repo::count_entries(&self.pool).await?;

        let issues: Vec<JsonValue> = orphans
            .iter()
            .map(|o| {
                json!({
                    "object_id": o.entry_id,
                    "number": o.number,
                    "source_module": o.source_module,
                    "source_model": o.source_model,
                    "source_id": o.source_id,
                    "reason": format!("{:?}", o.reason),
                })
            })
            .collect();

        Ok(vec![CorruptionFinding {
            corruption_type: CorruptionType::OrphanedJournalEntries,
            evidence: json!({
                "entries_scanned": scanned,
                "orphans_found": issues.len(),
            }),
            issues,
            confidence: Confidence::High,
        }])
    }

    async fn scan_negative_stock(&self) -> Result<Vec<CorruptionFinding>, sqlx::Error> {
        let products = movement_repo::negative_stock_products(&self.pool).await?;

        if products.is_empty() {
            return Ok(Vec::new());
        }

        let issues: Vec<JsonValue> = products
            .iter()
            .map(|p| {
                json!({
                    "object_id": p.id,
                    "name": p.name,
                    "quantity_milli": p.quantity_milli,
                })
            })
            .collect();

        Ok(vec![CorruptionFinding {
            corruption_type: CorruptionType::NegativeStock,
            evidence: json!({ "products_negative": issues.len() }),
            issues,
            confidence: Confidence::High,
        }])
    }

    async fn scan_singletons(&self) -> Result<Vec<CorruptionFinding>, sqlx::Error> {
        let mut findings = Vec::new();

        for entity in &self.config.singleton_entities {
            let Some((module, model)) = entity.split_once('.') else {
                tracing::warn!(entity = %entity, "malformed singleton entity, expected module.Model");
                continue;
            };

            let active = source_repo::active_record_ids(&self.pool, module, model).await?;

            if active.len() > 1 {
                findings.push(CorruptionFinding {
                    corruption_type: CorruptionType::MultipleActiveSingleton {
                        entity: entity.clone(),
                    },
                    issues: active
                        .iter()
                        .map(|id| json!({ "object_id": id, "entity": entity }))
                        .collect(),
                    confidence: Confidence::High,
                    evidence: json!({
                        "entity": entity,
                        "active_count": active.len(),
                        "active_ids": active,
                    }),
                });
            }
        }

        Ok(findings)
    }

    async fn scan_unbalanced_entries(&self) -> Result<Vec<CorruptionFinding>, sqlx::Error> {
        let unbalanced =
            journal_repo::unbalanced_posted(&self.pool, BALANCE_TOLERANCE_MINOR).await?;

        if unbalanced.is_empty() {
            return Ok(Vec::new());
        }

        let issues: Vec<JsonValue> = unbalanced
            .iter()
            .map(|(entry_id, number, debit, credit)| {
                json!({
                    "object_id": entry_id,
                    "number": number,
                    "debit_minor": debit,
                    "credit_minor": credit,
                    "difference_minor": debit - credit,
                })
            })
            .collect();

        Ok(vec![CorruptionFinding {
            corruption_type: CorruptionType::UnbalancedJournalEntries,
            evidence: json!({ "entries_unbalanced": issues.len() }),
            issues,
            confidence: Confidence::High,
        }])
    }

    /// Turn a corruption report into a non-executable repair report
    pub fn create_repair_report(&self, report: &CorruptionReport) -> RepairReport {
        let plans: Vec<DetailedRepairPlan> = report
            .findings
            .iter()
            .map(|finding| {
                RepairPolicyFramework::create_repair_plan(
                    &finding.corruption_type,
                    finding.confidence,
                    &finding.object_ids(),
                )
            })
            .collect();

        let overall_risk = plans
            .iter()
            .map(|p| p.risk)
            .max()
            .unwrap_or(PlanRisk::Low);

        let total_estimated_duration_secs =
            plans.iter().map(|p| p.estimated_duration_secs).sum();

        RepairReport {
            scan_summary: report.summary(),
            plans,
            overall_risk,
            total_estimated_duration_secs,
            approval_required: true,
            execution_blocked: true,
            next_steps: vec![
                "Review corruption findings with stakeholders".to_string(),
                "Approve repair policies per corruption type".to_string(),
                "Verify backup and rollback procedures".to_string(),
                "Schedule execution after approval".to_string(),
            ],
        }
    }

    /// Hand high-confidence findings to the quarantine store
    ///
    /// Returns how many records were quarantined. This is the one mutation
    /// the repair path performs, and it only marks rows for review.
    pub async fn quarantine_suspicious_data(
        &self,
        report: &CorruptionReport,
        min_confidence: Confidence,
        user: &str,
    ) -> usize {
        let mut quarantined = 0;

        for finding in &report.findings {
            if finding.confidence < min_confidence {
                continue;
            }
            if matches!(finding.corruption_type, CorruptionType::ScanFailure { .. }) {
                continue;
            }

            for issue in &finding.issues {
                let object_id = match issue.get("object_id") {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(JsonValue::Number(n)) => n.to_string(),
                    _ => continue,
                };

                let submission = QuarantineSubmission {
                    model_name: finding.corruption_type.target_model().to_string(),
                    object_id,
                    corruption_type: finding.corruption_type.label(),
                    confidence: finding.confidence,
                    reason: format!(
                        "Flagged by corruption scan: {}",
                        finding.corruption_type.label()
                    ),
                    evidence: finding.evidence.clone(),
                    original_data: Some(issue.clone()),
                };

                match self.quarantine.quarantine(submission, user).await {
                    Ok(_) => quarantined += 1,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to quarantine scan finding");
                    }
                }
            }
        }

        quarantined
    }
}
