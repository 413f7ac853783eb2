//! Repair policy framework
//!
//! Maps (corruption type, confidence) to a repair policy and builds
//! detailed, non-executable repair plans. Planning only: nothing in this
//! module or its consumers mutates the scanned data.

use serde::Serialize;

use crate::repos::quarantine_repo::Confidence;

/// Classes of corruption the scanners can detect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CorruptionType {
    OrphanedJournalEntries,
    NegativeStock,
    /// A domain-configurable singleton entity has more than one active row.
    MultipleActiveSingleton { entity: String },
    UnbalancedJournalEntries,
    /// A scanner itself failed; recorded as a finding, never thrown.
    ScanFailure { scanner: String },
}

impl CorruptionType {
    pub fn label(&self) -> String {
        match self {
            CorruptionType::OrphanedJournalEntries => "ORPHANED_JOURNAL_ENTRIES".to_string(),
            CorruptionType::NegativeStock => "NEGATIVE_STOCK".to_string(),
            CorruptionType::MultipleActiveSingleton { entity } => {
                format!("MULTIPLE_ACTIVE_SINGLETON({entity})")
            }
            CorruptionType::UnbalancedJournalEntries => "UNBALANCED_JOURNAL_ENTRIES".to_string(),
            CorruptionType::ScanFailure { scanner } => format!("SCAN_FAILURE({scanner})"),
        }
    }

    /// The model whose rows the findings point at
    pub fn target_model(&self) -> &'static str {
        match self {
            CorruptionType::OrphanedJournalEntries
            | CorruptionType::UnbalancedJournalEntries => "JournalEntry",
            CorruptionType::NegativeStock => "Product",
            CorruptionType::MultipleActiveSingleton { .. } => "BusinessRecord",
            CorruptionType::ScanFailure { .. } => "Scanner",
        }
    }
}

/// The four repair policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairPolicyType {
    /// Attempt to relink orphaned records to sources.
    Relink,
    /// Isolate suspicious data for manual review.
    Quarantine,
    /// Rebuild data from authoritative sources.
    Rebuild,
    /// Adjust data to correct inconsistencies.
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PlanRisk {
    Low,
    Medium,
    High,
    Critical,
}

/// One proposed (never executed) repair step
#[derive(Debug, Clone, Serialize)]
pub struct RepairAction {
    pub description: String,
    pub target_model: String,
    pub object_id: String,
}

/// A structured, non-executed description of how a corruption class would
/// be fixed
#[derive(Debug, Clone, Serialize)]
pub struct DetailedRepairPlan {
    pub corruption_type: String,
    pub policy: RepairPolicyType,
    pub issue_count: usize,
    pub actions: Vec<RepairAction>,
    pub estimated_duration_secs: u64,
    pub risk: PlanRisk,
    pub verification_invariants: Vec<String>,
    pub rollback_strategy: String,
}

pub struct RepairPolicyFramework;

impl RepairPolicyFramework {
    /// Recommended repair policy for a corruption type at a confidence level
    ///
    /// Anything the matrix does not cover defaults to quarantine.
    pub fn policy_for(corruption_type: &CorruptionType, confidence: Confidence) -> RepairPolicyType {
        match (corruption_type, confidence) {
            (CorruptionType::OrphanedJournalEntries, Confidence::High) => RepairPolicyType::Relink,
            (CorruptionType::OrphanedJournalEntries, _) => RepairPolicyType::Quarantine,

            (CorruptionType::NegativeStock, Confidence::High)
            | (CorruptionType::NegativeStock, Confidence::Medium) => RepairPolicyType::Adjustment,
            (CorruptionType::NegativeStock, Confidence::Low) => RepairPolicyType::Quarantine,

            (CorruptionType::MultipleActiveSingleton { .. }, Confidence::High)
            | (CorruptionType::MultipleActiveSingleton { .. }, Confidence::Medium) => {
                RepairPolicyType::Rebuild
            }
            (CorruptionType::MultipleActiveSingleton { .. }, Confidence::Low) => {
                RepairPolicyType::Quarantine
            }

            (CorruptionType::UnbalancedJournalEntries, Confidence::High) => {
                RepairPolicyType::Adjustment
            }
            (CorruptionType::UnbalancedJournalEntries, _) => RepairPolicyType::Quarantine,

            (CorruptionType::ScanFailure { .. }, _) => RepairPolicyType::Quarantine,
        }
    }

    fn risk_for(policy: RepairPolicyType, issue_count: usize) -> PlanRisk {
        let base = match policy {
            RepairPolicyType::Quarantine => PlanRisk::Low,
            RepairPolicyType::Relink => PlanRisk::Medium,
            RepairPolicyType::Adjustment => PlanRisk::Medium,
            RepairPolicyType::Rebuild => PlanRisk::High,
        };

        if issue_count > 100 && base < PlanRisk::Critical {
            match base {
                PlanRisk::Low => PlanRisk::Medium,
                PlanRisk::Medium => PlanRisk::High,
                _ => PlanRisk::Critical,
            }
        } else {
            base
        }
    }

    fn invariants_for(corruption_type: &CorruptionType) -> Vec<String> {
        match corruption_type {
            CorruptionType::OrphanedJournalEntries => vec![
                "Every repaired entry resolves through the source-linkage allowlist".to_string(),
                "No journal entry or line amounts change".to_string(),
            ],
            CorruptionType::NegativeStock => vec![
                "No product stock is negative after adjustment".to_string(),
                "Every adjustment has a matching stock movement and audit row".to_string(),
            ],
            CorruptionType::MultipleActiveSingleton { entity } => vec![
                format!("At most one active {entity} row remains"),
                "Deactivated rows are preserved, not deleted".to_string(),
            ],
            CorruptionType::UnbalancedJournalEntries => vec![
                "Every posted entry balances within 0.01".to_string(),
                "Correction entries are posted through the accounting gateway".to_string(),
            ],
            CorruptionType::ScanFailure { .. } => {
                vec!["Scanner completes without error on re-run".to_string()]
            }
        }
    }

    fn rollback_for(policy: RepairPolicyType) -> String {
        match policy {
            RepairPolicyType::Relink => {
                "Restore previous source triples from the audit trail".to_string()
            }
            RepairPolicyType::Quarantine => {
                "Release quarantined records back to the reachable set".to_string()
            }
            RepairPolicyType::Rebuild => {
                "Restore the pre-rebuild snapshot taken before execution".to_string()
            }
            RepairPolicyType::Adjustment => {
                "Reverse the adjustment entries through the gateway".to_string()
            }
        }
    }

    /// Build the detailed plan for one corruption finding
    pub fn create_repair_plan(
        corruption_type: &CorruptionType,
        confidence: Confidence,
        object_ids: &[String],
    ) -> DetailedRepairPlan {
        let policy = Self::policy_for(corruption_type, confidence);
        let issue_count = object_ids.len();

        let actions = object_ids
            .iter()
            .map(|object_id| RepairAction {
                description: match policy {
                    RepairPolicyType::Relink => "Relink record to its source".to_string(),
                    RepairPolicyType::Quarantine => "Quarantine record for review".to_string(),
                    RepairPolicyType::Rebuild => "Rebuild record from authoritative source".to_string(),
                    RepairPolicyType::Adjustment => "Post a correcting adjustment".to_string(),
                },
                target_model: corruption_type.target_model().to_string(),
                object_id: object_id.clone(),
            })
            .collect();

        // Rough planning figure: fixed review overhead plus per-issue work.
        let estimated_duration_secs = 300 + (issue_count as u64) * 20;

        DetailedRepairPlan {
            corruption_type: corruption_type.label(),
            policy,
            issue_count,
            actions,
            estimated_duration_secs,
            risk: Self::risk_for(policy, issue_count),
            verification_invariants: Self::invariants_for(corruption_type),
            rollback_strategy: Self::rollback_for(policy),
        }
    }
}
