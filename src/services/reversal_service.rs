//! Reversal service for undoing posted journal entries
//!
//! Posted entries are immutable; the only way to remove their effect is a
//! reversal entry with swapped debits and credits. Partial reversals scale
//! every line by the requested fraction and re-balance the rounding
//! remainder onto the largest line.

use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::repos::journal_repo::{self, EntryType, JournalEntry, JournalLine};
use crate::services::accounting_gateway::{
    AccountingGateway, CreateEntryRequest, GatewayError, GatewayResult, ReversalLink, SourceRef,
};
use crate::validation::{from_minor, to_minor, LineSpec};

pub struct ReversalService {
    pool: SqlitePool,
    gateway: Arc<AccountingGateway>,
}

impl ReversalService {
    pub fn new(pool: SqlitePool, gateway: Arc<AccountingGateway>) -> Self {
        Self { pool, gateway }
    }

    /// The reversal that references the given entry, if one exists
    pub async fn reversed_entry(
        &self,
        original_entry_id: Uuid,
    ) -> Result<Option<JournalEntry>, sqlx::Error> {
        journal_repo::find_reversal_of(&self.pool, original_entry_id).await
    }

    /// Create a reversal entry for a posted original
    ///
    /// Preconditions: the original is posted, is not itself a reversal, and
    /// has not already been reversed. The reversal posts into the period
    /// containing today's date, never back into the original's period.
    pub async fn create_reversal_entry(
        &self,
        original_entry_id: Uuid,
        user: &str,
        reason: &str,
        idempotency_key: &str,
        partial_amount: Option<Decimal>,
    ) -> GatewayResult<JournalEntry> {
        // A retry under an already-resolved key replays the prior reversal
        // instead of tripping the already-reversed precondition.
        if let Some(existing) =
            journal_repo::find_by_idempotency_key(&self.pool, idempotency_key).await?
        {
            tracing::info!(
                key = %idempotency_key,
                number = %existing.number,
                "reversal replayed from idempotency store"
            );
            return Ok(existing);
        }

        let (original, lines) = journal_repo::fetch_entry_with_lines(&self.pool, original_entry_id)
            .await?
            .ok_or(GatewayError::EntryNotFound(original_entry_id))?;

        if !original.is_posted() {
            return Err(GatewayError::ReversalNotAllowed {
                reason: format!("entry {} is not posted", original.number),
            });
        }

        if original.is_reversal {
            return Err(GatewayError::ReversalNotAllowed {
                reason: format!("entry {} is itself a reversal", original.number),
            });
        }

        if let Some(existing) = journal_repo::find_reversal_of(&self.pool, original_entry_id).await? {
            return Err(GatewayError::ReversalNotAllowed {
                reason: format!(
                    "entry {} was already reversed by {}",
                    original.number, existing.number
                ),
            });
        }

        if reason.trim().is_empty() {
            return Err(GatewayError::ReversalNotAllowed {
                reason: "a reversal reason is required".to_string(),
            });
        }

        let total_minor: i64 = lines.iter().map(|l| l.debit_minor).sum();
        let partial_minor = match partial_amount {
            Some(amount) => {
                let requested = to_minor(amount);
                if requested <= 0 {
                    return Err(GatewayError::ReversalNotAllowed {
                        reason: "partial reversal amount must be positive".to_string(),
                    });
                }
                if requested > total_minor {
                    return Err(GatewayError::ReversalNotAllowed {
                        reason: format!(
                            "partial amount {} exceeds original amount {}",
                            from_minor(requested),
                            from_minor(total_minor)
                        ),
                    });
                }
                requested
            }
            None => total_minor,
        };

        let reversal_lines = build_reversal_lines(&lines, partial_minor, total_minor);

        let request = CreateEntryRequest {
            source: SourceRef {
                module: original.source_module.clone(),
                model: original.source_model.clone(),
                id: original.source_id,
            },
            lines: reversal_lines,
            idempotency_key: idempotency_key.to_string(),
            entry_type: EntryType::Reversal,
            description: format!("Reversal of entry {}: {}", original.number, reason),
            reference: Some(format!("REV-{}", original.number)),
            entry_date: None,
            financial_category: original.financial_category.clone(),
            financial_subcategory: original.financial_subcategory.clone(),
            auto_post: true,
            period_override: None,
            reversal: Some(ReversalLink {
                original_entry_id,
                reason: reason.to_string(),
            }),
        };

        let reversal = self.gateway.create_journal_entry(request, user).await?;

        tracing::info!(
            original = %original.number,
            reversal = %reversal.number,
            partial = partial_amount.is_some(),
            "reversal entry created"
        );

        Ok(reversal)
    }
}

/// Swap debit/credit on every line, scaling for partial reversals
///
/// Scaling can lose a minor unit to rounding; the remainder is folded into
/// the largest line on each side so the reversal stays balanced.
fn build_reversal_lines(lines: &[JournalLine], partial_minor: i64, total_minor: i64) -> Vec<LineSpec> {
    let full = partial_minor == total_minor || total_minor == 0;

    let mut scaled: Vec<(i64, i64, &JournalLine)> = lines
        .iter()
        .map(|line| {
            let (debit, credit) = if full {
                (line.credit_minor, line.debit_minor)
            } else {
                (
                    scale_minor(line.credit_minor, partial_minor, total_minor),
                    scale_minor(line.debit_minor, partial_minor, total_minor),
                )
            };
            (debit, credit, line)
        })
        .collect();

    if !full {
        rebalance(&mut scaled, partial_minor);
    }

    scaled
        .into_iter()
        .map(|(debit_minor, credit_minor, line)| LineSpec {
            account_code: line.account_code.clone(),
            debit: from_minor(debit_minor),
            credit: from_minor(credit_minor),
            description: line
                .description
                .as_ref()
                .map(|d| format!("Reversal: {d}"))
                .or(Some("Reversal".to_string())),
            cost_center: line.cost_center.clone(),
            project: line.project.clone(),
        })
        .collect()
}

/// value * partial / total with half-even rounding in minor units
fn scale_minor(value: i64, partial: i64, total: i64) -> i64 {
    if total == 0 {
        return 0;
    }
    let scaled = Decimal::from(value) * Decimal::from(partial) / Decimal::from(total);
    to_minor(scaled / Decimal::from(100))
}

fn rebalance(scaled: &mut [(i64, i64, &JournalLine)], target_minor: i64) {
    let debit_total: i64 = scaled.iter().map(|(d, _, _)| d).sum();
    let credit_total: i64 = scaled.iter().map(|(_, c, _)| c).sum();

    let debit_diff = target_minor - debit_total;
    if debit_diff != 0 {
        if let Some(largest) = scaled
            .iter_mut()
            .filter(|(d, _, _)| *d > 0)
            .max_by_key(|(d, _, _)| *d)
        {
            largest.0 += debit_diff;
        }
    }

    let credit_diff = target_minor - credit_total;
    if credit_diff != 0 {
        if let Some(largest) = scaled
            .iter_mut()
            .filter(|(_, c, _)| *c > 0)
            .max_by_key(|(_, c, _)| *c)
        {
            largest.1 += credit_diff;
        }
    }
}
