//! Product refund gateway
//!
//! A refund restores the returned units to stock through the movement
//! service and reverses the sale revenue through the accounting gateway:
//! the revenue account is debited and the settlement account (cash, bank,
//! or an explicit code) credited for the selling price of the returned
//! quantity. The stock restoration is the primary effect; a failed revenue
//! entry is absorbed, audited by the gateway, and left for reconciliation
//! rather than unwinding the return.

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

use crate::config::RefundPosting;
use crate::repos::journal_repo::{EntryType, JournalEntry};
use crate::repos::movement_repo::{self, MovementType, StockMovement};
use crate::services::accounting_gateway::{AccountingGateway, CreateEntryRequest, SourceRef};
use crate::services::audit_service::AuditService;
use crate::services::idempotency_service::IdempotencyService;
use crate::services::movement_service::{MovementError, MovementRequest, MovementService};
use crate::validation::{from_minor, to_minor, LineSpec};

const SERVICE_NAME: &str = "RefundService";

/// Minimum length of a usable refund reason.
const MIN_REASON_LEN: usize = 5;

/// Why the units are coming back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundType {
    FullRefund,
    PartialRefund,
    DefectiveReturn,
    CustomerReturn,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundType::FullRefund => "full_refund",
            RefundType::PartialRefund => "partial_refund",
            RefundType::DefectiveReturn => "defective_return",
            RefundType::CustomerReturn => "customer_return",
        }
    }
}

/// Where the refunded money leaves through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementMethod {
    Cash,
    BankTransfer,
    /// An explicit chart-of-accounts code.
    Account(String),
}

/// Strongly-typed options for one refund call
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub product_id: i64,
    pub quantity: Decimal,
    pub refund_type: RefundType,
    pub reason: String,
    /// Business reference, also used to derive the idempotency keys.
    pub reference: String,
    pub settlement: SettlementMethod,
    /// Cap from the original sale record, when the caller has it.
    pub original_sale_quantity: Option<Decimal>,
}

/// Errors surfaced by refund operations
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("Refund quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("Refund quantity {requested} exceeds originally sold quantity {sold}")]
    ExceedsOriginalSale { requested: Decimal, sold: Decimal },

    #[error("A refund reason of at least {MIN_REASON_LEN} characters is required")]
    ReasonRequired,

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a refund call did
#[derive(Debug)]
pub struct ProcessedRefund {
    pub movement: StockMovement,
    /// Absent when the refund amount is zero or the revenue entry was
    /// absorbed after failing.
    pub entry: Option<JournalEntry>,
    pub refund_amount: Decimal,
}

pub struct RefundService {
    pool: SqlitePool,
    gateway: Arc<AccountingGateway>,
    movements: Arc<MovementService>,
    audit: Arc<AuditService>,
    posting: RefundPosting,
}

impl RefundService {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<AccountingGateway>,
        movements: Arc<MovementService>,
        audit: Arc<AuditService>,
        posting: RefundPosting,
    ) -> Self {
        Self {
            pool,
            gateway,
            movements,
            audit,
            posting,
        }
    }

    fn settlement_account<'a>(posting: &'a RefundPosting, method: &'a SettlementMethod) -> &'a str {
        match method {
            SettlementMethod::Cash => &posting.cash_account,
            SettlementMethod::BankTransfer => &posting.bank_account,
            SettlementMethod::Account(code) => code,
        }
    }

    fn validate_eligibility(request: &RefundRequest) -> Result<(), RefundError> {
        if request.quantity <= Decimal::ZERO {
            return Err(RefundError::InvalidQuantity(request.quantity));
        }

        if request.reason.trim().len() < MIN_REASON_LEN {
            return Err(RefundError::ReasonRequired);
        }

        if let Some(sold) = request.original_sale_quantity {
            if request.quantity > sold {
                return Err(RefundError::ExceedsOriginalSale {
                    requested: request.quantity,
                    sold,
                });
            }
        }

        Ok(())
    }

    /// Process a product refund: restore stock, reverse sale revenue
    pub async fn process_refund(
        &self,
        request: RefundRequest,
        user: &str,
    ) -> Result<ProcessedRefund, RefundError> {
        Self::validate_eligibility(&request)?;

        let product = movement_repo::find_product(&self.pool, request.product_id)
            .await?
            .ok_or(RefundError::ProductNotFound(request.product_id))?;

        if product.is_service {
            return Err(RefundError::Movement(MovementError::ServiceProduct(
                product.id,
            )));
        }

        // Returned units go back to stock first; everything downstream
        // hangs off this committed movement.
        let movement = self
            .movements
            .process_movement(
                MovementRequest {
                    product_id: product.id,
                    quantity_change: request.quantity,
                    movement_type: MovementType::ReturnIn,
                    source_reference: request.reference.clone(),
                    idempotency_key: IdempotencyService::stock_movement_key(
                        product.id,
                        MovementType::ReturnIn.as_str(),
                        &request.reference,
                        "refund",
                    ),
                    unit_cost: None,
                    document_number: Some(request.reference.clone()),
                    notes: Some(format!(
                        "{}: {}",
                        request.refund_type.as_str(),
                        request.reason
                    )),
                },
                user,
            )
            .await?;

        let refund_amount = from_minor(product.selling_price_minor) * request.quantity;
        let entry = if to_minor(refund_amount) > 0 {
            self.post_refund_entry(&request, &product.name, refund_amount, user)
                .await
        } else {
            None
        };

        self.audit
            .record_operation(
                "ProductRefund",
                &request.reference,
                "PRODUCT_REFUND_PROCESSED",
                user,
                SERVICE_NAME,
                None,
                Some(json!({
                    "product_id": product.id,
                    "quantity": request.quantity,
                    "refund_type": request.refund_type.as_str(),
                    "movement_id": movement.id,
                    "entry_number": entry.as_ref().map(|e| e.number.clone()),
                    "refund_amount_minor": to_minor(refund_amount),
                })),
            )
            .await?;

        tracing::info!(
            product_id = product.id,
            quantity = %request.quantity,
            reference = %request.reference,
            entry = entry.as_ref().map(|e| e.number.as_str()).unwrap_or("none"),
            "product refund processed"
        );

        Ok(ProcessedRefund {
            movement,
            entry,
            refund_amount,
        })
    }

    /// Post the revenue-reversing entry; failures are absorbed
    ///
    /// The gateway records its own failed idempotency outcome and audit
    /// row, so this only logs and moves on.
    async fn post_refund_entry(
        &self,
        request: &RefundRequest,
        product_name: &str,
        amount: Decimal,
        user: &str,
    ) -> Option<JournalEntry> {
        let settlement_account = Self::settlement_account(&self.posting, &request.settlement);

        let lines = vec![
            LineSpec::new(&self.posting.revenue_account, amount, Decimal::ZERO)
                .with_description(&format!("Sale revenue reversed: {product_name}")),
            LineSpec::new(settlement_account, Decimal::ZERO, amount)
                .with_description(&format!("Refund paid out: {product_name}")),
        ];

        let entry_request = CreateEntryRequest {
            source: SourceRef::new("product", "ProductRefund", request.product_id),
            lines,
            idempotency_key: IdempotencyService::journal_entry_key(
                "product",
                "ProductRefund",
                request.product_id,
                &format!("refund:{}", request.reference),
            ),
            entry_type: EntryType::Refund,
            description: format!(
                "Refund of {} unit(s) of {}: {}",
                request.quantity, product_name, request.reason
            ),
            reference: Some(request.reference.clone()),
            entry_date: None,
            financial_category: None,
            financial_subcategory: None,
            auto_post: true,
            period_override: None,
            reversal: None,
        };

        match self.gateway.create_journal_entry(entry_request, user).await {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::error!(
                    product_id = request.product_id,
                    reference = %request.reference,
                    error = %err,
                    "refund entry failed; stock restoration stands"
                );
                None
            }
        }
    }
}
