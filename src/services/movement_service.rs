//! Movement service: the stock-keeping analogue of the accounting gateway
//!
//! Every inventory movement goes through [`MovementService::process_movement`],
//! which deduplicates by key, serialises writers per product, refuses
//! movements that would drive stock negative, and optionally posts a paired
//! cost-of-goods journal entry through the accounting gateway.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MovementPosting;
use crate::repos::movement_repo::{self, MovementType, StockMovement, StockMovementInsert};
use crate::services::accounting_gateway::{
    AccountingGateway, CreateEntryRequest, SourceRef,
};
use crate::services::audit_service::AuditService;
use crate::services::idempotency_service::{
    BeginOutcome, IdempotencyError, IdempotencyService, OP_STOCK_MOVEMENT,
};
use crate::services::switchboard::{Switchboard, COMPONENT_MOVEMENT_SERVICE};
use crate::validation::{from_minor, to_minor, LineSpec};

const SERVICE_NAME: &str = "MovementService";

/// Errors surfaced by movement operations
#[derive(Debug, Error)]
pub enum MovementError {
    #[error("Movement service enforcement is disabled")]
    ServiceDisabled,

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("Product {0} is a service and cannot carry stock")]
    ServiceProduct(i64),

    #[error("Movement of {change} would drive stock of product {product_id} to {resulting}")]
    NegativeStock {
        product_id: i64,
        change: Decimal,
        resulting: Decimal,
    },

    #[error("Quantity change must be non-zero")]
    ZeroQuantity,

    #[error("Operation already in progress for key '{key}'")]
    OperationInProgress { key: String },

    #[error("Prior attempt for key '{key}' failed with code '{code}'")]
    PriorAttemptFailed { key: String, code: String },

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MovementError {
    pub fn code(&self) -> &'static str {
        match self {
            MovementError::ServiceDisabled => "SERVICE_DISABLED",
            MovementError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            MovementError::ServiceProduct(_) => "SERVICE_PRODUCT",
            MovementError::NegativeStock { .. } => "NEGATIVE_STOCK",
            MovementError::ZeroQuantity => "ZERO_QUANTITY",
            MovementError::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            MovementError::PriorAttemptFailed { .. } => "PRIOR_ATTEMPT_FAILED",
            MovementError::Idempotency(_) => "IDEMPOTENCY_ERROR",
            MovementError::Database(_) => "INTEGRITY_ERROR",
            MovementError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Strongly-typed options for one movement call
#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub product_id: i64,
    pub quantity_change: Decimal,
    pub movement_type: MovementType,
    pub source_reference: String,
    pub idempotency_key: String,
    pub unit_cost: Option<Decimal>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
}

pub struct MovementService {
    pool: SqlitePool,
    switchboard: Arc<Switchboard>,
    idempotency: Arc<IdempotencyService>,
    audit: Arc<AuditService>,
    gateway: Option<Arc<AccountingGateway>>,
    posting: Option<MovementPosting>,
}

/// Quantities are stored in thousandths.
fn to_milli(quantity: Decimal) -> i64 {
    let rounded = quantity.round_dp_with_strategy(3, RoundingStrategy::MidpointNearestEven);
    (rounded * Decimal::from(1000)).round().to_i64().unwrap_or(0)
}

fn from_milli(milli: i64) -> Decimal {
    Decimal::new(milli, 3)
}

impl MovementService {
    pub fn new(
        pool: SqlitePool,
        switchboard: Arc<Switchboard>,
        idempotency: Arc<IdempotencyService>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            pool,
            switchboard,
            idempotency,
            audit,
            gateway: None,
            posting: None,
        }
    }

    /// Wire up paired journal-entry posting for outbound movements
    pub fn with_accounting(
        mut self,
        gateway: Arc<AccountingGateway>,
        posting: MovementPosting,
    ) -> Self {
        self.gateway = Some(gateway);
        self.posting = Some(posting);
        self
    }

    /// Apply a stock movement
    pub async fn process_movement(
        &self,
        request: MovementRequest,
        user: &str,
    ) -> Result<StockMovement, MovementError> {
        if !self.switchboard.is_component_enabled(COMPONENT_MOVEMENT_SERVICE) {
            return Err(MovementError::ServiceDisabled);
        }

        let change_milli = to_milli(request.quantity_change);
        if change_milli == 0 {
            return Err(MovementError::ZeroQuantity);
        }

        let token = match self
            .idempotency
            .begin(
                OP_STOCK_MOVEMENT,
                &request.idempotency_key,
                Some(json!({
                    "product_id": request.product_id,
                    "movement_type": request.movement_type.as_str(),
                    "source_reference": request.source_reference,
                })),
                Some(user),
            )
            .await?
        {
            BeginOutcome::Fresh(token) => token,
            BeginOutcome::Replay(result) => {
                let movement_id = result
                    .get("movement_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        MovementError::Internal(
                            "completed idempotency record lacks movement_id".to_string(),
                        )
                    })?;
                let movement = movement_repo::fetch_movement(&self.pool, movement_id)
                    .await?
                    .ok_or_else(|| {
                        MovementError::Internal("replayed movement vanished".to_string())
                    })?;
                tracing::info!(
                    key = %request.idempotency_key,
                    movement_id = %movement_id,
                    "stock movement replayed from idempotency store"
                );
                return Ok(movement);
            }
            BeginOutcome::InProgress => {
                return Err(MovementError::OperationInProgress {
                    key: request.idempotency_key,
                })
            }
            BeginOutcome::PriorFailure(code) => {
                return Err(MovementError::PriorAttemptFailed {
                    key: request.idempotency_key,
                    code,
                })
            }
        };

        let result = self.execute_movement(&request, change_milli, user, &token).await;

        match result {
            Ok(movement) => {
                self.maybe_post_journal_entry(&request, &movement, user).await;
                Ok(movement)
            }
            Err(err) => {
                if let Err(fail_err) = self.idempotency.fail(&token, err.code()).await {
                    tracing::error!(
                        key = %request.idempotency_key,
                        error = %fail_err,
                        "failed to mark movement idempotency record failed"
                    );
                }
                if let Err(audit_err) = self
                    .audit
                    .record_operation(
                        "StockMovement",
                        &request.idempotency_key,
                        "STOCK_MOVEMENT_FAILED",
                        user,
                        SERVICE_NAME,
                        None,
                        Some(json!({
                            "code": err.code(),
                            "error": err.to_string(),
                            "product_id": request.product_id,
                        })),
                    )
                    .await
                {
                    tracing::error!(error = %audit_err, "failed to audit movement failure");
                }
                Err(err)
            }
        }
    }

    async fn execute_movement(
        &self,
        request: &MovementRequest,
        change_milli: i64,
        user: &str,
        token: &crate::services::idempotency_service::IdempotencyToken,
    ) -> Result<StockMovement, MovementError> {
        let mut tx = self.pool.begin().await?;

        // The product read inside the write transaction serialises racing
        // movements on the same product.
        let product = movement_repo::find_product_tx(&mut tx, request.product_id)
            .await?
            .ok_or(MovementError::ProductNotFound(request.product_id))?;

        if product.is_service {
            return Err(MovementError::ServiceProduct(product.id));
        }

        let new_quantity_milli = product.quantity_milli + change_milli;
        if new_quantity_milli < 0 && !request.movement_type.allows_negative_stock() {
            return Err(MovementError::NegativeStock {
                product_id: product.id,
                change: request.quantity_change,
                resulting: from_milli(new_quantity_milli),
            });
        }

        let movement_id = Uuid::new_v4();
        let insert = StockMovementInsert {
            id: movement_id,
            product_id: product.id,
            quantity_change_milli: change_milli,
            movement_type: request.movement_type,
            source_reference: request.source_reference.clone(),
            idempotency_key: request.idempotency_key.clone(),
            unit_cost_minor: request.unit_cost.map(to_minor),
            document_number: request.document_number.clone(),
            notes: request.notes.clone(),
            created_by: user.to_string(),
        };

        movement_repo::insert_movement_tx(&mut tx, &insert).await?;
        movement_repo::update_product_quantity_tx(&mut tx, product.id, new_quantity_milli).await?;

        self.idempotency
            .complete_tx(&mut tx, token, &json!({ "movement_id": movement_id }))
            .await
            .map_err(|e| MovementError::Internal(e.to_string()))?;

        self.audit
            .record_operation_tx(
                &mut tx,
                "StockMovement",
                &movement_id.to_string(),
                "STOCK_MOVEMENT_APPLIED",
                user,
                SERVICE_NAME,
                Some(json!({ "quantity_milli": product.quantity_milli })),
                Some(json!({
                    "quantity_milli": new_quantity_milli,
                    "movement_type": request.movement_type.as_str(),
                    "change_milli": change_milli,
                })),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            movement_id = %movement_id,
            product_id = product.id,
            change = %request.quantity_change,
            "stock movement applied"
        );

        movement_repo::fetch_movement(&self.pool, movement_id)
            .await?
            .ok_or_else(|| MovementError::Internal("created movement vanished".to_string()))
    }

    /// Post the paired COGS entry for outbound movements, when configured
    ///
    /// Pairing failures never unwind the committed movement; they are
    /// logged and audited for reconciliation.
    async fn maybe_post_journal_entry(
        &self,
        request: &MovementRequest,
        movement: &StockMovement,
        user: &str,
    ) {
        let (Some(gateway), Some(posting)) = (self.gateway.as_ref(), self.posting.as_ref()) else {
            return;
        };

        if !matches!(request.movement_type, MovementType::Out | MovementType::ReturnOut) {
            return;
        }

        let product = match movement_repo::find_product(&self.pool, request.product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(error = %err, "paired entry skipped: product lookup failed");
                return;
            }
        };

        let quantity = from_milli(movement.quantity_change_milli.abs());
        let amount = from_minor(product.cost_price_minor) * quantity;
        if to_minor(amount) == 0 {
            return;
        }

        let lines = vec![
            LineSpec::new(&posting.cogs_account, amount, Decimal::ZERO)
                .with_description(&format!("Cost of goods: {}", product.name)),
            LineSpec::new(&posting.inventory_account, Decimal::ZERO, amount)
                .with_description(&format!("Stock issue: {}", product.name)),
        ];

        let entry_key = IdempotencyService::journal_entry_key(
            "product",
            "StockMovement",
            movement.product_id,
            &format!("movement:{}", movement.id),
        );

        let entry_request = CreateEntryRequest::automatic(
            SourceRef::new("product", "StockMovement", movement.product_id),
            lines,
            &entry_key,
            &format!(
                "Stock movement {} for {}",
                movement.movement_type.as_str(),
                product.name
            ),
        );

        match gateway.create_journal_entry(entry_request, user).await {
            Ok(entry) => {
                tracing::info!(
                    movement_id = %movement.id,
                    entry = %entry.number,
                    "paired journal entry posted for stock movement"
                );
            }
            Err(err) => {
                tracing::error!(
                    movement_id = %movement.id,
                    error = %err,
                    "paired journal entry failed; movement stands"
                );
            }
        }
    }

    /// Current stock of a product
    pub async fn stock_of(&self, product_id: i64) -> Result<Decimal, MovementError> {
        let product = movement_repo::find_product(&self.pool, product_id)
            .await?
            .ok_or(MovementError::ProductNotFound(product_id))?;
        Ok(from_milli(product.quantity_milli))
    }
}
