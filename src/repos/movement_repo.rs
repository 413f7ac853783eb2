//! Repository for products and stock movements

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    ReturnIn,
    ReturnOut,
    Adjustment,
}

impl MovementType {
    /// Only adjustments are authorised to drive stock negative.
    pub fn allows_negative_stock(&self) -> bool {
        matches!(self, MovementType::Adjustment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::ReturnIn => "return_in",
            MovementType::ReturnOut => "return_out",
            MovementType::Adjustment => "adjustment",
        }
    }
}

/// Product row as the movement service sees it
///
/// Quantities are kept in thousandths to allow fractional units without
/// floating point.
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub is_service: bool,
    pub cost_price_minor: i64,
    pub selling_price_minor: i64,
    pub quantity_milli: i64,
    pub created_at: DateTime<Utc>,
}

/// Stock movement (for reading from DB)
#[derive(Debug, Clone, FromRow)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: i64,
    pub quantity_change_milli: i64,
    pub movement_type: MovementType,
    pub source_reference: String,
    pub idempotency_key: String,
    pub unit_cost_minor: Option<i64>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Struct for inserting a stock movement
#[derive(Debug, Clone)]
pub struct StockMovementInsert {
    pub id: Uuid,
    pub product_id: i64,
    pub quantity_change_milli: i64,
    pub movement_type: MovementType,
    pub source_reference: String,
    pub idempotency_key: String,
    pub unit_cost_minor: Option<i64>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
}

const SELECT_MOVEMENT: &str = r#"
    SELECT id, product_id, quantity_change_milli, movement_type, source_reference,
           idempotency_key, unit_cost_minor, document_number, notes, created_by, created_at
    FROM stock_movements
"#;

/// Fetch a product within a transaction
///
/// Reading inside the movement transaction serialises concurrent writers
/// on the same product row.
pub async fn find_product_tx(
    tx: &mut Transaction<'_, Sqlite>,
    product_id: i64,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT id, name, is_service, cost_price_minor, selling_price_minor, quantity_milli, created_at
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(&mut **tx)
    .await
}

/// Fetch a product by id
pub async fn find_product(
    pool: &SqlitePool,
    product_id: i64,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT id, name, is_service, cost_price_minor, selling_price_minor, quantity_milli, created_at
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await
}

/// Insert a product (used by domain sync and tests)
pub async fn insert_product(
    pool: &SqlitePool,
    id: i64,
    name: &str,
    is_service: bool,
    cost_price_minor: i64,
    selling_price_minor: i64,
    quantity_milli: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO products
            (id, name, is_service, cost_price_minor, selling_price_minor, quantity_milli, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(is_service)
    .bind(cost_price_minor)
    .bind(selling_price_minor)
    .bind(quantity_milli)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Set a product's derived stock quantity
pub async fn update_product_quantity_tx(
    tx: &mut Transaction<'_, Sqlite>,
    product_id: i64,
    quantity_milli: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE products SET quantity_milli = $1 WHERE id = $2")
        .bind(quantity_milli)
        .bind(product_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Insert a stock movement row
pub async fn insert_movement_tx(
    tx: &mut Transaction<'_, Sqlite>,
    movement: &StockMovementInsert,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements
            (id, product_id, quantity_change_milli, movement_type, source_reference,
             idempotency_key, unit_cost_minor, document_number, notes, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(movement.id)
    .bind(movement.product_id)
    .bind(movement.quantity_change_milli)
    .bind(movement.movement_type)
    .bind(&movement.source_reference)
    .bind(&movement.idempotency_key)
    .bind(movement.unit_cost_minor)
    .bind(&movement.document_number)
    .bind(&movement.notes)
    .bind(&movement.created_by)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch a movement by id
pub async fn fetch_movement(
    pool: &SqlitePool,
    movement_id: Uuid,
) -> Result<Option<StockMovement>, sqlx::Error> {
    sqlx::query_as::<_, StockMovement>(&format!("{SELECT_MOVEMENT} WHERE id = $1"))
        .bind(movement_id)
        .fetch_optional(pool)
        .await
}

/// Fetch a movement by its idempotency key
pub async fn find_movement_by_key(
    pool: &SqlitePool,
    idempotency_key: &str,
) -> Result<Option<StockMovement>, sqlx::Error> {
    sqlx::query_as::<_, StockMovement>(&format!("{SELECT_MOVEMENT} WHERE idempotency_key = $1"))
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
}

/// Products whose derived stock has gone negative, for the corruption scan
pub async fn negative_stock_products(pool: &SqlitePool) -> Result<Vec<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT id, name, is_service, cost_price_minor, selling_price_minor, quantity_milli, created_at
        FROM products
        WHERE quantity_milli < 0
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Total number of stock movements
pub async fn count_movements(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements")
        .fetch_one(pool)
        .await
}
