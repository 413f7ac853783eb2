//! Movement service integration tests

mod common;

use common::{setup, TEST_USER};
use governance_rs::repos::journal_repo;
use governance_rs::repos::movement_repo::MovementType;
use governance_rs::services::idempotency_service::IdempotencyService;
use governance_rs::services::movement_service::{MovementError, MovementRequest};
use governance_rs::services::switchboard::COMPONENT_MOVEMENT_SERVICE;
use rust_decimal_macros::dec;

fn movement(product_id: i64, change: rust_decimal::Decimal, movement_type: MovementType, key: &str) -> MovementRequest {
    MovementRequest {
        product_id,
        quantity_change: change,
        movement_type,
        source_reference: "SO-99".to_string(),
        idempotency_key: key.to_string(),
        unit_cost: None,
        document_number: None,
        notes: None,
    }
}

#[tokio::test]
async fn outbound_movement_updates_stock_and_audits() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    let key = IdempotencyService::stock_movement_key(1, "out", "SO-99", "create");
    let applied = movements
        .process_movement(movement(1, dec!(-2), MovementType::Out, &key), TEST_USER)
        .await
        .expect("movement should apply");

    assert_eq!(applied.quantity_change_milli, -2_000);
    assert_eq!(movements.stock_of(1).await.unwrap(), dec!(1.000));

    let audit_rows = ctx
        .audit
        .history_for("StockMovement", &applied.id.to_string())
        .await
        .unwrap();
    assert_eq!(audit_rows.len(), 1);
    assert_eq!(audit_rows[0].operation, "STOCK_MOVEMENT_APPLIED");
}

#[tokio::test]
async fn negative_stock_is_refused_and_nothing_changes() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    // Stock of product 1 is 3; removing 5 must fail.
    let err = movements
        .process_movement(
            movement(1, dec!(-5), MovementType::Out, "SM:1:out:SO-99:over"),
            TEST_USER,
        )
        .await
        .unwrap_err();

    match err {
        MovementError::NegativeStock { resulting, .. } => {
            assert_eq!(resulting, dec!(-2.000));
        }
        other => panic!("expected NegativeStock, got {other}"),
    }

    assert_eq!(movements.stock_of(1).await.unwrap(), dec!(3.000));
    assert_eq!(
        governance_rs::repos::movement_repo::count_movements(&ctx.pool).await.unwrap(),
        0
    );
    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn authorised_adjustment_may_go_negative() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    movements
        .process_movement(
            movement(1, dec!(-5), MovementType::Adjustment, "SM:1:adjustment:SO-99:fix"),
            TEST_USER,
        )
        .await
        .expect("adjustments may drive stock negative");

    assert_eq!(movements.stock_of(1).await.unwrap(), dec!(-2.000));
}

#[tokio::test]
async fn service_products_carry_no_stock() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    let err = movements
        .process_movement(
            movement(2, dec!(1), MovementType::In, "SM:2:in:SO-99:svc"),
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MovementError::ServiceProduct(2)));
}

#[tokio::test]
async fn unknown_product_and_zero_quantity_are_refused() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    let err = movements
        .process_movement(
            movement(404, dec!(1), MovementType::In, "SM:404:in:SO-99:x"),
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MovementError::ProductNotFound(404)));

    let err = movements
        .process_movement(
            movement(1, dec!(0), MovementType::In, "SM:1:in:SO-99:zero"),
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MovementError::ZeroQuantity));
}

#[tokio::test]
async fn disabled_component_refuses_movements() {
    let ctx = setup().await;
    let movements = ctx.movement_service();

    ctx.switchboard
        .disable_component(COMPONENT_MOVEMENT_SERVICE, "incident", TEST_USER)
        .await
        .unwrap();

    let err = movements
        .process_movement(
            movement(1, dec!(1), MovementType::In, "SM:1:in:SO-99:off"),
            TEST_USER,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MovementError::ServiceDisabled));
}

#[tokio::test]
async fn movement_replays_under_same_key() {
    let ctx = setup().await;
    let movements = ctx.movement_service();
    let key = "SM:1:out:SO-99:replay";

    let first = movements
        .process_movement(movement(1, dec!(-1), MovementType::Out, key), TEST_USER)
        .await
        .unwrap();

    let second = movements
        .process_movement(movement(1, dec!(-1), MovementType::Out, key), TEST_USER)
        .await
        .expect("replay should succeed");

    assert_eq!(first.id, second.id);
    // The stock changed once, not twice.
    assert_eq!(movements.stock_of(1).await.unwrap(), dec!(2.000));
}

#[tokio::test]
async fn outbound_movement_posts_paired_cogs_entry() {
    let ctx = setup().await;
    let movements = ctx.movement_service_with_posting();

    let applied = movements
        .process_movement(
            movement(1, dec!(-2), MovementType::Out, "SM:1:out:SO-99:paired"),
            TEST_USER,
        )
        .await
        .unwrap();

    // Product 1 costs 25.00; two units out posts a 50.00 COGS entry.
    let entry = journal_repo::find_by_idempotency_key(
        &ctx.pool,
        &IdempotencyService::journal_entry_key(
            "product",
            "StockMovement",
            1,
            &format!("movement:{}", applied.id),
        ),
    )
    .await
    .unwrap()
    .expect("paired entry should exist");

    let lines = journal_repo::fetch_lines(&ctx.pool, entry.id).await.unwrap();
    assert_eq!(lines.len(), 2);
    let cogs = lines.iter().find(|l| l.account_code == "5010").unwrap();
    assert_eq!(cogs.debit_minor, 5_000);
    let inventory = lines.iter().find(|l| l.account_code == "1030").unwrap();
    assert_eq!(inventory.credit_minor, 5_000);
}

#[tokio::test]
async fn zero_cost_movement_posts_no_paired_entry() {
    let ctx = setup().await;
    let movements = ctx.movement_service_with_posting();

    movements
        .process_movement(
            movement(3, dec!(-1), MovementType::Out, "SM:3:out:SO-99:zerocost"),
            TEST_USER,
        )
        .await
        .unwrap();

    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn inbound_movement_posts_no_paired_entry() {
    let ctx = setup().await;
    let movements = ctx.movement_service_with_posting();

    movements
        .process_movement(
            movement(1, dec!(5), MovementType::In, "SM:1:in:PO-1:receipt"),
            TEST_USER,
        )
        .await
        .unwrap();

    // Inbound cost postings come from the purchase invoice, not the
    // movement.
    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);
    assert_eq!(movements.stock_of(1).await.unwrap(), dec!(8.000));
}
