//! Reversal engine integration tests

mod common;

use common::{setup, TEST_USER};
use governance_rs::repos::journal_repo::{self, EntryStatus, EntryType};
use governance_rs::services::accounting_gateway::GatewayError;
use governance_rs::services::idempotency_service::IdempotencyService;
use rust_decimal_macros::dec;

#[tokio::test]
async fn full_reversal_swaps_lines_and_links_back() {
    let ctx = setup().await;
    let reversals = ctx.reversal_service();

    let original = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request(&IdempotencyService::journal_entry_key(
                "students",
                "StudentFee",
                123,
                "create",
            )),
            TEST_USER,
        )
        .await
        .unwrap();

    let reversal = reversals
        .create_reversal_entry(
            original.id,
            TEST_USER,
            "correction",
            "JE:students:StudentFee:123:reverse",
            None,
        )
        .await
        .expect("reversal should be created");

    assert!(reversal.is_reversal);
    assert_eq!(reversal.entry_type, EntryType::Reversal);
    assert_eq!(reversal.original_entry_id, Some(original.id));
    assert_eq!(reversal.reversal_reason.as_deref(), Some("correction"));
    assert_eq!(reversal.status, EntryStatus::Posted);
    assert!(reversal.is_locked);
    assert_eq!(reversal.reference.as_deref(), Some(format!("REV-{}", original.number).as_str()));

    // Lines are the original's with debit/credit swapped.
    let original_lines = journal_repo::fetch_lines(&ctx.pool, original.id).await.unwrap();
    let reversal_lines = journal_repo::fetch_lines(&ctx.pool, reversal.id).await.unwrap();
    assert_eq!(reversal_lines.len(), original_lines.len());
    assert_eq!(reversal_lines[0].account_code, "10301");
    assert_eq!(reversal_lines[0].credit_minor, 100_000);
    assert_eq!(reversal_lines[0].debit_minor, 0);
    assert_eq!(reversal_lines[1].account_code, "41020");
    assert_eq!(reversal_lines[1].debit_minor, 100_000);

    // The pair is discoverable by back-reference; the original is intact.
    let back = reversals.reversed_entry(original.id).await.unwrap().unwrap();
    assert_eq!(back.id, reversal.id);

    let reread = journal_repo::fetch_entry(&ctx.pool, original.id).await.unwrap().unwrap();
    assert_eq!(reread.status, EntryStatus::Posted);
    assert_eq!(reread.number, original.number);
}

#[tokio::test]
async fn reversal_preconditions_are_enforced() {
    let ctx = setup().await;
    let reversals = ctx.reversal_service();

    // Draft entries cannot be reversed.
    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:draft");
    request.auto_post = false;
    let draft = ctx.gateway.create_journal_entry(request, TEST_USER).await.unwrap();

    let err = reversals
        .create_reversal_entry(draft.id, TEST_USER, "nope", "JE:rev:draft", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));

    // Posted entries reverse once, and only once.
    let original = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:posted"),
            TEST_USER,
        )
        .await
        .unwrap();

    let reversal = reversals
        .create_reversal_entry(original.id, TEST_USER, "fix", "JE:rev:first", None)
        .await
        .unwrap();

    let err = reversals
        .create_reversal_entry(original.id, TEST_USER, "again", "JE:rev:second", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));

    // A reversal of a reversal is forbidden.
    let err = reversals
        .create_reversal_entry(reversal.id, TEST_USER, "undo the undo", "JE:rev:third", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));

    // An empty reason is refused.
    let fresh = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:fresh"),
            TEST_USER,
        )
        .await
        .unwrap();
    let err = reversals
        .create_reversal_entry(fresh.id, TEST_USER, "  ", "JE:rev:noreason", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));
}

#[tokio::test]
async fn partial_reversal_scales_lines() {
    let ctx = setup().await;
    let reversals = ctx.reversal_service();

    let original = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:partial"),
            TEST_USER,
        )
        .await
        .unwrap();

    let reversal = reversals
        .create_reversal_entry(
            original.id,
            TEST_USER,
            "partial refund",
            "JE:rev:partial",
            Some(dec!(250.00)),
        )
        .await
        .unwrap();

    let lines = journal_repo::fetch_lines(&ctx.pool, reversal.id).await.unwrap();
    let debit: i64 = lines.iter().map(|l| l.debit_minor).sum();
    let credit: i64 = lines.iter().map(|l| l.credit_minor).sum();
    assert_eq!(debit, 25_000);
    assert_eq!(credit, 25_000);
}

#[tokio::test]
async fn partial_amount_larger_than_original_is_refused() {
    let ctx = setup().await;
    let reversals = ctx.reversal_service();

    let original = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:overpartial"),
            TEST_USER,
        )
        .await
        .unwrap();

    let err = reversals
        .create_reversal_entry(
            original.id,
            TEST_USER,
            "too much",
            "JE:rev:toomuch",
            Some(dec!(1500.00)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));
}

#[tokio::test]
async fn reversal_replays_under_same_key() {
    let ctx = setup().await;
    let reversals = ctx.reversal_service();

    let original = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:revreplay"),
            TEST_USER,
        )
        .await
        .unwrap();

    let first = reversals
        .create_reversal_entry(original.id, TEST_USER, "fix", "JE:rev:replay", None)
        .await
        .unwrap();

    // The same key resolves to the same reversal; the retry replays rather
    // than tripping the already-reversed precondition.
    let replayed = reversals
        .create_reversal_entry(original.id, TEST_USER, "fix", "JE:rev:replay", None)
        .await
        .unwrap();
    assert_eq!(replayed.id, first.id);

    // A different key for the same original does fail the precondition.
    let err = reversals
        .create_reversal_entry(original.id, TEST_USER, "again", "JE:rev:replay-2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ReversalNotAllowed { .. }));

    let count = journal_repo::count_entries(&ctx.pool).await.unwrap();
    assert_eq!(count, 2, "original plus exactly one reversal");
    assert_eq!(
        reversals.reversed_entry(original.id).await.unwrap().unwrap().id,
        first.id
    );
}
