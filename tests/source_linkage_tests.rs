//! Source linkage contract tests: validate, orphan scan, backfill

mod common;

use common::{setup, TEST_USER};
use governance_rs::repos::{journal_repo, source_repo};
use governance_rs::services::source_linkage_service::{LinkageError, OrphanReason};

#[tokio::test]
async fn validate_checks_allowlist_and_existence() {
    let ctx = setup().await;

    assert!(ctx.linkage.validate("students", "StudentFee", 123).await.unwrap());
    // Allowlisted pair, missing record.
    assert!(!ctx.linkage.validate("students", "StudentFee", 9999).await.unwrap());
    // Pair not in the allowlist, even though a registry row could exist.
    source_repo::register(&ctx.pool, "hr", "Employee", 5, true).await.unwrap();
    assert!(!ctx.linkage.validate("hr", "Employee", 5).await.unwrap());
}

#[tokio::test]
async fn scan_finds_orphans_of_both_kinds() {
    let ctx = setup().await;

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:scan"),
            TEST_USER,
        )
        .await
        .unwrap();

    assert!(ctx.linkage.scan_orphans().await.unwrap().is_empty());

    // Delete the backing record: existence orphan.
    sqlx::query("DELETE FROM business_records WHERE module = 'students' AND model = 'StudentFee'")
        .execute(&ctx.pool)
        .await
        .unwrap();

    let orphans = ctx.linkage.scan_orphans().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].entry_id, entry.id);
    assert_eq!(orphans[0].reason, OrphanReason::RecordMissing);

    // Rewrite the triple to a non-allowlisted pair: allowlist orphan.
    sqlx::query("UPDATE journal_entries SET source_module = 'legacy', source_model = 'Import' WHERE id = $1")
        .bind(entry.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let orphans = ctx.linkage.scan_orphans().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].reason, OrphanReason::NotAllowlisted);
}

#[tokio::test]
async fn backfill_repairs_orphan_and_audits() {
    let ctx = setup().await;

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:backfill"),
            TEST_USER,
        )
        .await
        .unwrap();

    // Orphan it, then repair onto FeePayment 77.
    sqlx::query("UPDATE journal_entries SET source_id = 31337 WHERE id = $1")
        .bind(entry.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    // Dry run reports without touching the row.
    let outcome = ctx
        .linkage
        .backfill(entry.id, "students", "FeePayment", 77, true, TEST_USER)
        .await
        .unwrap();
    assert!(!outcome.applied);
    let unchanged = journal_repo::fetch_entry(&ctx.pool, entry.id).await.unwrap().unwrap();
    assert_eq!(unchanged.source_id, 31337);

    let outcome = ctx
        .linkage
        .backfill(entry.id, "students", "FeePayment", 77, false, TEST_USER)
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.previous.2, 31337);

    let repaired = journal_repo::fetch_entry(&ctx.pool, entry.id).await.unwrap().unwrap();
    assert_eq!(repaired.source_model, "FeePayment");
    assert_eq!(repaired.source_id, 77);

    let history = ctx
        .audit
        .history_for("JournalEntry", &entry.id.to_string())
        .await
        .unwrap();
    assert!(history
        .iter()
        .any(|r| r.operation == "SOURCE_LINKAGE_BACKFILL"));
}

#[tokio::test]
async fn backfill_refuses_invalid_replacements() {
    let ctx = setup().await;

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:badfill"),
            TEST_USER,
        )
        .await
        .unwrap();

    let err = ctx
        .linkage
        .backfill(entry.id, "legacy", "Import", 1, false, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkageError::NotAllowlisted { .. }));

    let err = ctx
        .linkage
        .backfill(entry.id, "students", "StudentFee", 640, false, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkageError::RecordMissing { .. }));

    let err = ctx
        .linkage
        .backfill(uuid::Uuid::new_v4(), "students", "StudentFee", 123, false, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkageError::EntryNotFound(_)));
}
