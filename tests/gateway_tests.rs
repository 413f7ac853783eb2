//! Accounting gateway integration tests
//!
//! Covers the canonical create flow, validation refusals, governance
//! refusals, and the failure bookkeeping (idempotency + audit).

mod common;

use common::{setup, TEST_USER};
use governance_rs::repos::journal_repo::{self, EntryStatus};
use governance_rs::services::accounting_gateway::{
    CreateEntryRequest, GatewayError, SourceRef,
};
use governance_rs::services::idempotency_service::{IdempotencyService, ProbeOutcome, OP_JOURNAL_ENTRY};
use governance_rs::services::switchboard::EMERGENCY_DISABLE_ACCOUNTING;
use governance_rs::validation::{LineSpec, ValidationError};
use rust_decimal_macros::dec;

#[tokio::test]
async fn valid_student_fee_entry_is_created_posted_and_locked() {
    let ctx = setup().await;
    let key = IdempotencyService::journal_entry_key("students", "StudentFee", 123, "create");

    let entry = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(&key), TEST_USER)
        .await
        .expect("entry should be created");

    assert_eq!(entry.number, "JE-0001");
    assert_eq!(entry.status, EntryStatus::Posted);
    assert!(entry.is_locked, "high-priority workflow must lock on post");
    assert_eq!(entry.posted_by.as_deref(), Some(TEST_USER));
    assert_eq!(entry.locked_by.as_deref(), Some(TEST_USER));
    assert_eq!(entry.source_module, "students");
    assert_eq!(entry.source_id, 123);
    assert_eq!(entry.created_by_service, "AccountingGateway");
    assert_eq!(entry.idempotency_key.as_deref(), Some(key.as_str()));

    let lines = journal_repo::fetch_lines(&ctx.pool, entry.id).await.unwrap();
    assert_eq!(lines.len(), 2);
    let debit: i64 = lines.iter().map(|l| l.debit_minor).sum();
    let credit: i64 = lines.iter().map(|l| l.credit_minor).sum();
    assert_eq!(debit, 100_000);
    assert_eq!(debit, credit);

    // Exactly one audit row for the successful creation.
    let audit_rows = ctx.audit.history_for("JournalEntry", &entry.id.to_string()).await.unwrap();
    assert_eq!(audit_rows.len(), 1);
    assert_eq!(audit_rows[0].operation, "JOURNAL_ENTRY_CREATED");
}

#[tokio::test]
async fn idempotent_replay_returns_same_entry_without_new_rows() {
    let ctx = setup().await;
    let key = IdempotencyService::journal_entry_key("students", "StudentFee", 123, "create");

    let first = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(&key), TEST_USER)
        .await
        .unwrap();

    let second = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(&key), TEST_USER)
        .await
        .expect("replay should succeed");

    assert_eq!(first.id, second.id);
    assert_eq!(first.number, second.number);
    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 1);

    match ctx.idempotency.probe(OP_JOURNAL_ENTRY, &key).await.unwrap() {
        ProbeOutcome::Completed(result) => {
            assert_eq!(
                result.get("entry_number").and_then(|v| v.as_str()),
                Some(first.number.as_str())
            );
        }
        other => panic!("expected completed record, got {other:?}"),
    }

    let stats = ctx.gateway.get_statistics();
    assert_eq!(stats.entries_created, 1);
    assert_eq!(stats.replays_served, 1);
}

#[tokio::test]
async fn orphan_source_is_rejected_and_key_poisoned() {
    let ctx = setup().await;

    let request = CreateEntryRequest::automatic(
        SourceRef::new("invalid", "InvalidModel", 999),
        vec![
            LineSpec::new("10301", dec!(100.00), dec!(0)),
            LineSpec::new("41020", dec!(0), dec!(100.00)),
        ],
        "JE:invalid:InvalidModel:999:create",
        "Orphan entry attempt",
    );

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidSourceLinkage { .. }));

    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);

    match ctx
        .idempotency
        .probe(OP_JOURNAL_ENTRY, "JE:invalid:InvalidModel:999:create")
        .await
        .unwrap()
    {
        ProbeOutcome::Failed(code) => assert_eq!(code, "INVALID_SOURCE_LINKAGE"),
        other => panic!("expected failed record, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_source_record_is_rejected() {
    let ctx = setup().await;

    // Allowlisted pair, nonexistent record id.
    let request = CreateEntryRequest::automatic(
        SourceRef::new("students", "StudentFee", 424242),
        vec![
            LineSpec::new("10301", dec!(100.00), dec!(0)),
            LineSpec::new("41020", dec!(0), dec!(100.00)),
        ],
        "JE:students:StudentFee:424242:create",
        "Missing record",
    );

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::InvalidSourceLinkage { id: 424242, .. }
    ));
}

#[tokio::test]
async fn closed_period_write_is_refused_with_audit_row() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:backdated");
    request.entry_date = Some(common::closed_period_date());

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();

    match err {
        GatewayError::PeriodClosed { period } => assert_eq!(period, "FY2000"),
        other => panic!("expected PeriodClosed, got {other}"),
    }

    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);

    let failures = governance_rs::repos::audit_repo::for_operation(&ctx.pool, "JOURNAL_ENTRY_FAILED")
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn unbalanced_entry_is_rejected_with_difference() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:unbalanced");
    request.lines = vec![
        LineSpec::new("10301", dec!(100.00), dec!(0)),
        LineSpec::new("41020", dec!(0), dec!(50.00)),
    ];

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();

    match err {
        GatewayError::Validation(ValidationError::UnbalancedEntry { difference, .. }) => {
            assert_eq!(difference, dec!(50.00));
        }
        other => panic!("expected UnbalancedEntry, got {other}"),
    }

    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn single_line_entry_is_rejected() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:oneline");
    request.lines = vec![LineSpec::new("10301", dec!(100.00), dec!(0))];

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Validation(ValidationError::InsufficientLines(1))
    ));
}

#[tokio::test]
async fn all_zero_lines_are_rejected() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:zeros");
    request.lines = vec![
        LineSpec::new("10301", dec!(0), dec!(0)),
        LineSpec::new("41020", dec!(0), dec!(0)),
    ];

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Validation(ValidationError::ZeroLine(0))
    ));
}

#[tokio::test]
async fn line_with_both_sides_is_rejected() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:bothsides");
    request.lines = vec![
        LineSpec::new("10301", dec!(60.00), dec!(10.00)),
        LineSpec::new("41020", dec!(0), dec!(50.00)),
    ];

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Validation(ValidationError::BothSidesSet(0))
    ));
}

#[tokio::test]
async fn group_account_is_rejected() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:group");
    request.lines = vec![
        LineSpec::new("10000", dec!(100.00), dec!(0)),
        LineSpec::new("41020", dec!(0), dec!(100.00)),
    ];

    let err = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Account(_)));
    assert_eq!(err.code(), "INVALID_ACCOUNT");
}

#[tokio::test]
async fn inactive_and_nonpostable_accounts_are_rejected() {
    let ctx = setup().await;

    for bad_code in ["99999", "88888", "77777"] {
        let mut request =
            ctx.student_fee_request(&format!("JE:students:StudentFee:123:{bad_code}"));
        request.lines = vec![
            LineSpec::new(bad_code, dec!(100.00), dec!(0)),
            LineSpec::new("41020", dec!(0), dec!(100.00)),
        ];

        let err = ctx
            .gateway
            .create_journal_entry(request, TEST_USER)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Account(_)), "code {bad_code}");
    }
}

#[tokio::test]
async fn disabled_workflow_is_refused_without_poisoning_the_key() {
    let ctx = setup().await;
    let key = "JE:students:StudentFee:123:toggled";

    ctx.switchboard
        .disable_workflow("student_fee_to_journal_entry", "maintenance", TEST_USER)
        .await
        .unwrap();

    let err = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(key), TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::WorkflowDisabled { .. }));

    // Re-enable and retry under the same key: the refusal must not have
    // blocked it.
    ctx.switchboard
        .enable_workflow("student_fee_to_journal_entry", "maintenance over", TEST_USER)
        .await
        .unwrap();

    let entry = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(key), TEST_USER)
        .await
        .expect("retry after re-enable should succeed");
    assert_eq!(entry.status, EntryStatus::Posted);
}

#[tokio::test]
async fn emergency_flag_overrides_enabled_workflow() {
    let ctx = setup().await;

    ctx.switchboard
        .activate_emergency(EMERGENCY_DISABLE_ACCOUNTING, "incident", TEST_USER)
        .await
        .unwrap();

    let err = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:emergency"),
            TEST_USER,
        )
        .await
        .unwrap_err();

    match err {
        GatewayError::EmergencyDisabled { flag } => {
            assert_eq!(flag, EMERGENCY_DISABLE_ACCOUNTING);
        }
        other => panic!("expected EmergencyDisabled, got {other}"),
    }
}

#[tokio::test]
async fn in_progress_key_is_reported() {
    let ctx = setup().await;
    let key = "JE:students:StudentFee:123:inflight";

    // Simulate another writer holding the key.
    ctx.idempotency
        .begin(OP_JOURNAL_ENTRY, key, None, Some("other-writer"))
        .await
        .unwrap();

    let err = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(key), TEST_USER)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::OperationInProgress { .. }));
}

#[tokio::test]
async fn failed_key_surfaces_prior_failure() {
    let ctx = setup().await;
    let key = "JE:students:StudentFee:123:failme";

    let mut bad = ctx.student_fee_request(key);
    bad.lines = vec![
        LineSpec::new("10301", dec!(100.00), dec!(0)),
        LineSpec::new("41020", dec!(0), dec!(50.00)),
    ];
    ctx.gateway
        .create_journal_entry(bad, TEST_USER)
        .await
        .unwrap_err();

    // Retrying the same key with fixed lines still surfaces the recorded
    // failure; recovery needs a fresh key.
    let err = ctx
        .gateway
        .create_journal_entry(ctx.student_fee_request(key), TEST_USER)
        .await
        .unwrap_err();

    match err {
        GatewayError::PriorAttemptFailed { code, .. } => {
            assert_eq!(code, "UNBALANCED_ENTRY");
        }
        other => panic!("expected PriorAttemptFailed, got {other}"),
    }
}

#[tokio::test]
async fn draft_entry_lifecycle_post_cancel_delete() {
    let ctx = setup().await;

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:draft1");
    request.auto_post = false;
    let draft = ctx
        .gateway
        .create_journal_entry(request, TEST_USER)
        .await
        .unwrap();
    assert_eq!(draft.status, EntryStatus::Draft);
    assert!(!draft.is_locked);

    let posted = ctx.gateway.post_entry(draft.id, TEST_USER).await.unwrap();
    assert_eq!(posted.status, EntryStatus::Posted);
    assert!(posted.is_locked);

    // Posted entries are immutable.
    let err = ctx.gateway.cancel_entry(posted.id, TEST_USER).await.unwrap_err();
    assert!(matches!(err, GatewayError::PostedEntryImmutable { .. }));
    let err = ctx.gateway.delete_draft(posted.id, TEST_USER).await.unwrap_err();
    assert!(matches!(err, GatewayError::PostedEntryImmutable { .. }));
    let err = ctx.gateway.post_entry(posted.id, TEST_USER).await.unwrap_err();
    assert!(matches!(err, GatewayError::PostedEntryImmutable { .. }));

    // A second draft can be cancelled, and a third deleted.
    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:draft2");
    request.auto_post = false;
    let draft2 = ctx.gateway.create_journal_entry(request, TEST_USER).await.unwrap();
    let cancelled = ctx.gateway.cancel_entry(draft2.id, TEST_USER).await.unwrap();
    assert_eq!(cancelled.status, EntryStatus::Cancelled);
    let err = ctx.gateway.post_entry(cancelled.id, TEST_USER).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTransition { .. }));

    let mut request = ctx.student_fee_request("JE:students:StudentFee:123:draft3");
    request.auto_post = false;
    let draft3 = ctx.gateway.create_journal_entry(request, TEST_USER).await.unwrap();
    ctx.gateway.delete_draft(draft3.id, TEST_USER).await.unwrap();
    assert!(journal_repo::fetch_entry(&ctx.pool, draft3.id).await.unwrap().is_none());
    assert!(journal_repo::fetch_lines(&ctx.pool, draft3.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reference_defaults_to_model_and_id() {
    let ctx = setup().await;

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:ref"),
            TEST_USER,
        )
        .await
        .unwrap();

    assert_eq!(entry.reference.as_deref(), Some("StudentFee-123"));
}
