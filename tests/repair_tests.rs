//! Repair service integration tests: scanners, planning, quarantine

mod common;

use common::{setup, TEST_USER};
use governance_rs::repos::quarantine_repo::Confidence;
use governance_rs::repos::source_repo;
use governance_rs::services::repair_policy::{CorruptionType, RepairPolicyType};
use governance_rs::services::repair_service::ScannerKind;
use uuid::Uuid;

#[tokio::test]
async fn clean_system_scans_clean() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    let report = repair.scan_for_corruption(None).await;
    assert!(report.is_clean());
    assert_eq!(report.total_issues(), 0);

    let repair_report = repair.create_repair_report(&report);
    assert!(repair_report.plans.is_empty());
    assert!(repair_report.execution_blocked);
    assert!(repair_report.approval_required);
}

#[tokio::test]
async fn orphan_scanner_reports_orphaned_entries() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:orphan"),
            TEST_USER,
        )
        .await
        .unwrap();

    sqlx::query("DELETE FROM business_records WHERE module = 'students'")
        .execute(&ctx.pool)
        .await
        .unwrap();

    let report = repair
        .scan_for_corruption(Some(&[ScannerKind::OrphanedJournalEntries]))
        .await;

    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.corruption_type, CorruptionType::OrphanedJournalEntries);
    assert_eq!(finding.confidence, Confidence::High);
    assert_eq!(finding.issues.len(), 1);
    assert_eq!(
        finding.issues[0].get("object_id").and_then(|v| v.as_str()),
        Some(entry.id.to_string().as_str())
    );

    // High-confidence orphans plan as relink.
    let repair_report = repair.create_repair_report(&report);
    assert_eq!(repair_report.plans.len(), 1);
    assert_eq!(repair_report.plans[0].policy, RepairPolicyType::Relink);
    assert!(!repair_report.plans[0].verification_invariants.is_empty());
}

#[tokio::test]
async fn negative_stock_scanner_reports_products() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    sqlx::query("UPDATE products SET quantity_milli = -4000 WHERE id = 1")
        .execute(&ctx.pool)
        .await
        .unwrap();

    let report = repair
        .scan_for_corruption(Some(&[ScannerKind::NegativeStock]))
        .await;

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].corruption_type, CorruptionType::NegativeStock);
    assert_eq!(
        report.findings[0].issues[0].get("object_id").and_then(|v| v.as_i64()),
        Some(1)
    );
}

#[tokio::test]
async fn singleton_scanner_flags_multiple_active_rows() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    // One active AcademicYear is fine.
    let report = repair
        .scan_for_corruption(Some(&[ScannerKind::MultipleActiveSingleton]))
        .await;
    assert!(report.is_clean());

    source_repo::register(&ctx.pool, "core", "AcademicYear", 2, true)
        .await
        .unwrap();

    let report = repair
        .scan_for_corruption(Some(&[ScannerKind::MultipleActiveSingleton]))
        .await;

    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(
        finding.corruption_type,
        CorruptionType::MultipleActiveSingleton {
            entity: "core.AcademicYear".to_string()
        }
    );
    assert_eq!(finding.issues.len(), 2);

    // Singletons rebuild at high confidence.
    let repair_report = repair.create_repair_report(&report);
    assert_eq!(repair_report.plans[0].policy, RepairPolicyType::Rebuild);
}

#[tokio::test]
async fn unbalanced_scanner_reports_posted_entries() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    let entry = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:tamper"),
            TEST_USER,
        )
        .await
        .unwrap();

    // Corrupt a line under the gateway's feet.
    sqlx::query("UPDATE journal_entry_lines SET credit_minor = 60000 WHERE journal_entry_id = $1 AND credit_minor > 0")
        .bind(entry.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let report = repair
        .scan_for_corruption(Some(&[ScannerKind::UnbalancedJournalEntries]))
        .await;

    assert_eq!(report.findings.len(), 1);
    let issue = &report.findings[0].issues[0];
    assert_eq!(issue.get("difference_minor").and_then(|v| v.as_i64()), Some(40_000));
    assert_eq!(
        issue.get("number").and_then(|v| v.as_str()),
        Some(entry.number.as_str())
    );
}

#[tokio::test]
async fn quarantine_suspicious_data_isolates_high_confidence_findings() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    sqlx::query("UPDATE products SET quantity_milli = -1000 WHERE id = 1")
        .execute(&ctx.pool)
        .await
        .unwrap();

    let report = repair.scan_for_corruption(None).await;
    assert_eq!(report.total_issues(), 1);

    let quarantined = repair
        .quarantine_suspicious_data(&report, Confidence::High, TEST_USER)
        .await;
    assert_eq!(quarantined, 1);

    let records = ctx.quarantine.find(Some("NEGATIVE_STOCK"), None, None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].object_id, "1");
    assert_eq!(records[0].model_name, "Product");
}

#[tokio::test]
async fn quarantine_review_transitions() {
    let ctx = setup().await;

    let id = ctx
        .quarantine
        .quarantine(
            governance_rs::services::quarantine_service::QuarantineSubmission {
                model_name: "Product".to_string(),
                object_id: "9".to_string(),
                corruption_type: "NEGATIVE_STOCK".to_string(),
                confidence: Confidence::Medium,
                reason: "manual submission".to_string(),
                evidence: serde_json::json!({"quantity_milli": -1}),
                original_data: None,
            },
            TEST_USER,
        )
        .await
        .unwrap();

    ctx.quarantine.release(id, TEST_USER).await.unwrap();

    // Released records leave the reachable set for quarantine queries but
    // the row itself survives.
    let open = ctx.quarantine.find(None, None, None).await.unwrap();
    assert!(open.is_empty());
    let record = ctx.quarantine.fetch(id).await.unwrap().unwrap();
    assert_eq!(record.reviewed_by.as_deref(), Some(TEST_USER));

    // Double review is refused.
    assert!(ctx.quarantine.discard(id, TEST_USER).await.is_err());

    // Unknown records are NotFound.
    assert!(ctx.quarantine.release(Uuid::new_v4(), TEST_USER).await.is_err());
}

#[tokio::test]
async fn report_aggregates_risk_and_duration() {
    let ctx = setup().await;
    let repair = ctx.repair_service();

    sqlx::query("UPDATE products SET quantity_milli = -1000 WHERE id = 1")
        .execute(&ctx.pool)
        .await
        .unwrap();
    source_repo::register(&ctx.pool, "core", "AcademicYear", 2, true)
        .await
        .unwrap();

    let report = repair.scan_for_corruption(None).await;
    let repair_report = repair.create_repair_report(&report);

    assert_eq!(repair_report.plans.len(), 2);
    assert_eq!(
        repair_report.total_estimated_duration_secs,
        repair_report.plans.iter().map(|p| p.estimated_duration_secs).sum::<u64>()
    );
    // Rebuild dominates adjustment.
    assert_eq!(
        repair_report.overall_risk,
        governance_rs::services::repair_policy::PlanRisk::High
    );
    assert!(!repair_report.next_steps.is_empty());
}
