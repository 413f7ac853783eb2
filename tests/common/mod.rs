//! Common test utilities for governance integration tests
//!
//! Each test builds its own throwaway database file, so test binaries run
//! fully parallel with no shared state. The pool is capped at one
//! connection; task-level interleaving still exercises the races the
//! gateway arbitrates while keeping the storage layer deterministic.

#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use uuid::Uuid;

use governance_rs::config::{GovernanceConfig, MovementPosting, RefundPosting};
use governance_rs::db;
use governance_rs::repos::{movement_repo, source_repo};
use governance_rs::services::accounting_gateway::{
    AccountingGateway, CreateEntryRequest, SourceRef,
};
use governance_rs::services::audit_service::AuditService;
use governance_rs::services::idempotency_service::IdempotencyService;
use governance_rs::services::movement_service::MovementService;
use governance_rs::services::period_close_service::PeriodCloseService;
use governance_rs::services::quarantine_service::QuarantineService;
use governance_rs::services::refund_service::RefundService;
use governance_rs::services::repair_service::RepairService;
use governance_rs::services::reversal_service::ReversalService;
use governance_rs::services::source_linkage_service::SourceLinkageService;
use governance_rs::services::switchboard::{
    Switchboard, COMPONENT_ACCOUNTING_GATEWAY, COMPONENT_IDEMPOTENCY, COMPONENT_MOVEMENT_SERVICE,
    COMPONENT_SOURCE_LINKAGE,
};
use governance_rs::validation::LineSpec;
use rust_decimal_macros::dec;

static ENV_INIT: Once = Once::new();

pub const TEST_USER: &str = "u1";

pub struct TestContext {
    pub pool: SqlitePool,
    pub config: Arc<GovernanceConfig>,
    pub audit: Arc<AuditService>,
    pub switchboard: Arc<Switchboard>,
    pub idempotency: Arc<IdempotencyService>,
    pub linkage: Arc<SourceLinkageService>,
    pub quarantine: Arc<QuarantineService>,
    pub gateway: Arc<AccountingGateway>,
    pub open_period_id: Uuid,
    pub closed_period_id: Uuid,
    _tmp: TempDir,
}

/// Build the full service stack on a fresh database, seed the reference
/// data, and enable the standard flags.
pub async fn setup() -> TestContext {
    ENV_INIT.call_once(|| {
        // One connection keeps SQLite write transactions deterministic.
        std::env::set_var("DB_MAX_CONNECTIONS", "1");
        std::env::set_var("DB_ACQUIRE_TIMEOUT_SECS", "30");
    });

    let tmp = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp.path().join("governance.db");
    let database_url = format!("sqlite://{}", db_path.display());

    let pool = db::init_pool(&database_url)
        .await
        .expect("failed to initialize test pool");
    db::run_migrations(&pool).await.expect("migrations failed");

    let config = Arc::new(GovernanceConfig::standard());
    let audit = Arc::new(AuditService::new(pool.clone()));
    let switchboard = Arc::new(
        Switchboard::new(pool.clone(), audit.clone())
            .await
            .expect("failed to build switchboard"),
    );
    let idempotency = Arc::new(IdempotencyService::new(
        pool.clone(),
        config.idempotency_ttl,
        config.retry.clone(),
    ));
    let linkage = Arc::new(SourceLinkageService::new(
        pool.clone(),
        config.clone(),
        audit.clone(),
    ));
    let quarantine = Arc::new(QuarantineService::new(pool.clone(), audit.clone()));
    let gateway = Arc::new(AccountingGateway::new(
        pool.clone(),
        switchboard.clone(),
        linkage.clone(),
        idempotency.clone(),
        audit.clone(),
    ));

    seed_accounts(&pool).await;
    let (open_period_id, closed_period_id) = seed_periods(&pool).await;
    seed_business_records(&pool).await;
    seed_products(&pool).await;
    enable_standard_flags(&switchboard).await;

    TestContext {
        pool,
        config,
        audit,
        switchboard,
        idempotency,
        linkage,
        quarantine,
        gateway,
        open_period_id,
        closed_period_id,
        _tmp: tmp,
    }
}

impl TestContext {
    pub fn reversal_service(&self) -> ReversalService {
        ReversalService::new(self.pool.clone(), self.gateway.clone())
    }

    pub fn period_close_service(&self) -> PeriodCloseService {
        PeriodCloseService::new(self.pool.clone(), self.audit.clone())
    }

    pub fn movement_service(&self) -> MovementService {
        MovementService::new(
            self.pool.clone(),
            self.switchboard.clone(),
            self.idempotency.clone(),
            self.audit.clone(),
        )
    }

    pub fn movement_service_with_posting(&self) -> MovementService {
        self.movement_service().with_accounting(
            self.gateway.clone(),
            MovementPosting {
                inventory_account: "1030".to_string(),
                cogs_account: "5010".to_string(),
            },
        )
    }

    pub fn refund_service(&self) -> RefundService {
        RefundService::new(
            self.pool.clone(),
            self.gateway.clone(),
            Arc::new(self.movement_service()),
            self.audit.clone(),
            RefundPosting {
                revenue_account: "40500".to_string(),
                cash_account: "10100".to_string(),
                bank_account: "10200".to_string(),
            },
        )
    }

    pub fn repair_service(&self) -> RepairService {
        RepairService::new(
            self.pool.clone(),
            self.config.clone(),
            self.linkage.clone(),
            self.quarantine.clone(),
        )
    }

    /// The canonical valid student-fee request: 1000.00 receivable against
    /// tuition revenue
    pub fn student_fee_request(&self, idempotency_key: &str) -> CreateEntryRequest {
        CreateEntryRequest::automatic(
            SourceRef::new("students", "StudentFee", 123),
            vec![
                LineSpec::new("10301", dec!(1000.00), dec!(0))
                    .with_description("Student fee receivable"),
                LineSpec::new("41020", dec!(0), dec!(1000.00))
                    .with_description("Tuition revenue earned"),
            ],
            idempotency_key,
            "Student fee entry",
        )
    }
}

async fn seed_accounts(pool: &SqlitePool) {
    // code, name, type, active, leaf, postable
    let accounts: &[(&str, &str, &str, bool, bool, bool)] = &[
        ("10000", "Assets", "asset", true, false, true),
        ("10100", "Cash", "asset", true, true, true),
        ("10200", "Bank", "asset", true, true, true),
        ("10301", "Parents Receivable", "asset", true, true, true),
        ("1030", "Inventory", "asset", true, true, true),
        ("41020", "Tuition Revenue", "revenue", true, true, true),
        ("40500", "Product Sales Revenue", "revenue", true, true, true),
        ("5010", "Cost of Goods Sold", "expense", true, true, true),
        ("99999", "Legacy Clearing", "asset", false, true, true),
        ("88888", "Memo Accounts", "asset", true, true, false),
    ];

    for (code, name, account_type, active, leaf, postable) in accounts {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, code, name, account_type, is_active, is_leaf, is_postable, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(account_type)
        .bind(active)
        .bind(leaf)
        .bind(postable)
        .bind(Utc::now())
        .execute(pool)
        .await
        .expect("failed to seed account");
    }
}

/// Date inside the seeded closed period
pub fn closed_period_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 6, 15).unwrap()
}

async fn seed_periods(pool: &SqlitePool) -> (Uuid, Uuid) {
    // The open period brackets "today" so entries with a defaulted date
    // always land inside it; the closed period sits in the far past.
    let today = Utc::now().date_naive();
    let open_id = insert_period(
        pool,
        "Current",
        today - chrono::Duration::days(180),
        today + chrono::Duration::days(185),
        false,
    )
    .await;

    let closed_id = insert_period(
        pool,
        "FY2000",
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2000, 12, 31).unwrap(),
        true,
    )
    .await;

    (open_id, closed_id)
}

pub async fn insert_period(
    pool: &SqlitePool,
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
    closed: bool,
) -> Uuid {
    let period_id = Uuid::new_v4();
    let status = if closed { "closed" } else { "open" };

    sqlx::query(
        r#"
        INSERT INTO accounting_periods (id, name, start_date, end_date, status, closed_at, closed_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(period_id)
    .bind(name)
    .bind(start)
    .bind(end)
    .bind(status)
    .bind(closed.then(Utc::now))
    .bind(closed.then(|| "closer".to_string()))
    .bind(Utc::now())
    .execute(pool)
    .await
    .expect("failed to seed period");

    period_id
}

async fn seed_business_records(pool: &SqlitePool) {
    source_repo::register(pool, "students", "StudentFee", 123, true)
        .await
        .expect("failed to seed StudentFee");
    source_repo::register(pool, "students", "FeePayment", 77, true)
        .await
        .expect("failed to seed FeePayment");
    source_repo::register(pool, "core", "AcademicYear", 1, true)
        .await
        .expect("failed to seed AcademicYear");

    for product_id in [1, 2, 3] {
        source_repo::register(pool, "product", "StockMovement", product_id, true)
            .await
            .expect("failed to seed StockMovement source");
        source_repo::register(pool, "product", "ProductRefund", product_id, true)
            .await
            .expect("failed to seed ProductRefund source");
    }
}

async fn seed_products(pool: &SqlitePool) {
    // id 1: 3 units in stock, 25.00 cost, sells for 40.00
    movement_repo::insert_product(pool, 1, "Widget", false, 2_500, 4_000, 3_000)
        .await
        .expect("failed to seed product 1");
    // id 2: service products carry no stock
    movement_repo::insert_product(pool, 2, "Support Plan", true, 0, 0, 0)
        .await
        .expect("failed to seed product 2");
    // id 3: zero-priced giveaway product
    movement_repo::insert_product(pool, 3, "Gadget", false, 0, 0, 10_000)
        .await
        .expect("failed to seed product 3");
}

async fn enable_standard_flags(switchboard: &Switchboard) {
    for component in [
        COMPONENT_ACCOUNTING_GATEWAY,
        COMPONENT_MOVEMENT_SERVICE,
        COMPONENT_IDEMPOTENCY,
        COMPONENT_SOURCE_LINKAGE,
    ] {
        switchboard
            .enable_component(component, "test setup", TEST_USER)
            .await
            .expect("failed to enable component");
    }

    for workflow in [
        "student_fee_to_journal_entry",
        "fee_payment_to_journal_entry",
        "stock_movement_to_journal_entry",
        "product_refund_to_journal_entry",
    ] {
        switchboard
            .enable_workflow(workflow, "test setup", TEST_USER)
            .await
            .expect("failed to enable workflow");
    }
}
