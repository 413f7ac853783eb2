use std::env;
use std::time::Duration;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(Config { database_url })
    }
}

/// One allowlisted `module.model` source pair and the workflow it routes to.
///
/// High-priority sources have their posted entries locked immediately
/// instead of waiting for period close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRule {
    pub module: String,
    pub model: String,
    pub workflow: String,
    pub high_priority: bool,
}

impl SourceRule {
    pub fn new(module: &str, model: &str, workflow: &str, high_priority: bool) -> Self {
        Self {
            module: module.to_string(),
            model: model.to_string(),
            workflow: workflow.to_string(),
            high_priority,
        }
    }
}

/// Backoff schedule for callers that lose an idempotency race and need to
/// observe the winner's outcome.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// When true, a `failed` idempotency record may be re-armed and the
    /// operation retried under the same key. Default is to surface the
    /// recorded failure instead.
    pub retry_after_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            retry_after_failure: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Account codes for the paired journal entry the movement service posts
/// for outbound stock movements.
#[derive(Debug, Clone)]
pub struct MovementPosting {
    pub inventory_account: String,
    pub cogs_account: String,
}

/// Account codes the refund service posts against: the revenue account to
/// reverse and the settlement accounts money leaves through.
#[derive(Debug, Clone)]
pub struct RefundPosting {
    pub revenue_account: String,
    pub cash_account: String,
    pub bank_account: String,
}

/// Startup configuration for the governance core.
///
/// Everything that used to be a class-level constant in older deployments
/// (source allowlist, singleton checks, high-priority workflows) is loaded
/// here so tests can inject their own instances.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub allowlist: Vec<SourceRule>,
    /// `module.model` entities expected to have at most one active row in
    /// the business-record registry.
    pub singleton_entities: Vec<String>,
    pub retry: RetryPolicy,
    /// When set, outbound stock movements post a paired COGS entry.
    pub movement_posting: Option<MovementPosting>,
    /// When set, product refunds post a revenue-reversing entry.
    pub refund_posting: Option<RefundPosting>,
    pub idempotency_ttl: Duration,
}

impl GovernanceConfig {
    /// The platform's standard rollout configuration.
    pub fn standard() -> Self {
        Self {
            allowlist: vec![
                SourceRule::new("students", "StudentFee", "student_fee_to_journal_entry", true),
                SourceRule::new("students", "FeePayment", "fee_payment_to_journal_entry", true),
                SourceRule::new(
                    "product",
                    "StockMovement",
                    "stock_movement_to_journal_entry",
                    true,
                ),
                SourceRule::new(
                    "product",
                    "ProductRefund",
                    "product_refund_to_journal_entry",
                    false,
                ),
                SourceRule::new("purchase", "PurchaseInvoice", "purchase_to_journal_entry", false),
                SourceRule::new("sales", "SaleInvoice", "sale_to_journal_entry", false),
            ],
            singleton_entities: vec!["core.AcademicYear".to_string()],
            retry: RetryPolicy::default(),
            movement_posting: None,
            refund_posting: None,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn rule_for(&self, module: &str, model: &str) -> Option<&SourceRule> {
        self.allowlist
            .iter()
            .find(|r| r.module == module && r.model == model)
    }

    pub fn is_allowed(&self, module: &str, model: &str) -> bool {
        self.rule_for(module, model).is_some()
    }
}
