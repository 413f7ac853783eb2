//! Operator CLI for the governance core
//!
//! Exit codes: 0 on success, 1 on operational failure, 2 on usage errors
//! (handled by clap).

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use governance_rs::config::{Config, GovernanceConfig};
use governance_rs::db;
use governance_rs::repos::quarantine_repo::Confidence;
use governance_rs::services::accounting_gateway::AccountingGateway;
use governance_rs::services::audit_service::AuditService;
use governance_rs::services::idempotency_service::{CleanupOptions, IdempotencyService};
use governance_rs::services::quarantine_service::QuarantineService;
use governance_rs::services::repair_service::{RepairService, ScannerKind};
use governance_rs::services::source_linkage_service::SourceLinkageService;
use governance_rs::services::switchboard::Switchboard;

#[derive(Parser)]
#[command(name = "govctl", about = "Governance core operator tooling", version)]
struct Cli {
    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Governance and idempotency health
    Health,
    /// Idempotency store statistics
    Stats,
    /// Switchboard snapshot operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Restore the switchboard to a snapshot
    Rollback {
        snapshot_id: Uuid,
        reason: String,
        /// Required; rollback touches every flag
        #[arg(long)]
        confirm: bool,
    },
    /// Run corruption scanners and print the repair report
    Scan {
        /// Comma-separated scanner names (default: all)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Include per-plan actions in the output
        #[arg(long)]
        detailed: bool,
        /// Exit non-zero when corruption is found
        #[arg(long)]
        fail_on_findings: bool,
        /// Quarantine high-confidence findings after the scan
        #[arg(long)]
        quarantine: bool,
    },
    /// Remove expired idempotency records
    CleanupIdempotency {
        #[arg(long, default_value_t = 720)]
        max_age_hours: i64,
        #[arg(long, default_value_t = 500)]
        batch_size: i64,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Capture the current flag state
    Create { reason: String },
    /// List recent snapshots
    List {
        #[arg(long, default_value_t = 10)]
        recent: i64,
    },
}

struct Services {
    switchboard: Arc<Switchboard>,
    idempotency: Arc<IdempotencyService>,
    gateway: Arc<AccountingGateway>,
    repair: RepairService,
}

async fn build_services() -> Result<Services, Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let pool = db::init_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let governance = Arc::new(GovernanceConfig::standard());
    let audit = Arc::new(AuditService::new(pool.clone()));
    let switchboard = Arc::new(Switchboard::new(pool.clone(), audit.clone()).await?);
    let idempotency = Arc::new(IdempotencyService::new(
        pool.clone(),
        governance.idempotency_ttl,
        governance.retry.clone(),
    ));
    let linkage = Arc::new(SourceLinkageService::new(
        pool.clone(),
        governance.clone(),
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
    let repair = RepairService::new(pool, governance, linkage, quarantine);

    Ok(Services {
        switchboard,
        idempotency,
        gateway,
        repair,
    })
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let services = build_services().await?;
    let operator = std::env::var("GOVCTL_USER").unwrap_or_else(|_| "operator".to_string());

    match cli.command {
        Command::Health => {
            let governance = services.switchboard.get_governance_health();
            let idempotency = services.idempotency.get_health().await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "governance": governance,
                        "idempotency": idempotency,
                    }))?
                );
            } else {
                println!(
                    "components: {}/{} enabled",
                    governance.components_enabled, governance.components_total
                );
                println!(
                    "workflows:  {}/{} enabled",
                    governance.workflows_enabled, governance.workflows_total
                );
                if governance.active_emergencies.is_empty() {
                    println!("emergencies: none active");
                } else {
                    println!("emergencies: {:?}", governance.active_emergencies);
                }
                println!(
                    "idempotency: {} started, {} completed, {} failed, {} stuck",
                    idempotency.started,
                    idempotency.completed,
                    idempotency.failed,
                    idempotency.stuck_started
                );
                if !idempotency.healthy {
                    println!("WARNING: stuck started records need attention");
                }
            }
        }

        Command::Stats => {
            let gateway = services.gateway.get_statistics();
            let idempotency = services.idempotency.get_statistics().await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "gateway": gateway,
                        "idempotency": idempotency,
                    }))?
                );
            } else {
                println!(
                    "gateway: {} created, {} replayed, {} failed (this process)",
                    gateway.entries_created, gateway.replays_served, gateway.failures
                );
                println!(
                    "idempotency records: {} total ({} started, {} completed, {} failed)",
                    idempotency.total_records,
                    idempotency.started,
                    idempotency.completed,
                    idempotency.failed
                );
            }
        }

        Command::Snapshot { action } => match action {
            SnapshotAction::Create { reason } => {
                let id = services
                    .switchboard
                    .create_snapshot(&reason, &operator)
                    .await?;
                println!("snapshot created: {id}");
            }
            SnapshotAction::List { recent } => {
                let snapshots = services.switchboard.list_snapshots(recent).await?;
                if cli.json {
                    let rows: Vec<_> = snapshots
                        .iter()
                        .map(|s| {
                            serde_json::json!({
                                "id": s.id,
                                "reason": s.reason,
                                "created_by": s.created_by,
                                "created_at": s.created_at,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    for s in snapshots {
                        println!("{}  {}  {}  {}", s.id, s.created_at, s.created_by, s.reason);
                    }
                }
            }
        },

        Command::Rollback {
            snapshot_id,
            reason,
            confirm,
        } => {
            if !confirm {
                eprintln!("rollback requires --confirm");
                return Ok(ExitCode::from(1));
            }
            services
                .switchboard
                .rollback_to_snapshot(snapshot_id, &reason, &operator)
                .await?;
            println!("rolled back to snapshot {snapshot_id}");
        }

        Command::Scan {
            types,
            detailed,
            fail_on_findings,
            quarantine,
        } => {
            let kinds: Option<Vec<ScannerKind>> = if types.is_empty() {
                None
            } else {
                let parsed: Vec<ScannerKind> = types
                    .iter()
                    .filter_map(|t| {
                        let kind = ScannerKind::parse(t);
                        if kind.is_none() {
                            eprintln!("unknown scanner: {t}");
                        }
                        kind
                    })
                    .collect();
                Some(parsed)
            };

            let report = services.repair.scan_for_corruption(kinds.as_deref()).await;
            let repair_report = services.repair.create_repair_report(&report);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&repair_report)?);
            } else {
                println!("scan finished: {} issue(s) found", report.total_issues());
                for plan in &repair_report.plans {
                    println!(
                        "  {}: {} issue(s), policy {:?}, risk {:?}, est {}s",
                        plan.corruption_type,
                        plan.issue_count,
                        plan.policy,
                        plan.risk,
                        plan.estimated_duration_secs
                    );
                    if detailed {
                        for action in &plan.actions {
                            println!(
                                "    - {} {}#{}",
                                action.description, action.target_model, action.object_id
                            );
                        }
                    }
                }
                println!(
                    "execution blocked: {}; approval required: {}",
                    repair_report.execution_blocked, repair_report.approval_required
                );
            }

            if quarantine && !report.is_clean() {
                let quarantined = services
                    .repair
                    .quarantine_suspicious_data(&report, Confidence::High, &operator)
                    .await;
                println!("quarantined {quarantined} record(s)");
            }

            if fail_on_findings && !report.is_clean() {
                return Ok(ExitCode::from(1));
            }
        }

        Command::CleanupIdempotency {
            max_age_hours,
            batch_size,
            dry_run,
        } => {
            let summary = services
                .idempotency
                .cleanup(&CleanupOptions {
                    batch_size,
                    max_age: chrono::Duration::hours(max_age_hours),
                    dry_run,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if summary.dry_run {
                println!("dry run: {} record(s) would be removed", summary.removed);
            } else {
                println!(
                    "removed {} record(s) in {} batch(es)",
                    summary.removed, summary.batches
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
