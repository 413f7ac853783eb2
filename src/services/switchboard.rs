//! Governance switchboard
//!
//! Three orthogonal flag namespaces: components (capabilities), workflows
//! (end-to-end data-flow routes), and emergencies (kill switches). Flag
//! metadata lives in the startup registry; the mutable bits persist to the
//! database and are mirrored in a read-mostly in-memory map. Writers
//! serialise through the persistence path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::repos::switchboard_repo::{self, SnapshotRow};
use crate::services::audit_service::AuditService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A capability the system provides
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub critical: bool,
    pub risk_level: RiskLevel,
}

/// An end-to-end data-flow route
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub critical: bool,
    pub risk_level: RiskLevel,
    pub component_dependencies: &'static [&'static str],
    pub corruption_prevention: &'static [&'static str],
}

/// A global kill switch
///
/// An empty `covers_components` list means the emergency covers everything.
#[derive(Debug, Clone)]
pub struct EmergencySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub covers_components: &'static [&'static str],
}

pub const COMPONENT_ACCOUNTING_GATEWAY: &str = "accounting_gateway_enforcement";
pub const COMPONENT_MOVEMENT_SERVICE: &str = "movement_service_enforcement";
pub const COMPONENT_IDEMPOTENCY: &str = "idempotency_enforcement";
pub const COMPONENT_SOURCE_LINKAGE: &str = "source_linkage_enforcement";
pub const COMPONENT_AUDIT_TRAIL: &str = "audit_trail";

pub const EMERGENCY_DISABLE_ACCOUNTING: &str = "emergency_disable_accounting";
pub const EMERGENCY_DISABLE_MOVEMENTS: &str = "emergency_disable_movements";
pub const EMERGENCY_DISABLE_ALL: &str = "emergency_disable_all";

/// The platform's component registry
pub fn default_components() -> Vec<ComponentSpec> {
    vec![
        ComponentSpec {
            name: COMPONENT_ACCOUNTING_GATEWAY,
            description: "All journal entry writes go through the accounting gateway",
            default_enabled: false,
            critical: true,
            risk_level: RiskLevel::High,
        },
        ComponentSpec {
            name: COMPONENT_MOVEMENT_SERVICE,
            description: "All stock movements go through the movement service",
            default_enabled: false,
            critical: true,
            risk_level: RiskLevel::High,
        },
        ComponentSpec {
            name: COMPONENT_IDEMPOTENCY,
            description: "Side-effecting operations are deduplicated by key",
            default_enabled: false,
            critical: true,
            risk_level: RiskLevel::Medium,
        },
        ComponentSpec {
            name: COMPONENT_SOURCE_LINKAGE,
            description: "Journal entries must trace to a live business record",
            default_enabled: false,
            critical: true,
            risk_level: RiskLevel::Medium,
        },
        ComponentSpec {
            name: COMPONENT_AUDIT_TRAIL,
            description: "Governed operations are recorded in the audit trail",
            default_enabled: true,
            critical: true,
            risk_level: RiskLevel::Low,
        },
    ]
}

/// The platform's workflow registry
pub fn default_workflows() -> Vec<WorkflowSpec> {
    vec![
        WorkflowSpec {
            name: "student_fee_to_journal_entry",
            description: "StudentFee rows produce receivable/revenue entries",
            critical: true,
            risk_level: RiskLevel::High,
            component_dependencies: &[COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["ORPHANED_JOURNAL_ENTRIES", "UNBALANCED_JOURNAL_ENTRIES"],
        },
        WorkflowSpec {
            name: "fee_payment_to_journal_entry",
            description: "FeePayment rows produce cash/receivable entries",
            critical: true,
            risk_level: RiskLevel::High,
            component_dependencies: &[COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["ORPHANED_JOURNAL_ENTRIES", "UNBALANCED_JOURNAL_ENTRIES"],
        },
        WorkflowSpec {
            name: "stock_movement_to_journal_entry",
            description: "Stock movements produce inventory/COGS entries",
            critical: true,
            risk_level: RiskLevel::High,
            component_dependencies: &[COMPONENT_MOVEMENT_SERVICE, COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["NEGATIVE_STOCK", "ORPHANED_JOURNAL_ENTRIES"],
        },
        WorkflowSpec {
            name: "product_refund_to_journal_entry",
            description: "Product refunds restore stock and reverse sale revenue",
            critical: false,
            risk_level: RiskLevel::Medium,
            component_dependencies: &[COMPONENT_MOVEMENT_SERVICE, COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["ORPHANED_JOURNAL_ENTRIES", "UNBALANCED_JOURNAL_ENTRIES"],
        },
        WorkflowSpec {
            name: "purchase_to_journal_entry",
            description: "Purchase invoices produce inventory/payable entries",
            critical: false,
            risk_level: RiskLevel::Medium,
            component_dependencies: &[COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["ORPHANED_JOURNAL_ENTRIES"],
        },
        WorkflowSpec {
            name: "sale_to_journal_entry",
            description: "Sale invoices produce receivable/revenue entries",
            critical: false,
            risk_level: RiskLevel::Medium,
            component_dependencies: &[COMPONENT_ACCOUNTING_GATEWAY],
            corruption_prevention: &["ORPHANED_JOURNAL_ENTRIES"],
        },
    ]
}

/// The platform's emergency registry
pub fn default_emergencies() -> Vec<EmergencySpec> {
    vec![
        EmergencySpec {
            name: EMERGENCY_DISABLE_ACCOUNTING,
            description: "Stop all accounting gateway writes",
            covers_components: &[COMPONENT_ACCOUNTING_GATEWAY],
        },
        EmergencySpec {
            name: EMERGENCY_DISABLE_MOVEMENTS,
            description: "Stop all movement service writes",
            covers_components: &[COMPONENT_MOVEMENT_SERVICE],
        },
        EmergencySpec {
            name: EMERGENCY_DISABLE_ALL,
            description: "Stop every governed workflow",
            covers_components: &[],
        },
    ]
}

/// Mutable flag bits, serialised into snapshots
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchboardState {
    pub components: BTreeMap<String, bool>,
    pub workflows: BTreeMap<String, bool>,
    pub emergencies: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagNamespace {
    Component,
    Workflow,
    Emergency,
}

/// Why a workflow is (or is not) runnable right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Enabled,
    Disabled,
    DependencyDisabled(String),
    EmergencyDisabled(String),
    Unknown,
}

#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Unknown component flag: {0}")]
    UnknownComponent(String),

    #[error("Unknown workflow flag: {0}")]
    UnknownWorkflow(String),

    #[error("Unknown emergency flag: {0}")]
    UnknownEmergency(String),

    #[error("Workflow '{workflow}' requires disabled components: {missing:?}")]
    DependenciesNotMet {
        workflow: String,
        missing: Vec<String>,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Snapshot {id} failed integrity check")]
    SnapshotCorrupted { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GovernanceHealth {
    pub components_enabled: usize,
    pub components_total: usize,
    pub workflows_enabled: usize,
    pub workflows_total: usize,
    pub active_emergencies: Vec<String>,
    pub violation_counts: BTreeMap<String, u64>,
}

pub struct Switchboard {
    pool: SqlitePool,
    audit: Arc<AuditService>,
    components: Vec<ComponentSpec>,
    workflows: Vec<WorkflowSpec>,
    emergencies: Vec<EmergencySpec>,
    state: Arc<RwLock<SwitchboardState>>,
    violations: RwLock<BTreeMap<String, u64>>,
}

impl Switchboard {
    /// Build the switchboard from the default registries, loading persisted
    /// flag bits over registry defaults
    pub async fn new(pool: SqlitePool, audit: Arc<AuditService>) -> Result<Self, SwitchboardError> {
        let components = default_components();
        let workflows = default_workflows();
        let emergencies = default_emergencies();

        let mut state = SwitchboardState::default();
        for spec in &components {
            state
                .components
                .insert(spec.name.to_string(), spec.default_enabled);
        }
        for spec in &workflows {
            state.workflows.insert(spec.name.to_string(), false);
        }
        for spec in &emergencies {
            state.emergencies.insert(spec.name.to_string(), false);
        }

        for row in switchboard_repo::load_component_flags(&pool).await? {
            if state.components.contains_key(&row.name) {
                state.components.insert(row.name, row.enabled);
            } else {
                tracing::warn!(flag = %row.name, "ignoring persisted flag absent from registry");
            }
        }
        for row in switchboard_repo::load_workflow_flags(&pool).await? {
            if state.workflows.contains_key(&row.name) {
                state.workflows.insert(row.name, row.enabled);
            }
        }
        for row in switchboard_repo::load_emergency_flags(&pool).await? {
            if state.emergencies.contains_key(&row.name) {
                state.emergencies.insert(row.name, row.enabled);
            }
        }

        Ok(Self {
            pool,
            audit,
            components,
            workflows,
            emergencies,
            state: Arc::new(RwLock::new(state)),
            violations: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn component_spec(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn workflow_spec(&self, name: &str) -> Option<&WorkflowSpec> {
        self.workflows.iter().find(|w| w.name == name)
    }

    fn read_state(&self) -> SwitchboardState {
        self.state.read().expect("switchboard state lock poisoned").clone()
    }

    pub fn is_component_enabled(&self, name: &str) -> bool {
        self.state
            .read()
            .expect("switchboard state lock poisoned")
            .components
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// The active emergency covering a component, if any
    fn emergency_covering(&self, state: &SwitchboardState, component: &str) -> Option<String> {
        for spec in &self.emergencies {
            let active = state.emergencies.get(spec.name).copied().unwrap_or(false);
            if !active {
                continue;
            }
            if spec.covers_components.is_empty() || spec.covers_components.contains(&component) {
                return Some(spec.name.to_string());
            }
        }
        None
    }

    /// Full status for a workflow: flag, dependencies, emergencies
    pub fn workflow_status(&self, name: &str) -> WorkflowStatus {
        let Some(spec) = self.workflow_spec(name) else {
            return WorkflowStatus::Unknown;
        };

        let state = self.read_state();

        for dependency in spec.component_dependencies {
            if let Some(emergency) = self.emergency_covering(&state, dependency) {
                return WorkflowStatus::EmergencyDisabled(emergency);
            }
        }
        // A blanket emergency also covers workflows with no dependencies.
        if spec.component_dependencies.is_empty() {
            if let Some(emergency) = self.emergency_covering(&state, "") {
                return WorkflowStatus::EmergencyDisabled(emergency);
            }
        }

        if !state.workflows.get(name).copied().unwrap_or(false) {
            return WorkflowStatus::Disabled;
        }

        for dependency in spec.component_dependencies {
            if !state.components.get(*dependency).copied().unwrap_or(false) {
                return WorkflowStatus::DependencyDisabled(dependency.to_string());
            }
        }

        WorkflowStatus::Enabled
    }

    pub fn is_workflow_enabled(&self, name: &str) -> bool {
        self.workflow_status(name) == WorkflowStatus::Enabled
    }

    async fn persist_component(
        &self,
        name: &str,
        enabled: bool,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        let mut tx = self.pool.begin().await?;
        switchboard_repo::upsert_component_tx(&mut tx, name, enabled, user).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Enable a component capability
    pub async fn enable_component(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        self.set_component(name, true, reason, user).await
    }

    /// Disable a component capability
    pub async fn disable_component(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        self.set_component(name, false, reason, user).await
    }

    async fn set_component(
        &self,
        name: &str,
        enabled: bool,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        if self.component_spec(name).is_none() {
            return Err(SwitchboardError::UnknownComponent(name.to_string()));
        }

        let previous = {
            let mut state = self.state.write().expect("switchboard state lock poisoned");
            state.components.insert(name.to_string(), enabled)
        };

        self.persist_component(name, enabled, user).await?;

        let operation = if enabled { "COMPONENT_ENABLED" } else { "COMPONENT_DISABLED" };
        self.audit
            .record_operation(
                "ComponentFlag",
                name,
                operation,
                user,
                "Switchboard",
                previous.map(|p| serde_json::json!({ "enabled": p })),
                Some(serde_json::json!({ "enabled": enabled, "reason": reason })),
            )
            .await?;

        Ok(())
    }

    /// Enable a workflow; all its component dependencies must be enabled
    pub async fn enable_workflow(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        let spec = self
            .workflow_spec(name)
            .ok_or_else(|| SwitchboardError::UnknownWorkflow(name.to_string()))?;

        let missing: Vec<String> = {
            let state = self.state.read().expect("switchboard state lock poisoned");
            spec.component_dependencies
                .iter()
                .filter(|dep| !state.components.get(**dep).copied().unwrap_or(false))
                .map(|dep| dep.to_string())
                .collect()
        };

        if !missing.is_empty() {
            return Err(SwitchboardError::DependenciesNotMet {
                workflow: name.to_string(),
                missing,
            });
        }

        self.set_workflow(name, true, reason, user).await
    }

    /// Disable a workflow
    pub async fn disable_workflow(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        if self.workflow_spec(name).is_none() {
            return Err(SwitchboardError::UnknownWorkflow(name.to_string()));
        }
        self.set_workflow(name, false, reason, user).await
    }

    async fn set_workflow(
        &self,
        name: &str,
        enabled: bool,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        let previous = {
            let mut state = self.state.write().expect("switchboard state lock poisoned");
            state.workflows.insert(name.to_string(), enabled)
        };

        let mut tx = self.pool.begin().await?;
        switchboard_repo::upsert_workflow_tx(&mut tx, name, enabled, user).await?;
        tx.commit().await?;

        let operation = if enabled { "WORKFLOW_ENABLED" } else { "WORKFLOW_DISABLED" };
        self.audit
            .record_operation(
                "WorkflowFlag",
                name,
                operation,
                user,
                "Switchboard",
                previous.map(|p| serde_json::json!({ "enabled": p })),
                Some(serde_json::json!({ "enabled": enabled, "reason": reason })),
            )
            .await?;

        Ok(())
    }

    /// Pull a kill switch
    pub async fn activate_emergency(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        self.set_emergency(name, true, reason, user).await
    }

    /// Stand a kill switch down
    pub async fn deactivate_emergency(
        &self,
        name: &str,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        self.set_emergency(name, false, reason, user).await
    }

    async fn set_emergency(
        &self,
        name: &str,
        active: bool,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        if !self.emergencies.iter().any(|e| e.name == name) {
            return Err(SwitchboardError::UnknownEmergency(name.to_string()));
        }

        {
            let mut state = self.state.write().expect("switchboard state lock poisoned");
            state.emergencies.insert(name.to_string(), active);
        }

        let mut tx = self.pool.begin().await?;
        switchboard_repo::upsert_emergency_tx(&mut tx, name, active, user).await?;
        tx.commit().await?;

        let operation = if active { "EMERGENCY_ACTIVATED" } else { "EMERGENCY_DEACTIVATED" };
        self.audit
            .record_operation(
                "EmergencyFlag",
                name,
                operation,
                user,
                "Switchboard",
                None,
                Some(serde_json::json!({ "active": active, "reason": reason })),
            )
            .await?;

        if active {
            tracing::error!(emergency = %name, reason = %reason, "emergency flag activated");
        }

        Ok(())
    }

    fn state_hash(state_json: &str) -> String {
        format!("{:x}", Sha256::digest(state_json.as_bytes()))
    }

    /// Capture every flag's state into a persisted snapshot
    pub async fn create_snapshot(
        &self,
        reason: &str,
        user: &str,
    ) -> Result<Uuid, SwitchboardError> {
        let state = self.read_state();
        let state_json = serde_json::to_string(&state)?;
        let state_hash = Self::state_hash(&state_json);

        let snapshot_id =
            switchboard_repo::insert_snapshot(&self.pool, reason, user, &state_json, &state_hash)
                .await?;

        self.audit
            .record_operation(
                "SwitchboardSnapshot",
                &snapshot_id.to_string(),
                "SNAPSHOT_CREATED",
                user,
                "Switchboard",
                None,
                Some(serde_json::json!({ "reason": reason, "state_hash": state_hash })),
            )
            .await?;

        Ok(snapshot_id)
    }

    pub async fn list_snapshots(&self, limit: i64) -> Result<Vec<SnapshotRow>, SwitchboardError> {
        Ok(switchboard_repo::list_snapshots(&self.pool, limit).await?)
    }

    /// Atomically restore every flag to a snapshot's state
    pub async fn rollback_to_snapshot(
        &self,
        snapshot_id: Uuid,
        reason: &str,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        let snapshot = switchboard_repo::fetch_snapshot(&self.pool, snapshot_id)
            .await?
            .ok_or(SwitchboardError::SnapshotNotFound(snapshot_id))?;

        if Self::state_hash(&snapshot.state_json) != snapshot.state_hash {
            return Err(SwitchboardError::SnapshotCorrupted { id: snapshot_id });
        }

        let restored: SwitchboardState = serde_json::from_str(&snapshot.state_json)?;
        let previous = self.read_state();

        let mut tx = self.pool.begin().await?;
        for (name, enabled) in &restored.components {
            switchboard_repo::upsert_component_tx(&mut tx, name, *enabled, user).await?;
        }
        for (name, enabled) in &restored.workflows {
            switchboard_repo::upsert_workflow_tx(&mut tx, name, *enabled, user).await?;
        }
        for (name, active) in &restored.emergencies {
            switchboard_repo::upsert_emergency_tx(&mut tx, name, *active, user).await?;
        }
        tx.commit().await?;

        {
            let mut state = self.state.write().expect("switchboard state lock poisoned");
            *state = restored;
        }

        self.audit
            .record_operation(
                "SwitchboardSnapshot",
                &snapshot_id.to_string(),
                "SWITCHBOARD_ROLLBACK",
                user,
                "Switchboard",
                Some(serde_json::to_value(&previous)?),
                Some(serde_json::json!({ "reason": reason })),
            )
            .await?;

        tracing::warn!(snapshot_id = %snapshot_id, reason = %reason, "switchboard rolled back");

        Ok(())
    }

    /// Record a governance violation for health reporting
    pub async fn record_violation(
        &self,
        violation_type: &str,
        component: &str,
        details: Option<serde_json::Value>,
        user: &str,
    ) -> Result<(), SwitchboardError> {
        {
            let mut violations = self.violations.write().expect("violations lock poisoned");
            *violations.entry(violation_type.to_string()).or_insert(0) += 1;
        }

        self.audit
            .record_operation(
                "Governance",
                component,
                "GOVERNANCE_VIOLATION",
                user,
                "Switchboard",
                None,
                Some(serde_json::json!({
                    "violation_type": violation_type,
                    "details": details,
                })),
            )
            .await?;

        Ok(())
    }

    pub fn get_governance_health(&self) -> GovernanceHealth {
        let state = self.read_state();
        let violations = self.violations.read().expect("violations lock poisoned").clone();

        GovernanceHealth {
            components_enabled: state.components.values().filter(|v| **v).count(),
            components_total: state.components.len(),
            workflows_enabled: state.workflows.values().filter(|v| **v).count(),
            workflows_total: state.workflows.len(),
            active_emergencies: state
                .emergencies
                .iter()
                .filter(|(_, active)| **active)
                .map(|(name, _)| name.clone())
                .collect(),
            violation_counts: violations,
        }
    }

    /// Flip a flag in memory only, reverting when the guard drops
    ///
    /// Persisted state is untouched; the override exists for scoped test
    /// and maintenance windows and survives early returns and panics.
    pub fn temporary_override(
        &self,
        namespace: FlagNamespace,
        name: &str,
        value: bool,
    ) -> Result<OverrideGuard, SwitchboardError> {
        let mut state = self.state.write().expect("switchboard state lock poisoned");

        let map = match namespace {
            FlagNamespace::Component => &mut state.components,
            FlagNamespace::Workflow => &mut state.workflows,
            FlagNamespace::Emergency => &mut state.emergencies,
        };

        let previous = match map.get(name) {
            Some(v) => *v,
            None => {
                return Err(match namespace {
                    FlagNamespace::Component => {
                        SwitchboardError::UnknownComponent(name.to_string())
                    }
                    FlagNamespace::Workflow => SwitchboardError::UnknownWorkflow(name.to_string()),
                    FlagNamespace::Emergency => {
                        SwitchboardError::UnknownEmergency(name.to_string())
                    }
                })
            }
        };

        map.insert(name.to_string(), value);

        Ok(OverrideGuard {
            state: Arc::clone(&self.state),
            namespace,
            name: name.to_string(),
            previous,
        })
    }
}

/// Reverts a [`Switchboard::temporary_override`] on drop
pub struct OverrideGuard {
    state: Arc<RwLock<SwitchboardState>>,
    namespace: FlagNamespace,
    name: String,
    previous: bool,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.write() {
            let map = match self.namespace {
                FlagNamespace::Component => &mut state.components,
                FlagNamespace::Workflow => &mut state.workflows,
                FlagNamespace::Emergency => &mut state.emergencies,
            };
            map.insert(self.name.clone(), self.previous);
        }
    }
}
