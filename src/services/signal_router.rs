//! Governed dispatch for domain events
//!
//! Domain modules emit save/delete events; the router forwards each to the
//! handlers registered for that model, wrapped in governance: the handler's
//! workflow flag is checked first, and handler errors are either absorbed
//! into audit + quarantine or propagated, per the handler's policy.
//!
//! Handlers with persistent side effects derive their own idempotency keys
//! and call the gateways; the router itself stays stateless.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

use crate::repos::quarantine_repo::Confidence;
use crate::services::audit_service::AuditService;
use crate::services::quarantine_service::{QuarantineService, QuarantineSubmission};
use crate::services::switchboard::Switchboard;

const SERVICE_NAME: &str = "SignalRouter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Saved,
    Deleted,
}

/// A domain event as delivered to the router
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub module: String,
    pub model: String,
    pub object_id: i64,
    pub kind: EventKind,
    pub payload: JsonValue,
}

/// Error surfaced by an inner handler
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::services::accounting_gateway::GatewayError> for HandlerError {
    fn from(err: crate::services::accounting_gateway::GatewayError) -> Self {
        Self(err.to_string())
    }
}

impl From<crate::services::movement_service::MovementError> for HandlerError {
    fn from(err: crate::services::movement_service::MovementError) -> Self {
        Self(err.to_string())
    }
}

/// The work a governed handler performs
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

/// How the router treats one handler
#[derive(Debug, Clone)]
pub struct HandlerPolicy {
    /// Workflow flag gating this handler.
    pub workflow: String,
    /// Critical handlers propagate their errors to the dispatcher; others
    /// are absorbed into audit + quarantine.
    pub critical: bool,
}

/// A registered handler plus its routing criteria and policy
pub struct HandlerRegistration {
    pub name: String,
    pub module: String,
    pub model: String,
    /// None matches both saved and deleted events.
    pub kind: Option<EventKind>,
    pub policy: HandlerPolicy,
    pub handler: Arc<dyn SignalHandler>,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Critical handler '{name}' failed: {message}")]
    CriticalHandlerFailed { name: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What one dispatch call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub matched: usize,
    pub executed: usize,
    pub skipped_disabled: usize,
    pub absorbed_errors: usize,
}

pub struct SignalRouter {
    switchboard: Arc<Switchboard>,
    audit: Arc<AuditService>,
    quarantine: Arc<QuarantineService>,
    handlers: Vec<HandlerRegistration>,
}

impl SignalRouter {
    pub fn new(
        switchboard: Arc<Switchboard>,
        audit: Arc<AuditService>,
        quarantine: Arc<QuarantineService>,
    ) -> Self {
        Self {
            switchboard,
            audit,
            quarantine,
            handlers: Vec::new(),
        }
    }

    /// Register a handler; registration is data-driven and happens at
    /// startup, before the router is shared
    pub fn register(&mut self, registration: HandlerRegistration) {
        tracing::debug!(
            handler = %registration.name,
            module = %registration.module,
            model = %registration.model,
            workflow = %registration.policy.workflow,
            "signal handler registered"
        );
        self.handlers.push(registration);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Route one domain event through every matching governed handler
    pub async fn dispatch(&self, event: &DomainEvent) -> Result<DispatchSummary, SignalError> {
        let mut summary = DispatchSummary::default();

        for registration in &self.handlers {
            if registration.module != event.module || registration.model != event.model {
                continue;
            }
            if let Some(kind) = registration.kind {
                if kind != event.kind {
                    continue;
                }
            }
            summary.matched += 1;

            if !self.switchboard.is_workflow_enabled(&registration.policy.workflow) {
                tracing::debug!(
                    handler = %registration.name,
                    workflow = %registration.policy.workflow,
                    "handler skipped: workflow disabled"
                );
                summary.skipped_disabled += 1;
                continue;
            }

            match registration.handler.handle(event).await {
                Ok(()) => summary.executed += 1,
                Err(err) => {
                    self.record_handler_failure(registration, event, &err).await?;

                    if registration.policy.critical {
                        return Err(SignalError::CriticalHandlerFailed {
                            name: registration.name.clone(),
                            message: err.to_string(),
                        });
                    }

                    self.quarantine_trigger(registration, event, &err).await;
                    summary.absorbed_errors += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn record_handler_failure(
        &self,
        registration: &HandlerRegistration,
        event: &DomainEvent,
        err: &HandlerError,
    ) -> Result<(), SignalError> {
        self.audit
            .record_operation(
                &event.model,
                &event.object_id.to_string(),
                "SIGNAL_HANDLER_FAILED",
                "system",
                SERVICE_NAME,
                None,
                Some(json!({
                    "handler": registration.name,
                    "workflow": registration.policy.workflow,
                    "critical": registration.policy.critical,
                    "error": err.to_string(),
                })),
            )
            .await?;

        tracing::error!(
            handler = %registration.name,
            model = %event.model,
            object_id = event.object_id,
            error = %err,
            "signal handler failed"
        );

        Ok(())
    }

    async fn quarantine_trigger(
        &self,
        registration: &HandlerRegistration,
        event: &DomainEvent,
        err: &HandlerError,
    ) {
        let submission = QuarantineSubmission {
            model_name: event.model.clone(),
            object_id: event.object_id.to_string(),
            corruption_type: "SIGNAL_HANDLER_FAILURE".to_string(),
            confidence: Confidence::Medium,
            reason: format!("Handler '{}' failed: {}", registration.name, err),
            evidence: json!({
                "handler": registration.name,
                "workflow": registration.policy.workflow,
                "module": event.module,
            }),
            original_data: Some(event.payload.clone()),
        };

        if let Err(quarantine_err) = self.quarantine.quarantine(submission, "system").await {
            tracing::error!(
                handler = %registration.name,
                error = %quarantine_err,
                "failed to quarantine signal trigger"
            );
        }
    }
}
