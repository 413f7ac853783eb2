pub mod accounting_gateway;
pub mod audit_service;
pub mod idempotency_service;
pub mod movement_service;
pub mod period_close_service;
pub mod quarantine_service;
pub mod refund_service;
pub mod repair_policy;
pub mod repair_service;
pub mod reversal_service;
pub mod signal_router;
pub mod source_linkage_service;
pub mod switchboard;
