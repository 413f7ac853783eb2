pub mod config;
pub mod db;
pub mod repos;
pub mod services;
pub mod validation;

pub use config::GovernanceConfig;
pub use services::accounting_gateway::AccountingGateway;
pub use services::switchboard::Switchboard;
