//! Backup engine for managed sites: full and incremental backups chained to
//! each other, point-in-time restore across the chain, and a real-time
//! scheduler that triggers incrementals.

pub mod api;
pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod registry;
pub mod services;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use api::BackupService;
pub use capabilities::{ChecksumReporter, ContentApplier, ContentCollector, RestoreStep, SiteCapabilities};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorBody, ErrorKind};
pub use events::EngineEvent;
pub use services::backup_orchestrator::BackupOutcome;
pub use services::realtime_scheduler::RealTimeScheduler;
pub use state::EngineState;
