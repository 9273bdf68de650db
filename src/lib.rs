pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{FileEnrollmentStore, InMemoryCatalog, InMemoryEnrollmentStore};
pub use config::toml_config::EngineConfig;
pub use crate::core::{
    admission::AdmissionCoordinator, schedule_index::InMemoryScheduleIndex,
    seat_ledger::InMemorySeatLedger,
};
pub use utils::error::{EnrollError, ErrorCategory, Result};
