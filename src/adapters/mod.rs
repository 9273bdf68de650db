// Adapters layer: concrete implementations for the engine's external collaborators.

pub mod catalog;
pub mod enrollment_store;

pub use catalog::InMemoryCatalog;
pub use enrollment_store::{FileEnrollmentStore, InMemoryEnrollmentStore};
