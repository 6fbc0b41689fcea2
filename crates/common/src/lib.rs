//! Report types and run-level errors shared across the PII backfill crates.

pub mod error;
pub mod report;

pub use error::BackfillError;
pub use report::{MigrationSummary, Operation, RecordTally};
