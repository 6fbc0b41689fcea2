//! Operator-facing report types produced by a backfill run.
//!
//! The summary is printed as JSON when a run finishes and also emitted as
//! structured log fields. It never contains field values.

use serde::{Deserialize, Serialize};

use crate::error::{EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Which backfill operation produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Plaintext fields encrypted in place.
    Encrypt,
    /// Encrypted fields decrypted back to plaintext (rollback window).
    Decrypt,
    /// Plaintext copied and encrypted into a related sidecar table.
    CopyToSidecar,
}

// ---------------------------------------------------------------------------
// Per-record tally
// ---------------------------------------------------------------------------

/// Field-level counts for a single record.
///
/// A tally is only folded into the run summary once the record's write has
/// succeeded (or was skipped for a dry run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTally {
    pub newly_encrypted: u64,
    pub already_encrypted: u64,
    pub decrypted: u64,
    pub already_plaintext: u64,
    pub empty: u64,
    pub redacted: u64,
}

impl RecordTally {
    /// Number of fields this record would change on disk.
    pub fn changed(&self) -> u64 {
        self.newly_encrypted + self.decrypted + self.redacted
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Summary of one backfill run.
///
/// `processed` and `errors` count records. Every other counter counts fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub operation: Operation,
    pub dry_run: bool,
    pub processed: u64,
    pub newly_encrypted: u64,
    pub already_encrypted: u64,
    pub decrypted: u64,
    pub already_plaintext: u64,
    pub empty: u64,
    pub redacted: u64,
    pub errors: u64,
    pub batches: u64,
    /// `true` if the run stopped early because cancellation was requested.
    pub interrupted: bool,
}

impl MigrationSummary {
    /// Create an all-zero summary for `operation`.
    pub fn new(operation: Operation, dry_run: bool) -> Self {
        Self {
            operation,
            dry_run,
            processed: 0,
            newly_encrypted: 0,
            already_encrypted: 0,
            decrypted: 0,
            already_plaintext: 0,
            empty: 0,
            redacted: 0,
            errors: 0,
            batches: 0,
            interrupted: false,
        }
    }

    /// Fold a successfully handled record into the summary.
    pub fn record_ok(&mut self, tally: RecordTally) {
        self.processed += 1;
        self.newly_encrypted += tally.newly_encrypted;
        self.already_encrypted += tally.already_encrypted;
        self.decrypted += tally.decrypted;
        self.already_plaintext += tally.already_plaintext;
        self.empty += tally.empty;
        self.redacted += tally.redacted;
    }

    /// Count a record that failed. Its field counts are discarded.
    pub fn record_failed(&mut self) {
        self.processed += 1;
        self.errors += 1;
    }

    /// `true` when the run finished every record without a single error.
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && !self.interrupted
    }

    /// Process exit status for this run: interrupted wins over record errors.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.errors > 0 {
            EXIT_FAILURE
        } else {
            EXIT_OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ok_accumulates_field_counts() {
        let mut summary = MigrationSummary::new(Operation::Encrypt, false);
        summary.record_ok(RecordTally {
            newly_encrypted: 2,
            empty: 1,
            ..RecordTally::default()
        });
        summary.record_ok(RecordTally {
            already_encrypted: 3,
            ..RecordTally::default()
        });
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.newly_encrypted, 2);
        assert_eq!(summary.already_encrypted, 3);
        assert_eq!(summary.empty, 1);
        assert!(summary.is_clean());
    }

    #[test]
    fn failed_record_counts_as_processed_and_error() {
        let mut summary = MigrationSummary::new(Operation::Decrypt, true);
        summary.record_failed();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn interrupted_run_is_not_clean() {
        let mut summary = MigrationSummary::new(Operation::Encrypt, false);
        summary.interrupted = true;
        assert!(!summary.is_clean());
    }

    #[test]
    fn exit_code_reflects_outcome() {
        let mut summary = MigrationSummary::new(Operation::Encrypt, false);
        assert_eq!(summary.exit_code(), EXIT_OK);
        summary.record_failed();
        assert_eq!(summary.exit_code(), EXIT_FAILURE);
        summary.interrupted = true;
        assert_eq!(summary.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn changed_ignores_skipped_fields() {
        let tally = RecordTally {
            newly_encrypted: 1,
            already_encrypted: 4,
            empty: 2,
            redacted: 1,
            ..RecordTally::default()
        };
        assert_eq!(tally.changed(), 2);
    }

    #[test]
    fn summary_serialises_operation_in_kebab_case() {
        let summary = MigrationSummary::new(Operation::CopyToSidecar, false);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["operation"], "copy-to-sidecar");
        assert_eq!(json["errors"], 0);
    }
}
