//! Run-level error taxonomy shared by the backfill tooling.

use thiserror::Error;

/// Exit status for a run that completed without errors.
pub const EXIT_OK: u8 = 0;
/// Exit status for a run with per-record errors or a fatal failure.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status for a run that stopped early on cancellation.
pub const EXIT_INTERRUPTED: u8 = 2;

/// Errors that stop a backfill run as a whole.
///
/// Per-record failures are never represented here; they are counted in the
/// run summary and the loop moves on. Variants map to process exit codes:
/// - [`BackfillError::Configuration`] → 1
/// - [`BackfillError::Storage`] → 1
/// - [`BackfillError::Encryption`] → 1
///
/// An interrupted run is not an error: it returns a summary with
/// `interrupted` set, and the binary exits with [`EXIT_INTERRUPTED`].
#[derive(Debug, Error)]
pub enum BackfillError {
    /// Missing or unusable key material, or an invalid option.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The row store could not be read; no further pages can be fetched.
    #[error("storage error: {0}")]
    Storage(String),

    /// The cipher could not be initialised.
    #[error("encryption failure: {0}")]
    Encryption(String),
}

impl BackfillError {
    /// Returns the process exit code that should be used for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BackfillError::Configuration(_) => EXIT_FAILURE,
            BackfillError::Storage(_) => EXIT_FAILURE,
            BackfillError::Encryption(_) => EXIT_FAILURE,
        }
    }
}
