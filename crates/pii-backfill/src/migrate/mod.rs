//! Backfill: walk stored records page by page and move protected fields
//! between plaintext and ciphertext.
//!
//! # Guarantees
//!
//! - **Idempotent.** A field that already decrypts under the current key is
//!   skipped, so re-running (or resuming after a crash) never double-encrypts.
//! - **Per-record atomic.** All changed fields of one record go to the store
//!   in one write.
//! - **Isolated failures.** An error on one record is logged, counted, and the
//!   run moves on.
//! - **Rehearsable.** With `dry_run` every decision is made and counted but
//!   the store is never written.
//! - **Interruptible.** Cancellation is checked between pages, never inside one.
//!
//! No PII is logged: records are identified by table and primary key only.

pub mod classify;
pub mod in_place;
pub mod sidecar;

use common::{BackfillError, MigrationSummary, Operation, RecordTally};
use field_cipher::{FieldCipher, FieldError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{Model, Record, RowStore, StoreError};

/// Default number of records fetched per page.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Why a single record could not be migrated.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A protected column holds something other than text.
    #[error("field {field} holds a {kind} value; protected columns must be text")]
    NotText { field: String, kind: &'static str },

    /// Sealing the value failed (cipher failure or column too narrow).
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Reading or writing the record failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The sidecar row did not read back as expected, so the source was not redacted.
    #[error("sidecar field {field} did not confirm; source left unredacted")]
    Unconfirmed { field: String },
}

/// Options shared by every backfill operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub batch_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// A configured backfill over one row store.
pub struct Backfill<'a, S: ?Sized> {
    store: &'a S,
    cipher: &'a FieldCipher,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<'a, S: RowStore + ?Sized> Backfill<'a, S> {
    pub fn new(store: &'a S, cipher: &'a FieldCipher, options: RunOptions) -> Self {
        Self {
            store,
            cipher,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between pages once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Page through `model` by primary key and hand each record to `handle`.
    ///
    /// A record whose handler fails is logged and counted; the loop carries on.
    ///
    /// # Errors
    ///
    /// Returns [`BackfillError::Configuration`] for a zero batch size and
    /// [`BackfillError::Storage`] if a page cannot be read.
    fn run_pages<F>(
        &self,
        operation: Operation,
        model: &Model,
        fields: &[String],
        mut handle: F,
    ) -> Result<MigrationSummary, BackfillError>
    where
        F: FnMut(&Record) -> Result<RecordTally, RecordError>,
    {
        if self.options.batch_size == 0 {
            return Err(BackfillError::Configuration(
                "batch size must be > 0".into(),
            ));
        }
        let mut summary = MigrationSummary::new(operation, self.options.dry_run);
        if self.options.dry_run {
            warn!(table = %model.table, "dry run: no changes will be written");
        }

        let mut after = None;
        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    table = %model.table,
                    processed = summary.processed,
                    "cancellation requested; stopping before next batch"
                );
                summary.interrupted = true;
                break;
            }

            let page = self
                .store
                .fetch_page(model, fields, after, self.options.batch_size)
                .map_err(|e| BackfillError::Storage(e.to_string()))?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            summary.batches += 1;

            for record in &page {
                match handle(record) {
                    Ok(tally) => {
                        if tally.changed() > 0 {
                            debug!(
                                table = %model.table,
                                record_id = record.id,
                                fields = tally.changed(),
                                "record migrated"
                            );
                        }
                        summary.record_ok(tally);
                    }
                    Err(e) => {
                        error!(
                            table = %model.table,
                            record_id = record.id,
                            error = %e,
                            "record failed; continuing"
                        );
                        summary.record_failed();
                    }
                }
            }

            info!(
                table = %model.table,
                batch = summary.batches,
                processed = summary.processed,
                errors = summary.errors,
                "batch complete"
            );

            if page.len() < self.options.batch_size {
                break;
            }
        }
        Ok(summary)
    }
}

/// Fail with a configuration error if any name in `names` repeats.
///
/// A repeated column would be encrypted twice in the same write.
fn ensure_distinct<'n>(
    what: &str,
    names: impl IntoIterator<Item = &'n str>,
) -> Result<(), BackfillError> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(BackfillError::Configuration(format!(
                "{what} {name:?} is listed more than once"
            )));
        }
    }
    Ok(())
}

/// Run a blocking job off the async runtime.
///
/// The current tracing span follows the job onto the blocking thread.
///
/// # Errors
///
/// Returns the job's own error, or [`BackfillError::Storage`] if the blocking
/// task panicked.
pub async fn run_blocking<F, T>(job: F) -> Result<T, BackfillError>
where
    F: FnOnce() -> Result<T, BackfillError> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(job))
        .await
        .map_err(|e| BackfillError::Storage(format!("backfill task failed: {e}")))?
}

#[cfg(test)]
pub(crate) mod testing {
    use field_cipher::{derive_key, FieldCipher};

    use crate::store::SqliteStore;

    pub fn cipher() -> FieldCipher {
        FieldCipher::new(&derive_key("backfill-test-secret-value-0123").unwrap()).unwrap()
    }

    pub fn users_store(rows: &[(i64, Option<&str>)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT, first_name TEXT);",
            )
            .unwrap();
        for (id, email) in rows {
            store
                .connection()
                .execute(
                    "INSERT INTO users (id, email, first_name) VALUES (?1, ?2, '')",
                    rusqlite::params![id, email],
                )
                .unwrap();
        }
        store
    }

    pub fn email_of(store: &SqliteStore, id: i64) -> Option<String> {
        store
            .connection()
            .query_row("SELECT email FROM users WHERE id = ?1", [id], |r| r.get(0))
            .unwrap()
    }
}
