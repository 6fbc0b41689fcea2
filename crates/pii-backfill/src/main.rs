//! `pii-backfill`: operator CLI for at-rest PII field encryption.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`Config`] from environment variables.
//! 3. Initialise structured logging.
//! 4. Build the field cipher and lookup hasher from the configured key.
//! 5. Open the SQLite store.
//! 6. Install the Ctrl-C handler: the first interrupt cancels the run between
//!    batches, a second one exits immediately.
//! 7. Run the command off the async runtime and print its report.

mod cli;
mod config;
mod migrate;
mod store;
mod telemetry;
mod verify;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use common::error::{EXIT_FAILURE, EXIT_INTERRUPTED};
use common::{BackfillError, MigrationSummary};
use field_cipher::{FieldCipher, LookupHasher};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use cli::{Cli, Command};
use config::Config;
use migrate::sidecar::SidecarPlan;
use migrate::{run_blocking, Backfill, RunOptions};
use store::{Model, SqliteStore};
use verify::VerifyReport;

/// What a command prints on stdout.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outcome {
    Backfill(MigrationSummary),
    Verify(VerifyReport),
}

impl Outcome {
    fn exit_code(&self) -> u8 {
        match self {
            Outcome::Backfill(summary) => summary.exit_code(),
            Outcome::Verify(report) => report.exit_code(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // -----------------------------------------------------------------------
    // 1. Command line
    // -----------------------------------------------------------------------
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging is not yet up; write to stderr directly.
            eprintln!("ERROR: configuration invalid: {e:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    // -----------------------------------------------------------------------
    // 3. Logging
    // -----------------------------------------------------------------------
    if let Err(e) = telemetry::init(&cfg.log_level) {
        eprintln!("ERROR: {e:#}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let span = tracing::info_span!(
        "backfill",
        run_id = %Uuid::new_v4(),
        command = cli.command.name(),
        table = cli.command.table(),
        dry_run = cli.command.run_args().map(|r| r.dry_run),
    );

    match run(cli, cfg).instrument(span).await {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "failed to render report"),
            }
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!(error = %e, "backfill aborted");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli, cfg: Config) -> Result<Outcome, BackfillError> {
    info!(version = env!("CARGO_PKG_VERSION"), "pii-backfill starting");

    // -----------------------------------------------------------------------
    // 4. Key material
    // -----------------------------------------------------------------------
    let key = cfg
        .key_material()
        .map_err(|e| BackfillError::Configuration(e.to_string()))?;
    let cipher = FieldCipher::new(&key).map_err(|e| BackfillError::Encryption(e.to_string()))?;
    let hasher = LookupHasher::new(&key);
    drop(key);

    // -----------------------------------------------------------------------
    // 5. Store
    // -----------------------------------------------------------------------
    let path = cli
        .database
        .unwrap_or_else(|| PathBuf::from(&cfg.database_path));
    let store = SqliteStore::open(&path).map_err(|e| {
        BackfillError::Storage(format!("cannot open {}: {e}", path.display()))
    })?;
    info!(database = %path.display(), "store opened");

    // -----------------------------------------------------------------------
    // 6. Cancellation
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(
        async move {
            if watch_interrupts(tokio::signal::ctrl_c, on_interrupt).await {
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
        }
        .in_current_span(),
    );

    // -----------------------------------------------------------------------
    // 7. Command
    // -----------------------------------------------------------------------
    let options = RunOptions {
        dry_run: cli.command.run_args().is_some_and(|r| r.dry_run),
        batch_size: cli
            .command
            .run_args()
            .and_then(|r| r.batch_size)
            .unwrap_or(cfg.migration_batch_size),
    };
    let command = cli.command;
    let outcome = run_blocking(move || {
        let backfill = Backfill::new(&store, &cipher, options).with_cancellation(cancel);
        execute(&backfill, &store, &cipher, &hasher, command)
    })
    .await?;

    match &outcome {
        Outcome::Backfill(summary) => info!(
            processed = summary.processed,
            newly_encrypted = summary.newly_encrypted,
            already_encrypted = summary.already_encrypted,
            decrypted = summary.decrypted,
            already_plaintext = summary.already_plaintext,
            empty = summary.empty,
            redacted = summary.redacted,
            errors = summary.errors,
            batches = summary.batches,
            interrupted = summary.interrupted,
            "backfill finished"
        ),
        Outcome::Verify(report) => info!(passed = report.passed(), "verification finished"),
    }
    Ok(outcome)
}

fn execute(
    backfill: &Backfill<'_, SqliteStore>,
    store: &SqliteStore,
    cipher: &FieldCipher,
    hasher: &LookupHasher,
    command: Command,
) -> Result<Outcome, BackfillError> {
    let summary = match command {
        Command::Encrypt(args) => {
            backfill.encrypt_in_place(&Model::new(args.table, args.id_column), &args.fields)?
        }
        Command::Decrypt(args) => {
            backfill.decrypt_in_place(&Model::new(args.table, args.id_column), &args.fields)?
        }
        Command::CopyToSidecar(args) => {
            let plan = SidecarPlan {
                source: Model::new(args.source_table, args.source_id_column),
                target: Model::new(args.target_table, args.target_id_column),
                link_column: args.link_column,
                fields: args.mappings,
                hashes: args.hashes,
                redact_source: args.redact_source,
            };
            backfill.copy_to_sidecar(&plan, hasher)?
        }
        Command::Verify => {
            let report = store
                .with_scratch_table(|s, scratch| Ok(verify::run_checks(s, scratch, cipher)))
                .map_err(|e| BackfillError::Storage(format!("verification table: {e}")))?;
            return Ok(Outcome::Verify(report));
        }
    };
    Ok(Outcome::Backfill(summary))
}

/// Cancel `cancel` on the first interrupt from `next_signal`; return `true`
/// on the second, meaning the caller should exit without waiting.
///
/// Returns `false` if the signal source fails.
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        warn!(error = %e, "cannot listen for interrupts");
        return false;
    }
    warn!("interrupt received; stopping after the current batch (interrupt again to exit now)");
    cancel.cancel();

    if next_signal().await.is_err() {
        return false;
    }
    warn!("second interrupt received; exiting without finishing the current batch");
    true
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::time::Duration;

    use super::*;

    type Signal = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

    /// Yields each scripted result in turn, then never fires again.
    fn signals(fired: Vec<io::Result<()>>) -> impl FnMut() -> Signal {
        let mut fired = fired.into_iter();
        move || -> Signal {
            match fired.next() {
                Some(result) => Box::pin(std::future::ready(result)),
                None => Box::pin(std::future::pending()),
            }
        }
    }

    #[tokio::test]
    async fn second_interrupt_asks_for_exit() {
        let cancel = CancellationToken::new();
        let exit = watch_interrupts(signals(vec![Ok(()), Ok(())]), cancel.clone()).await;
        assert!(exit);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn single_interrupt_only_cancels() {
        let cancel = CancellationToken::new();
        let watching = watch_interrupts(signals(vec![Ok(())]), cancel.clone());
        assert!(tokio::time::timeout(Duration::from_millis(50), watching)
            .await
            .is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn broken_signal_source_neither_cancels_nor_exits() {
        let cancel = CancellationToken::new();
        let failure = io::Error::new(io::ErrorKind::Other, "no signal handler");
        let exit = watch_interrupts(signals(vec![Err(failure)]), cancel.clone()).await;
        assert!(!exit);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn outcome_exit_code_follows_the_report() {
        let summary = MigrationSummary::new(common::Operation::Encrypt, false);
        assert_eq!(Outcome::Backfill(summary).exit_code(), 0);

        let failed = VerifyReport {
            checks: vec![verify::CheckResult {
                name: "store-round-trip",
                passed: false,
                detail: "write failed".into(),
            }],
        };
        assert_eq!(Outcome::Verify(failed).exit_code(), EXIT_FAILURE);
    }
}
