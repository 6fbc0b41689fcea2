//! Command-line surface of `pii-backfill`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use field_cipher::ProtectedField;

use crate::migrate::sidecar::{LookupMapping, SidecarMapping};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Encrypt existing PII columns in place, roll them back, copy them to a sidecar table, or check the encryption setup"
)]
pub struct Cli {
    /// SQLite database file. Overrides DATABASE_PATH.
    #[arg(long, value_name = "PATH", global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encrypt plaintext values of the given fields in place.
    Encrypt(InPlaceArgs),
    /// Decrypt encrypted values of the given fields back to plaintext (rollback).
    Decrypt(InPlaceArgs),
    /// Copy fields into an encrypted sidecar table, optionally redacting the source.
    CopyToSidecar(SidecarArgs),
    /// Check the key and round-trip a token through the database. Nothing is kept.
    Verify,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Encrypt(_) => "encrypt",
            Command::Decrypt(_) => "decrypt",
            Command::CopyToSidecar(_) => "copy-to-sidecar",
            Command::Verify => "verify",
        }
    }

    /// The table whose records are walked; `None` for `verify`.
    pub fn table(&self) -> Option<&str> {
        match self {
            Command::Encrypt(a) | Command::Decrypt(a) => Some(&a.table),
            Command::CopyToSidecar(a) => Some(&a.source_table),
            Command::Verify => None,
        }
    }

    pub fn run_args(&self) -> Option<&RunArgs> {
        match self {
            Command::Encrypt(a) | Command::Decrypt(a) => Some(&a.run),
            Command::CopyToSidecar(a) => Some(&a.run),
            Command::Verify => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InPlaceArgs {
    #[arg(long, value_name = "TABLE")]
    pub table: String,

    #[arg(long, value_name = "COLUMN", default_value = "id")]
    pub id_column: String,

    /// Protected fields, comma separated, each `name` or `name:width`.
    #[arg(
        long,
        value_name = "FIELD[:WIDTH]",
        value_delimiter = ',',
        required = true,
        value_parser = parse_field
    )]
    pub fields: Vec<ProtectedField>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SidecarArgs {
    #[arg(long, value_name = "TABLE")]
    pub source_table: String,

    #[arg(long, value_name = "COLUMN", default_value = "id")]
    pub source_id_column: String,

    #[arg(long, value_name = "TABLE")]
    pub target_table: String,

    #[arg(long, value_name = "COLUMN", default_value = "id")]
    pub target_id_column: String,

    /// Target column holding the source record's primary key.
    #[arg(long, value_name = "COLUMN")]
    pub link_column: String,

    /// Field copies, comma separated, each `source=target` or `source=target:width`.
    #[arg(
        long = "map",
        value_name = "SRC=DST[:WIDTH]",
        value_delimiter = ',',
        required = true,
        value_parser = parse_mapping
    )]
    pub mappings: Vec<SidecarMapping>,

    /// Lookup-hash columns, comma separated, each `source=target`.
    #[arg(
        long = "hash",
        value_name = "SRC=DST",
        value_delimiter = ',',
        value_parser = parse_lookup
    )]
    pub hashes: Vec<LookupMapping>,

    /// Blank the mapped source fields once the sidecar row is confirmed.
    #[arg(long)]
    pub redact_source: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Classify and count everything, write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Records per page. Overrides MIGRATION_BATCH_SIZE.
    #[arg(long, value_name = "N", value_parser = parse_batch_size)]
    pub batch_size: Option<usize>,
}

fn parse_field(s: &str) -> Result<ProtectedField, String> {
    let (name, width) = match s.split_once(':') {
        Some((name, width)) => (name, Some(parse_width(width)?)),
        None => (s, None),
    };
    let name = non_empty(name, "field name")?;
    Ok(match width {
        Some(w) => ProtectedField::new(name).with_max_length(w),
        None => ProtectedField::new(name),
    })
}

fn parse_mapping(s: &str) -> Result<SidecarMapping, String> {
    let (source, target) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SRC=DST[:WIDTH], got {s:?}"))?;
    Ok(SidecarMapping {
        source: non_empty(source, "source field")?.to_owned(),
        target: parse_field(target)?,
    })
}

fn parse_lookup(s: &str) -> Result<LookupMapping, String> {
    let (source, target) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SRC=DST, got {s:?}"))?;
    Ok(LookupMapping {
        source: non_empty(source, "source field")?.to_owned(),
        target: non_empty(target, "hash column")?.to_owned(),
    })
}

fn parse_batch_size(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("batch size must be > 0".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid batch size {s:?}: {e}")),
    }
}

fn parse_width(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("column width must be > 0".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid column width {s:?}: {e}")),
    }
}

fn non_empty<'s>(s: &'s str, what: &str) -> Result<&'s str, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{what} must not be empty"));
    }
    Ok(s)
}
