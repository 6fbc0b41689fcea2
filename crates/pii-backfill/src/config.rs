//! Configuration loading and validation for the backfill CLI.
//!
//! All values are read from environment variables at startup. The process
//! exits before touching the database if the key material is missing or any
//! value is invalid.

use anyhow::{Context, Result};
use field_cipher::{derive_key, DerivedKey, KeyError};
use serde::Deserialize;

use crate::migrate::DEFAULT_BATCH_SIZE;

/// Validated backfill configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Application secret the field key is derived from.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Ready-made base64url field key. Wins over `secret_key` when both are set.
    #[serde(default)]
    pub field_encryption_key: Option<String>,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Records fetched per page unless `--batch-size` overrides it.
    #[serde(default = "default_migration_batch_size")]
    pub migration_batch_size: usize,

    /// Tracing log level (e.g. `"info"`, `"debug"`). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_path() -> String {
    "db.sqlite3".into()
}
fn default_migration_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no key source is set or a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::default())
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if non_blank(&self.field_encryption_key).is_none() && non_blank(&self.secret_key).is_none()
        {
            anyhow::bail!("one of FIELD_ENCRYPTION_KEY or SECRET_KEY is required");
        }
        if self.database_path.trim().is_empty() {
            anyhow::bail!("DATABASE_PATH must not be empty");
        }
        if self.migration_batch_size == 0 {
            anyhow::bail!("MIGRATION_BATCH_SIZE must be > 0");
        }
        Ok(())
    }

    /// The field key: `field_encryption_key` decoded, else derived from `secret_key`.
    ///
    /// The secret is used byte for byte; surrounding whitespace is part of it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the configured key is malformed or the secret is empty.
    pub fn key_material(&self) -> Result<DerivedKey, KeyError> {
        match non_blank(&self.field_encryption_key) {
            Some(encoded) => DerivedKey::from_encoded(encoded),
            None => derive_key(self.secret_key.as_deref().unwrap_or_default()),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// Secrets never reach the logs, even through `{:?}`.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("secret_key", &redact(&self.secret_key))
            .field("field_encryption_key", &redact(&self.field_encryption_key))
            .field("database_path", &self.database_path)
            .field("migration_batch_size", &self.migration_batch_size)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(map))
    }

    fn base() -> Config {
        Config {
            secret_key: Some("an-application-secret-of-some-length".into()),
            field_encryption_key: None,
            database_path: default_database_path(),
            migration_batch_size: default_migration_batch_size(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_database_path(), "db.sqlite3");
        assert_eq!(default_migration_batch_size(), 1000);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn loads_from_environment() {
        let c = Config::from_source(env(&[
            ("SECRET_KEY", "s3cret"),
            ("DATABASE_PATH", "/var/lib/app/app.sqlite3"),
            ("MIGRATION_BATCH_SIZE", "250"),
        ]))
        .unwrap();
        assert_eq!(c.secret_key.as_deref(), Some("s3cret"));
        assert_eq!(c.database_path, "/var/lib/app/app.sqlite3");
        assert_eq!(c.migration_batch_size, 250);
        assert_eq!(c.log_level, "info");
    }

    #[test]
    fn missing_key_material_is_rejected() {
        let err = Config::from_source(env(&[("DATABASE_PATH", "x.sqlite3")])).unwrap_err();
        assert!(format!("{err:#}").contains("SECRET_KEY"));

        let mut c = base();
        c.secret_key = Some("   ".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut c = base();
        c.migration_batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_accepts_valid_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn encoded_key_wins_over_secret() {
        let explicit = derive_key("some-other-secret").unwrap();
        let mut c = base();
        c.field_encryption_key = Some(explicit.encoded());
        assert_eq!(c.key_material().unwrap().encoded(), explicit.encoded());

        c.field_encryption_key = None;
        assert_eq!(
            c.key_material().unwrap().encoded(),
            derive_key("an-application-secret-of-some-length")
                .unwrap()
                .encoded()
        );
    }

    #[test]
    fn secret_is_not_trimmed_before_derivation() {
        let mut c = base();
        c.secret_key = Some(" padded-secret ".into());
        assert_eq!(
            c.key_material().unwrap().encoded(),
            derive_key(" padded-secret ").unwrap().encoded()
        );
        assert_ne!(
            c.key_material().unwrap().encoded(),
            derive_key("padded-secret").unwrap().encoded()
        );
    }

    #[test]
    fn malformed_encoded_key_is_an_error() {
        let mut c = base();
        c.field_encryption_key = Some("not base64 at all!".into());
        assert!(matches!(c.key_material(), Err(KeyError::InvalidEncodedKey)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let out = format!("{:?}", base());
        assert!(!out.contains("an-application-secret"));
        assert!(out.contains("<redacted>"));
    }
}
