//! Encryption self-check run by `pii-backfill verify`.
//!
//! Confirms the configured key can seal and open values, and that a token
//! written to the database reads back byte for byte and decrypts. The store
//! check runs against a scratch table that is rolled back afterwards.

use common::error::{EXIT_FAILURE, EXIT_OK};
use field_cipher::{anonymize_email, open_message, seal_message, FieldCipher, ProtectedField};
use serde::Serialize;
use tracing::{error, info};

use crate::store::{FieldChange, FieldValue, Model, RecordId, RowStore};

/// Sample value sealed by every check. Only its masked form is reported.
const SAMPLE_EMAIL: &str = "encryption.check@example.com";

/// Row the store check writes to.
const SCRATCH_ID: RecordId = 1;

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Outcome of every check, printed as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn exit_code(&self) -> u8 {
        if self.passed() {
            EXIT_OK
        } else {
            EXIT_FAILURE
        }
    }
}

/// Run every check. A failing check does not stop the ones after it.
///
/// `scratch` must have an `id` primary key, a text `value` column and a row
/// with id 1; anything written there is expected to be thrown away.
pub fn run_checks<S: RowStore + ?Sized>(
    store: &S,
    scratch: &Model,
    cipher: &FieldCipher,
) -> VerifyReport {
    let checks = vec![
        check("cipher-round-trip", cipher_round_trip(cipher)),
        check("envelope-round-trip", envelope_round_trip(cipher)),
        check("store-round-trip", store_round_trip(store, scratch, cipher)),
    ];
    VerifyReport { checks }
}

fn check(name: &'static str, outcome: Result<(), String>) -> CheckResult {
    match outcome {
        Ok(()) => {
            info!(check = name, "check passed");
            CheckResult {
                name,
                passed: true,
                detail: format!("{} sealed and opened", anonymize_email(SAMPLE_EMAIL)),
            }
        }
        Err(detail) => {
            error!(check = name, error = %detail, "check failed");
            CheckResult {
                name,
                passed: false,
                detail,
            }
        }
    }
}

fn cipher_round_trip(cipher: &FieldCipher) -> Result<(), String> {
    let first = cipher.encrypt_str(SAMPLE_EMAIL).map_err(|e| e.to_string())?;
    let second = cipher.encrypt_str(SAMPLE_EMAIL).map_err(|e| e.to_string())?;
    if first == second {
        return Err("two encryptions of the same value produced the same token".into());
    }
    if !cipher.is_encrypted(&first) {
        return Err("a fresh token is not recognised as encrypted".into());
    }
    match cipher.try_decrypt(&first) {
        Ok(plaintext) if plaintext == SAMPLE_EMAIL => Ok(()),
        Ok(_) => Err("token decrypted to a different value".into()),
        Err(reason) => Err(format!("fresh token did not decrypt: {reason}")),
    }
}

fn envelope_round_trip(cipher: &FieldCipher) -> Result<(), String> {
    let sealed = seal_message(cipher, SAMPLE_EMAIL).map_err(|e| e.to_string())?;
    match open_message(cipher, &sealed.body, &sealed.wrapped_key) {
        Ok(plaintext) if plaintext == SAMPLE_EMAIL => Ok(()),
        Ok(_) => Err("message opened to a different value".into()),
        Err(reason) => Err(format!("sealed message did not open: {reason}")),
    }
}

fn store_round_trip<S: RowStore + ?Sized>(
    store: &S,
    scratch: &Model,
    cipher: &FieldCipher,
) -> Result<(), String> {
    let field = ProtectedField::new("value");
    let token = field
        .seal(cipher, Some(SAMPLE_EMAIL))
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    store
        .save(scratch, SCRATCH_ID, &[FieldChange::new(field.name(), token.as_str())])
        .map_err(|e| format!("write failed: {e}"))?;
    let page = store
        .fetch_page(scratch, &[field.name().to_owned()], None, 1)
        .map_err(|e| format!("read back failed: {e}"))?;

    let stored = match page.first().map(|r| r.get(field.name())) {
        Some(FieldValue::Text(stored)) => stored,
        _ => return Err("stored value did not read back as text".into()),
    };
    if *stored != token {
        return Err(format!(
            "stored token changed on the way through the database ({} of {} bytes kept)",
            stored.len(),
            token.len()
        ));
    }
    match field.open(cipher, Some(stored.as_str())) {
        Some(plaintext) if plaintext == SAMPLE_EMAIL => Ok(()),
        _ => Err("stored token did not decrypt to the sample value".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::testing::cipher;
    use crate::store::{MockRowStore, Record, SqliteStore, StoreError};

    fn by_name<'r>(report: &'r VerifyReport, name: &str) -> &'r CheckResult {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no check named {name}"))
    }

    #[test]
    fn all_checks_pass_against_sqlite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let c = cipher();
        let report = store
            .with_scratch_table(|s, scratch| Ok(run_checks(s, scratch, &c)))
            .unwrap();

        assert!(report.passed(), "{report:?}");
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.checks.len(), 3);
        for check in &report.checks {
            assert!(!check.detail.contains(SAMPLE_EMAIL));
            assert!(check.detail.starts_with("e**************k@example.com"));
        }
    }

    #[test]
    fn failed_write_fails_only_the_store_check() {
        let mut store = MockRowStore::new();
        store
            .expect_save()
            .returning(|_, _, _| Err(StoreError::InvalidIdentifier("scratch".into())));
        store.expect_fetch_page().never();

        let report = run_checks(&store, &Model::new("scratch", "id"), &cipher());

        assert!(!report.passed());
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert!(by_name(&report, "cipher-round-trip").passed);
        assert!(by_name(&report, "envelope-round-trip").passed);
        let stored = by_name(&report, "store-round-trip");
        assert!(!stored.passed);
        assert!(stored.detail.starts_with("write failed"));
    }

    #[test]
    fn truncated_token_is_reported() {
        let mut store = MockRowStore::new();
        store.expect_save().returning(|_, _, _| Ok(()));
        store.expect_fetch_page().returning(|_, _, _, _| {
            Ok(vec![Record::new(SCRATCH_ID).with_text("value", "gQAAAAAAAAAA")])
        });

        let report = run_checks(&store, &Model::new("scratch", "id"), &cipher());

        let stored = by_name(&report, "store-round-trip");
        assert!(!stored.passed);
        assert!(stored.detail.contains("12 of"), "{}", stored.detail);
    }

    #[test]
    fn missing_row_is_reported() {
        let mut store = MockRowStore::new();
        store.expect_save().returning(|_, _, _| Ok(()));
        store.expect_fetch_page().returning(|_, _, _, _| Ok(vec![]));

        let report = run_checks(&store, &Model::new("scratch", "id"), &cipher());
        assert!(!by_name(&report, "store-round-trip").passed);
    }

    #[test]
    fn report_serialises_check_names() {
        let report = VerifyReport {
            checks: vec![CheckResult {
                name: "cipher-round-trip",
                passed: true,
                detail: "ok".into(),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"][0]["name"], "cipher-round-trip");
        assert_eq!(json["checks"][0]["passed"], true);
    }
}
