//! Encrypt protected fields in place, and the opt-in reverse.

use common::{BackfillError, MigrationSummary, Operation, RecordTally};
use field_cipher::ProtectedField;

use super::classify::{classify, FieldState};
use super::{ensure_distinct, Backfill, RecordError};
use crate::store::{FieldChange, Model, Record, RowStore};

impl<'a, S: RowStore + ?Sized> Backfill<'a, S> {
    /// Encrypt every plaintext value of `fields` in `model`.
    ///
    /// Empty values and values that already decrypt are left alone.
    ///
    /// # Errors
    ///
    /// Only run-level failures, including a field listed twice; see [`Backfill`].
    pub fn encrypt_in_place(
        &self,
        model: &Model,
        fields: &[ProtectedField],
    ) -> Result<MigrationSummary, BackfillError> {
        ensure_distinct("field", fields.iter().map(ProtectedField::name))?;
        let names = field_names(fields);
        self.run_pages(Operation::Encrypt, model, &names, |record| {
            self.encrypt_record(model, fields, record)
        })
    }

    /// Decrypt every encrypted value of `fields` in `model` back to plaintext.
    ///
    /// For rollback windows only; values that are already plaintext are left alone.
    ///
    /// # Errors
    ///
    /// Only run-level failures, including a field listed twice; see [`Backfill`].
    pub fn decrypt_in_place(
        &self,
        model: &Model,
        fields: &[ProtectedField],
    ) -> Result<MigrationSummary, BackfillError> {
        ensure_distinct("field", fields.iter().map(ProtectedField::name))?;
        let names = field_names(fields);
        self.run_pages(Operation::Decrypt, model, &names, |record| {
            self.decrypt_record(model, fields, record)
        })
    }

    fn encrypt_record(
        &self,
        model: &Model,
        fields: &[ProtectedField],
        record: &Record,
    ) -> Result<RecordTally, RecordError> {
        let mut tally = RecordTally::default();
        let mut changes = Vec::new();
        for field in fields {
            match classify(self.cipher, field.name(), record.get(field.name()))? {
                FieldState::Empty => tally.empty += 1,
                FieldState::Encrypted { .. } => tally.already_encrypted += 1,
                FieldState::Plaintext(text) => {
                    let token = field.seal(self.cipher, Some(text))?.unwrap_or_default();
                    changes.push(FieldChange::new(field.name(), token));
                    tally.newly_encrypted += 1;
                }
            }
        }
        self.persist(model, record, &changes)?;
        Ok(tally)
    }

    fn decrypt_record(
        &self,
        model: &Model,
        fields: &[ProtectedField],
        record: &Record,
    ) -> Result<RecordTally, RecordError> {
        let mut tally = RecordTally::default();
        let mut changes = Vec::new();
        for field in fields {
            match classify(self.cipher, field.name(), record.get(field.name()))? {
                FieldState::Empty => tally.empty += 1,
                FieldState::Plaintext(_) => tally.already_plaintext += 1,
                FieldState::Encrypted { plaintext } => {
                    changes.push(FieldChange::new(field.name(), plaintext));
                    tally.decrypted += 1;
                }
            }
        }
        self.persist(model, record, &changes)?;
        Ok(tally)
    }

    fn persist(
        &self,
        model: &Model,
        record: &Record,
        changes: &[FieldChange],
    ) -> Result<(), RecordError> {
        if changes.is_empty() || self.options.dry_run {
            return Ok(());
        }
        self.store.save(model, record.id, changes)?;
        Ok(())
    }
}

fn field_names(fields: &[ProtectedField]) -> Vec<String> {
    fields.iter().map(|f| f.name().to_owned()).collect()
}
