//! Copy protected fields into a related sidecar table, optionally redacting
//! the source once the copy is confirmed.

use common::{BackfillError, MigrationSummary, Operation, RecordTally};
use field_cipher::{LookupHasher, ProtectedField};

use super::classify::{classify, FieldState};
use super::{ensure_distinct, Backfill, RecordError};
use crate::store::{FieldChange, FieldValue, Model, Record, RecordId, RowStore};

/// Copy source field `source` into the encrypted target field `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarMapping {
    pub source: String,
    pub target: ProtectedField,
}

/// Fill lookup-hash column `target` from the plaintext of source field `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupMapping {
    pub source: String,
    pub target: String,
}

/// Everything a sidecar copy needs to know about both tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPlan {
    pub source: Model,
    pub target: Model,
    /// Column of the target table holding the source record's primary key.
    pub link_column: String,
    pub fields: Vec<SidecarMapping>,
    pub hashes: Vec<LookupMapping>,
    /// Blank the mapped source fields after the target is confirmed.
    pub redact_source: bool,
}

impl SidecarPlan {
    fn source_fields(&self) -> Vec<String> {
        let names = self
            .fields
            .iter()
            .map(|m| m.source.as_str())
            .chain(self.hashes.iter().map(|h| h.source.as_str()));
        dedup(names)
    }

    fn target_fields(&self) -> Vec<String> {
        let names = self
            .fields
            .iter()
            .map(|m| m.target.name())
            .chain(self.hashes.iter().map(|h| h.target.as_str()));
        dedup(names)
    }
}

/// `name` of `row`; a missing row reads as all-`Null`.
fn value_in<'r>(row: Option<&'r Record>, name: &str) -> &'r FieldValue {
    row.map_or(&FieldValue::Null, |r| r.get(name))
}

fn dedup<'n>(names: impl Iterator<Item = &'n str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_owned());
        }
    }
    out
}

impl<'a, S: RowStore + ?Sized> Backfill<'a, S> {
    /// Copy the mapped fields of every source record into its sidecar row.
    ///
    /// The sidecar row is found through `plan.link_column` and created when
    /// missing. A target field that already decrypts is left alone, so the
    /// copy can be re-run. With `redact_source`, the source is blanked only
    /// after the sidecar row reads back and decrypts to the same plaintext.
    ///
    /// # Errors
    ///
    /// [`BackfillError::Configuration`] for a plan without mappings or with a
    /// target column named twice, otherwise only run-level failures; see [`Backfill`].
    pub fn copy_to_sidecar(
        &self,
        plan: &SidecarPlan,
        hasher: &LookupHasher,
    ) -> Result<MigrationSummary, BackfillError> {
        if plan.fields.is_empty() {
            return Err(BackfillError::Configuration(
                "copy-to-sidecar needs at least one field mapping".into(),
            ));
        }
        ensure_distinct(
            "target column",
            plan.fields
                .iter()
                .map(|m| m.target.name())
                .chain(plan.hashes.iter().map(|h| h.target.as_str())),
        )?;
        let source_fields = plan.source_fields();
        let target_fields = plan.target_fields();
        self.run_pages(
            Operation::CopyToSidecar,
            &plan.source,
            &source_fields,
            |record| self.copy_record(plan, hasher, &target_fields, record),
        )
    }

    fn copy_record(
        &self,
        plan: &SidecarPlan,
        hasher: &LookupHasher,
        target_fields: &[String],
        record: &Record,
    ) -> Result<RecordTally, RecordError> {
        let existing = self
            .store
            .find_by(&plan.target, &plan.link_column, record.id, target_fields)?;
        let existing = existing.as_ref();

        let mut tally = RecordTally::default();
        let mut changes = Vec::new();
        let mut copied = Vec::new();

        for mapping in &plan.fields {
            let Some(plaintext) = self.source_plaintext(record, &mapping.source)? else {
                tally.empty += 1;
                continue;
            };
            match value_in(existing, mapping.target.name()) {
                FieldValue::Text(t) if !t.is_empty() && self.cipher.is_encrypted(t) => {
                    tally.already_encrypted += 1;
                }
                _ => {
                    let token = mapping
                        .target
                        .seal(self.cipher, Some(plaintext.as_str()))?
                        .unwrap_or_default();
                    changes.push(FieldChange::new(mapping.target.name(), token));
                    tally.newly_encrypted += 1;
                }
            }
            copied.push((mapping, plaintext));
        }

        for lookup in &plan.hashes {
            let Some(plaintext) = self.source_plaintext(record, &lookup.source)? else {
                continue;
            };
            let digest = hasher.hash(&plaintext);
            if !matches!(value_in(existing, &lookup.target), FieldValue::Text(h) if *h == digest) {
                changes.push(FieldChange::new(lookup.target.as_str(), digest));
            }
        }

        if !self.options.dry_run && !changes.is_empty() {
            self.store
                .upsert(&plan.target, &plan.link_column, record.id, &changes)?;
        }

        if plan.redact_source && !copied.is_empty() {
            let blanks: Vec<FieldChange> = dedup(copied.iter().map(|(m, _)| m.source.as_str()))
                .into_iter()
                .map(|field| FieldChange::new(field, ""))
                .collect();
            if !self.options.dry_run {
                self.confirm(plan, record.id, &copied)?;
                self.store.save(&plan.source, record.id, &blanks)?;
            }
            tally.redacted += blanks.len() as u64;
        }
        Ok(tally)
    }

    /// The plaintext of a source field, decrypting it first if it was already
    /// encrypted in place. `None` when the field is empty.
    fn source_plaintext(&self, record: &Record, field: &str) -> Result<Option<String>, RecordError> {
        Ok(match classify(self.cipher, field, record.get(field))? {
            FieldState::Empty => None,
            FieldState::Encrypted { plaintext } => Some(plaintext),
            FieldState::Plaintext(text) => Some(text.to_owned()),
        })
    }

    /// Re-read the sidecar row and check every copied field decrypts to its source.
    fn confirm(
        &self,
        plan: &SidecarPlan,
        id: RecordId,
        copied: &[(&SidecarMapping, String)],
    ) -> Result<(), RecordError> {
        let names: Vec<String> = copied
            .iter()
            .map(|(m, _)| m.target.name().to_owned())
            .collect();
        let row = self
            .store
            .find_by(&plan.target, &plan.link_column, id, &names)?;

        for (mapping, plaintext) in copied {
            let confirmed = match value_in(row.as_ref(), mapping.target.name()) {
                FieldValue::Text(stored) => {
                    self.cipher.try_decrypt(stored).ok().as_deref() == Some(plaintext.as_str())
                }
                _ => false,
            };
            if !confirmed {
                return Err(RecordError::Unconfirmed {
                    field: mapping.target.name().to_owned(),
                });
            }
        }
        Ok(())
    }
}
