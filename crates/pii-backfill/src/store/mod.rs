//! Row store abstraction consumed by the backfill.
//!
//! The backfill needs four capabilities from storage and nothing else: read a
//! page of records ordered by primary key, look one record up by a key column,
//! rewrite fields of one record in a single write, and upsert a related row.

pub mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use thiserror::Error;

/// Primary-key type of every table the backfill touches.
pub type RecordId = i64;

/// Errors produced by a row store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A table or column name is not a plain identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A write was expected to touch exactly one row.
    #[error("record {id} not found in {table}")]
    NotFound { table: String, id: RecordId },

    /// The underlying database returned an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A stored field value as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    /// A value that is not text (blob, number, non-UTF-8 bytes). Protected
    /// columns must be text, so this is always a per-record error.
    Unsupported(&'static str),
}

/// One row: its primary key and the requested fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.fields
            .insert(name.to_owned(), FieldValue::Text(value.to_owned()));
        self
    }

    /// The value of `name`; a field that was not fetched reads as `Null`.
    pub fn get(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }
}

/// A table and its primary-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub table: String,
    pub id_column: String,
}

impl Model {
    pub fn new(table: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
        }
    }
}

/// A new value for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub value: String,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Storage operations the backfill depends on.
#[cfg_attr(test, mockall::automock)]
pub trait RowStore {
    /// Up to `limit` records with primary key greater than `after` (or from
    /// the start when `None`), ordered by primary key, with `fields` loaded.
    fn fetch_page(
        &self,
        model: &Model,
        fields: &[String],
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// The first record whose `key_column` equals `key`, with `fields` loaded.
    fn find_by(
        &self,
        model: &Model,
        key_column: &str,
        key: RecordId,
        fields: &[String],
    ) -> Result<Option<Record>, StoreError>;

    /// Rewrite `changes` on record `id` in a single write.
    fn save(&self, model: &Model, id: RecordId, changes: &[FieldChange]) -> Result<(), StoreError>;

    /// Update the row whose `key_column` equals `key`, inserting it first if
    /// it does not exist. All of `changes` land together or not at all.
    fn upsert(
        &self,
        model: &Model,
        key_column: &str,
        key: RecordId,
        changes: &[FieldChange],
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_reads_as_null() {
        let record = Record::new(7).with_text("email", "a@b.c");
        assert_eq!(record.get("email"), &FieldValue::Text("a@b.c".into()));
        assert_eq!(record.get("first_name"), &FieldValue::Null);
    }
}
