//! [`SqliteStore`]: [`RowStore`] over a SQLite database via `rusqlite`.
//!
//! Table and column names come from the operator, so they are validated as
//! plain identifiers and double-quoted; values are always bound parameters.

use std::path::Path;

use rusqlite::{
    params_from_iter,
    types::{Value, ValueRef},
    Connection, OptionalExtension, Row,
};

use super::{FieldChange, FieldValue, Model, Record, RecordId, RowStore, StoreError};

const SCRATCH_TABLE: &str = "pii_backfill_verify";

/// Row store backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    /// Run `f` against a throwaway table holding one empty row (id 1, column
    /// `value`), then roll everything back.
    ///
    /// Nothing `f` writes survives, so this is safe on a live database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the table cannot be created, or
    /// whatever `f` returns.
    pub fn with_scratch_table<T>(
        &self,
        f: impl FnOnce(&Self, &Model) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "CREATE TEMP TABLE IF NOT EXISTS {SCRATCH_TABLE} (id INTEGER PRIMARY KEY, value TEXT);
             INSERT OR REPLACE INTO {SCRATCH_TABLE} (id, value) VALUES (1, NULL);"
        ))?;
        let out = f(self, &Model::new(SCRATCH_TABLE, "id"));
        tx.rollback()?;
        out
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RowStore for SqliteStore {
    fn fetch_page(
        &self,
        model: &Model,
        fields: &[String],
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let id = quote(&model.id_column)?;
        let select = select_list(&id, fields)?;
        let table = quote(&model.table)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let (sql, params) = match after {
            Some(last) => (
                format!("SELECT {select} FROM {table} WHERE {id} > ?1 ORDER BY {id} LIMIT ?2"),
                vec![Value::Integer(last), Value::Integer(limit)],
            ),
            None => (
                format!("SELECT {select} FROM {table} ORDER BY {id} LIMIT ?1"),
                vec![Value::Integer(limit)],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| read_record(row, fields))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn find_by(
        &self,
        model: &Model,
        key_column: &str,
        key: RecordId,
        fields: &[String],
    ) -> Result<Option<Record>, StoreError> {
        let id = quote(&model.id_column)?;
        let select = select_list(&id, fields)?;
        let table = quote(&model.table)?;
        let key_column = quote(key_column)?;

        let sql = format!("SELECT {select} FROM {table} WHERE {key_column} = ?1 ORDER BY {id} LIMIT 1");
        let record = self
            .conn
            .query_row(&sql, [key], |row| read_record(row, fields))
            .optional()?;
        Ok(record)
    }

    fn save(&self, model: &Model, id: RecordId, changes: &[FieldChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let table = quote(&model.table)?;
        let id_column = quote(&model.id_column)?;
        let assignments = assignment_list(changes)?;

        let sql = format!("UPDATE {table} SET {assignments} WHERE {id_column} = ?");
        let mut params = change_values(changes);
        params.push(Value::Integer(id));

        let updated = self.conn.execute(&sql, params_from_iter(params))?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                table: model.table.clone(),
                id,
            });
        }
        Ok(())
    }

    fn upsert(
        &self,
        model: &Model,
        key_column: &str,
        key: RecordId,
        changes: &[FieldChange],
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let table = quote(&model.table)?;
        let key_ident = quote(key_column)?;

        let tx = self.conn.unchecked_transaction()?;
        let exists = tx
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE {key_ident} = ?1 LIMIT 1"),
                [key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let mut params = change_values(changes);
        if exists {
            let assignments = assignment_list(changes)?;
            params.push(Value::Integer(key));
            tx.execute(
                &format!("UPDATE {table} SET {assignments} WHERE {key_ident} = ?"),
                params_from_iter(params),
            )?;
        } else {
            let mut columns = vec![key_ident];
            for change in changes {
                columns.push(quote(&change.field)?);
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            params.insert(0, Value::Integer(key));
            tx.execute(
                &format!(
                    "INSERT INTO {table} ({}) VALUES ({placeholders})",
                    columns.join(", ")
                ),
                params_from_iter(params),
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Validate `name` as `[A-Za-z_][A-Za-z0-9_]*` and double-quote it.
fn quote(name: &str) -> Result<String, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(name.to_owned()));
    }
    Ok(format!("\"{name}\""))
}

fn select_list(id: &str, fields: &[String]) -> Result<String, StoreError> {
    let mut columns = vec![id.to_owned()];
    for field in fields {
        columns.push(quote(field)?);
    }
    Ok(columns.join(", "))
}

fn assignment_list(changes: &[FieldChange]) -> Result<String, StoreError> {
    let mut parts = Vec::with_capacity(changes.len());
    for change in changes {
        parts.push(format!("{} = ?", quote(&change.field)?));
    }
    Ok(parts.join(", "))
}

fn change_values(changes: &[FieldChange]) -> Vec<Value> {
    changes
        .iter()
        .map(|c| Value::Text(c.value.clone()))
        .collect()
}

fn read_record(row: &Row<'_>, fields: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new(row.get(0)?);
    for (i, name) in fields.iter().enumerate() {
        record
            .fields
            .insert(name.clone(), read_value(row.get_ref(i + 1)?));
    }
    Ok(record)
}

fn read_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => FieldValue::Text(s.to_owned()),
            Err(_) => FieldValue::Unsupported("non-UTF-8 text"),
        },
        ValueRef::Integer(_) => FieldValue::Unsupported("integer"),
        ValueRef::Real(_) => FieldValue::Unsupported("real"),
        ValueRef::Blob(_) => FieldValue::Unsupported("blob"),
    }
}
