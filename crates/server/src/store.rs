//! SQLite-backed record store.
//!
//! The store materialises the field registry as one table: every persisted
//! field becomes a column, every `indexed` field gets a secondary index,
//! and `(shard_group, sequence_id)` carries the unique compound index that
//! makes concurrent appends safe. The `id` primary key is the store's
//! intrinsic record identifier and the query tie-breaker.
//!
//! The connection is guarded by a mutex held for the duration of a single
//! store operation only, never across an await point; concurrent appenders
//! therefore interleave between the head lookup and the insert, which is
//! exactly the window the append pipeline's retry loop is built for.

use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use slogger_core::schema::{FieldKind, FieldSpec};
use slogger_core::{Error, FieldValue, LogRecord, Schema};

/// A translated, parameterised predicate ready for the store. Column
/// identifiers come only from the registry; every user value is bound.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub predicate: String,
    pub params: Vec<rusqlite::types::Value>,
}

impl StoreQuery {
    /// Predicate matching every record.
    pub fn match_all() -> Self {
        StoreQuery {
            predicate: "1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Chain head projection: the two fields the append pipeline links from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHead {
    pub sequence_id: i64,
    pub hash: String,
}

/// Outcome of an insert attempt. A duplicate sequence is not an error:
/// it is the optimistic-append retry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateSequence,
}

pub struct Store {
    conn: Mutex<Connection>,
    table: String,
    column_list: String,
    insert_sql: String,
}

impl Store {
    pub fn open(path: &str, table: &str) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(Error::storage)?;
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, Error> {
        let columns: Vec<&str> = Schema::global()
            .persisted_fields()
            .map(|f| f.storage_name)
            .collect();
        let column_list = columns.join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})");
        let store = Store {
            conn: Mutex::new(conn),
            table: table.to_string(),
            column_list,
            insert_sql,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create the record table and the registry-driven indexes.
    fn ensure_schema(&self) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        let schema = Schema::global();

        let columns: Vec<String> = schema
            .persisted_fields()
            .map(|f| format!("{} {}", f.storage_name, column_type(f)))
            .collect();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
            self.table,
            columns.join(", ")
        ))
        .map_err(Error::storage)?;

        for field in schema.persisted_fields() {
            if !field.indexed() {
                continue;
            }
            let sql = if field.storage_name == "sequence_id" {
                // The compound unique index: no two records may share a
                // sequence within a shard.
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_{}_shard_sequence ON {} (shard_group, sequence_id)",
                    self.table, self.table
                )
            } else {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                    self.table, field.storage_name, self.table, field.storage_name
                )
            };
            conn.execute_batch(&sql).map_err(Error::storage)?;
        }
        Ok(())
    }

    /// Insert one record, reporting a unique-index collision as
    /// [`InsertOutcome::DuplicateSequence`] rather than an error.
    pub fn insert(&self, record: &LogRecord) -> Result<InsertOutcome, Error> {
        let values: Vec<rusqlite::types::Value> = Schema::global()
            .persisted_fields()
            .map(|f| sql_value(record, f))
            .collect();

        let conn = self.conn.lock().unwrap();
        match conn.execute(&self.insert_sql, params_from_iter(values.iter())) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(InsertOutcome::DuplicateSequence)
            }
            Err(e) => Err(Error::storage(e)),
        }
    }

    /// The record with the highest sequence in the shard, projected to
    /// the two fields the appender needs. `None` means the shard is
    /// empty.
    pub fn chain_head(&self, shard_group: i32) -> Result<Option<ChainHead>, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT sequence_id, hash FROM {} WHERE shard_group = ?1 ORDER BY sequence_id DESC LIMIT 1",
            self.table
        );
        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_row(params![shard_group], |row| {
                    Ok(ChainHead {
                        sequence_id: row.get(0)?,
                        hash: row.get(1)?,
                    })
                })
                .optional()
            })
            .map_err(Error::storage)
    }

    /// Sorted, optionally limited iteration. The callback's return value
    /// reports whether the record was delivered downstream; a false stops
    /// the scan. Returns `(delivered, finished)` where `finished` is true
    /// when the iteration ran to its natural end.
    pub fn select(
        &self,
        query: &StoreQuery,
        order_by: &str,
        limit: i64,
        f: &mut dyn FnMut(LogRecord) -> bool,
    ) -> Result<(usize, bool), Error> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            self.column_list, self.table, query.predicate, order_by
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(Error::storage)?;
        let mut rows = stmt
            .query(params_from_iter(query.params.iter()))
            .map_err(Error::storage)?;

        let mut delivered = 0usize;
        while let Some(row) = rows.next().map_err(Error::storage)? {
            let record = record_from_row(row).map_err(Error::storage)?;
            if !f(record) {
                return Ok((delivered, false));
            }
            delivered += 1;
        }
        Ok((delivered, true))
    }

    /// Total number of stored records matching a predicate.
    pub fn count(&self, query: &StoreQuery) -> Result<i64, Error> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table, query.predicate
        );
        conn.prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_row(params_from_iter(query.params.iter()), |row| row.get(0))
            })
            .map_err(Error::storage)
    }
}

fn column_type(field: &FieldSpec) -> &'static str {
    match field.kind {
        FieldKind::Text => "TEXT NOT NULL DEFAULT ''",
        FieldKind::Integer | FieldKind::Boolean => "INTEGER NOT NULL DEFAULT 0",
        // Millisecond Unix timestamps; 0 means unset.
        FieldKind::Timestamp => "INTEGER NOT NULL DEFAULT 0",
    }
}

fn sql_value(record: &LogRecord, field: &FieldSpec) -> rusqlite::types::Value {
    match record.field(field.storage_name) {
        Some(FieldValue::Text(s)) => rusqlite::types::Value::Text(s.to_owned()),
        Some(FieldValue::Int(v)) => rusqlite::types::Value::Integer(v),
        Some(FieldValue::Time(t)) => {
            rusqlite::types::Value::Integer(t.map(|t| t.timestamp_millis()).unwrap_or(0))
        }
        Some(FieldValue::Bool(b)) => rusqlite::types::Value::Integer(b.into()),
        None => rusqlite::types::Value::Null,
    }
}

fn record_from_row(row: &Row<'_>) -> Result<LogRecord, rusqlite::Error> {
    let mut record = LogRecord::default();
    for (i, field) in Schema::global().persisted_fields().enumerate() {
        match field.kind {
            FieldKind::Text => {
                let v: String = row.get(i)?;
                record.set_field(field.storage_name, FieldValue::Text(&v));
            }
            FieldKind::Integer => {
                let v: i64 = row.get(i)?;
                record.set_field(field.storage_name, FieldValue::Int(v));
            }
            FieldKind::Timestamp => {
                let v: i64 = row.get(i)?;
                let t = (v != 0)
                    .then(|| chrono::DateTime::from_timestamp_millis(v))
                    .flatten();
                record.set_field(field.storage_name, FieldValue::Time(t));
            }
            FieldKind::Boolean => {
                let v: i64 = row.get(i)?;
                record.set_field(field.storage_name, FieldValue::Bool(v != 0));
            }
        }
    }
    Ok(record)
}
