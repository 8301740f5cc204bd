/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The local store adapter: a typed wrapper around the SQLite database.
//!
//! No domain logic lives here. Values are always bound as parameters; table
//! and column names are interpolated only after validation by the schema
//! catalog. Access is serialized by a single mutex around the connection, so
//! embedder writes and the sync worker never interleave mid-statement. Remote
//! I/O must happen off that mutex; callers get owned snapshots back.

use crate::error::{Error, Result};
use crate::schema::{Schema, Table, RECORD_ID_COLUMN, TIMESTAMP_COLUMN};
use crate::types::{Timestamp, Value};
use parking_lot::Mutex;
use rusqlite::{named_params, Connection, OpenFlags};
use sqlite_support::open_database::{self, ConnectionInitializer};
use sqlite_support::ConnExt;
use std::path::Path;

pub struct LocalStore {
    conn: Mutex<Connection>,
}

struct RecordInitializer<'a>(&'a Schema);

impl ConnectionInitializer for RecordInitializer<'_> {
    const NAME: &'static str = "record storage db";

    fn prepare(&self, conn: &Connection) -> open_database::Result<()> {
        let initial_pragmas = "
            -- We don't care about temp tables being persisted to disk.
            PRAGMA temp_store = 2;
            -- we unconditionally want write-ahead-logging mode.
            PRAGMA journal_mode=WAL;
        ";
        conn.execute_batch(initial_pragmas)?;
        conn.set_prepared_statement_cache_capacity(128);
        Ok(())
    }

    fn init(&self, conn: &Connection) -> open_database::Result<()> {
        log::debug!("Creating schemas");
        let stmts = self.0.create_statements();
        let refs: Vec<&str> = stmts.iter().map(String::as_str).collect();
        conn.execute_all(&refs)?;
        Ok(())
    }
}

impl LocalStore {
    /// Open or create the file-backed database and make sure every declared
    /// table (plus the journal) exists.
    pub fn open(db_path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE;
        let conn =
            open_database::open_database_with_flags(db_path, flags, &RecordInitializer(schema))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(schema: &Schema) -> Result<Self> {
        let conn = open_database::open_memory_database(&RecordInitializer(schema))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn check_column(table: &Table, column: &str) -> Result<()> {
        if table.has_column(column) {
            Ok(())
        } else {
            Err(Error::SchemaInvalid(format!(
                "no column {:?} in table {:?}",
                column, table.name
            )))
        }
    }

    /// Insert the row if it doesn't exist, then set one column and the
    /// timestamp. Atomic within the statement.
    pub fn upsert_scalar(
        &self,
        table: &Table,
        id: &str,
        column: &str,
        value: &Value,
        now: Timestamp,
    ) -> Result<()> {
        Self::check_column(table, column)?;
        let sql = format!(
            "INSERT INTO \"{t}\" (\"{id_col}\", \"{col}\", \"{ts_col}\") \
             VALUES (:id, :value, :ts) \
             ON CONFLICT(\"{id_col}\") DO UPDATE SET \
             \"{col}\" = excluded.\"{col}\", \"{ts_col}\" = excluded.\"{ts_col}\"",
            t = table.name,
            id_col = RECORD_ID_COLUMN,
            col = column,
            ts_col = TIMESTAMP_COLUMN,
        );
        let conn = self.conn.lock();
        conn.execute_cached(
            &sql,
            named_params! { ":id": id, ":value": value, ":ts": now },
        )?;
        Ok(())
    }

    /// Binary flavor of [`upsert_scalar`]; bytes are bound, never inlined.
    pub fn upsert_binary(
        &self,
        table: &Table,
        id: &str,
        column: &str,
        bytes: &[u8],
        now: Timestamp,
    ) -> Result<()> {
        self.upsert_scalar(table, id, column, &Value::Binary(bytes.to_vec()), now)
    }

    /// Set one column without touching the timestamp. Used when a sidecar
    /// lands for a record whose timestamp already reflects the remote
    /// envelope.
    pub fn bind_binary(&self, table: &Table, id: &str, column: &str, bytes: &[u8]) -> Result<()> {
        Self::check_column(table, column)?;
        let sql = format!(
            "INSERT INTO \"{t}\" (\"{id_col}\", \"{col}\") VALUES (:id, :value) \
             ON CONFLICT(\"{id_col}\") DO UPDATE SET \"{col}\" = excluded.\"{col}\"",
            t = table.name,
            id_col = RECORD_ID_COLUMN,
            col = column,
        );
        let conn = self.conn.lock();
        conn.execute_cached(
            &sql,
            named_params! { ":id": id, ":value": Value::Binary(bytes.to_vec()) },
        )?;
        Ok(())
    }

    /// Apply a full staged update in one transaction: make sure the row
    /// exists, set every scalar column, and stamp the given timestamp.
    pub fn upsert_record(
        &self,
        table: &Table,
        id: &str,
        scalars: &[(String, Value)],
        ts: Timestamp,
    ) -> Result<()> {
        for (column, _) in scalars {
            Self::check_column(table, column)?;
        }
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let insert = format!(
            "INSERT INTO \"{t}\" (\"{id_col}\", \"{ts_col}\") VALUES (:id, :ts) \
             ON CONFLICT(\"{id_col}\") DO UPDATE SET \"{ts_col}\" = excluded.\"{ts_col}\"",
            t = table.name,
            id_col = RECORD_ID_COLUMN,
            ts_col = TIMESTAMP_COLUMN,
        );
        tx.execute_cached(&insert, named_params! { ":id": id, ":ts": ts })?;
        for (column, value) in scalars {
            let update = format!(
                "UPDATE \"{t}\" SET \"{col}\" = :value WHERE \"{id_col}\" = :id",
                t = table.name,
                col = column,
                id_col = RECORD_ID_COLUMN,
            );
            tx.execute_cached(&update, named_params! { ":id": id, ":value": value })?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Unconditionally overwrite the timestamp for one row.
    pub fn set_timestamp(&self, table: &Table, id: &str, ts: Timestamp) -> Result<()> {
        let sql = format!(
            "UPDATE \"{t}\" SET \"{ts_col}\" = :ts WHERE \"{id_col}\" = :id",
            t = table.name,
            ts_col = TIMESTAMP_COLUMN,
            id_col = RECORD_ID_COLUMN,
        );
        let conn = self.conn.lock();
        conn.execute_cached(&sql, named_params! { ":id": id, ":ts": ts })?;
        Ok(())
    }

    pub fn delete(&self, table: &Table, id: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM \"{t}\" WHERE \"{id_col}\" = :id",
            t = table.name,
            id_col = RECORD_ID_COLUMN,
        );
        let conn = self.conn.lock();
        conn.execute_cached(&sql, named_params! { ":id": id })?;
        Ok(())
    }

    /// A full snapshot of one row as (column, value) pairs, including the
    /// reserved columns, or `None` if no such row exists. Values are owned
    /// copies, so the caller can hold them across remote I/O.
    pub fn query_record(&self, table: &Table, id: &str) -> Result<Option<Vec<(String, Value)>>> {
        let sql = format!(
            "SELECT * FROM \"{t}\" WHERE \"{id_col}\" = :id",
            t = table.name,
            id_col = RECORD_ID_COLUMN,
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(named_params! { ":id": id })?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => {
                let mut out = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    out.push((name.clone(), Value::from(row.get_ref(i)?)));
                }
                Ok(Some(out))
            }
        }
    }

    pub fn query_timestamp(&self, table: &Table, id: &str) -> Result<Option<Timestamp>> {
        let sql = format!(
            "SELECT \"{ts_col}\" FROM \"{t}\" WHERE \"{id_col}\" = :id",
            ts_col = TIMESTAMP_COLUMN,
            t = table.name,
            id_col = RECORD_ID_COLUMN,
        );
        let conn = self.conn.lock();
        // A row whose timestamp was never set reads as 0, which correctly
        // loses every timestamp comparison.
        let ts: Option<Option<Timestamp>> =
            conn.try_query_one(&sql, named_params! { ":id": id })?;
        Ok(ts.map(|t| t.unwrap_or_default()))
    }

    /// Run embedder SQL, handing each row to `f` as (column, value) pairs.
    pub fn for_each_row(
        &self,
        sql: &str,
        f: &mut dyn FnMut(&[(String, Value)]),
    ) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut cols = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                cols.push((name.clone(), Value::from(row.get_ref(i)?)));
            }
            f(&cols);
        }
        Ok(())
    }

    /// First column of the first row, rendered as text.
    pub fn query_string(&self, sql: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        Ok(match rows.next()? {
            None => None,
            Some(row) => match Value::from(row.get_ref(0)?) {
                Value::Null => None,
                Value::Text(s) => Some(s),
                Value::Integer(i) => Some(i.to_string()),
                Value::Float(f) => Some(f.to_string()),
                Value::Binary(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            },
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}
