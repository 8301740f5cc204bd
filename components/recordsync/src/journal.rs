/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The dirty-tracking journal: a reserved side table recording, per
//! identifier, the most recent local mutation still awaiting replication.
//!
//! Writes upsert, so the journal holds at most one entry per identifier and
//! that entry always describes what the remote side should do next. The sync
//! worker removes an entry only after the corresponding remote operation
//! (envelope upload or tombstone move) has been confirmed.

use crate::error::Result;
use crate::schema::{JOURNAL_TABLE, RECORD_ID_COLUMN, TIMESTAMP_COLUMN};
use crate::storage::LocalStore;
use crate::types::Timestamp;
use rusqlite::named_params;
use sqlite_support::ConnExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub table: String,
    pub id: String,
    pub timestamp: Timestamp,
    pub deleted: bool,
}

impl LocalStore {
    /// Record that `id` diverged from the last known remote state. Repeated
    /// calls overwrite the entry's table, timestamp and deletion flag.
    pub fn mark_dirty(
        &self,
        table: &str,
        id: &str,
        now: Timestamp,
        deleted: bool,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {j} (tablename, \"{id_col}\", \"{ts_col}\", local, deleted) \
             VALUES (:table, :id, :ts, 1, :deleted) \
             ON CONFLICT(\"{id_col}\") DO UPDATE SET \
             tablename = excluded.tablename, \"{ts_col}\" = excluded.\"{ts_col}\", \
             local = excluded.local, deleted = excluded.deleted",
            j = JOURNAL_TABLE,
            id_col = RECORD_ID_COLUMN,
            ts_col = TIMESTAMP_COLUMN,
        );
        self.with_conn(|conn| {
            conn.execute_cached(
                &sql,
                named_params! { ":table": table, ":id": id, ":ts": now, ":deleted": deleted },
            )?;
            Ok(())
        })
    }

    /// Snapshot every pending entry. The caller iterates the owned list so
    /// remote I/O happens off the store mutex, and removes each entry with
    /// [`forget`] once reconciled.
    pub fn journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let sql = format!(
            "SELECT tablename, \"{id_col}\", \"{ts_col}\", deleted FROM {j}",
            id_col = RECORD_ID_COLUMN,
            ts_col = TIMESTAMP_COLUMN,
            j = JOURNAL_TABLE,
        );
        self.with_conn(|conn| {
            conn.query_rows_and_then(&sql, [], |row| {
                Ok(JournalEntry {
                    table: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    timestamp: row.get::<_, Option<Timestamp>>(2)?.unwrap_or_default(),
                    deleted: row.get::<_, Option<bool>>(3)?.unwrap_or_default(),
                })
            })
        })
    }

    /// Drop the journal entry for `id`, if any.
    pub fn forget(&self, id: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {j} WHERE \"{id_col}\" = :id",
            j = JOURNAL_TABLE,
            id_col = RECORD_ID_COLUMN,
        );
        self.with_conn(|conn| {
            conn.execute_cached(&sql, named_params! { ":id": id })?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, Table};

    fn store() -> LocalStore {
        let schema = Schema::new(vec![Table::builder("pers").text("name").build().unwrap()])
            .unwrap();
        LocalStore::open_in_memory(&schema).unwrap()
    }

    #[test]
    fn test_mark_dirty_upserts() {
        let store = store();
        store.mark_dirty("pers", "u-1", Timestamp(100), false).unwrap();
        store.mark_dirty("pers", "u-2", Timestamp(110), false).unwrap();
        // A later write to the same id overwrites timestamp and flag.
        store.mark_dirty("pers", "u-1", Timestamp(200), true).unwrap();

        let mut entries = store.journal_entries().unwrap();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            entries,
            vec![
                JournalEntry {
                    table: "pers".into(),
                    id: "u-1".into(),
                    timestamp: Timestamp(200),
                    deleted: true,
                },
                JournalEntry {
                    table: "pers".into(),
                    id: "u-2".into(),
                    timestamp: Timestamp(110),
                    deleted: false,
                },
            ]
        );
    }

    #[test]
    fn test_forget() {
        let store = store();
        store.mark_dirty("pers", "u-1", Timestamp(100), false).unwrap();
        store.forget("u-1").unwrap();
        assert!(store.journal_entries().unwrap().is_empty());
        // forgetting an unknown id is a no-op
        store.forget("u-1").unwrap();
    }
}
