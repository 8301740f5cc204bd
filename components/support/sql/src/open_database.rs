/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Open a SQLite database connection and make sure its schema exists.
//!
//! The initializer's `prepare` runs on every open (pragmas and the like);
//! `init` runs inside a transaction the first time the database is created.
//! There is deliberately no migration machinery here.

use crate::ConnExt;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Incompatible database version: {0}")]
    IncompatibleVersion(u32),
    #[error("Error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Hooks used to bring a freshly opened connection into a usable state.
pub trait ConnectionInitializer {
    /// Name to display in the logs.
    const NAME: &'static str;

    /// Runs on every open, before anything else. Pragmas, sql functions, and
    /// statement-cache sizing belong here.
    fn prepare(&self, conn: &Connection) -> Result<()>;

    /// Runs inside a transaction the first time the database is created.
    fn init(&self, conn: &Connection) -> Result<()>;
}

const SCHEMA_VERSION: u32 = 1;

pub fn open_database<CI: ConnectionInitializer>(
    path: impl AsRef<Path>,
    initializer: &CI,
) -> Result<Connection> {
    open_database_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
        initializer,
    )
}

pub fn open_database_with_flags<CI: ConnectionInitializer>(
    path: impl AsRef<Path>,
    flags: OpenFlags,
    initializer: &CI,
) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, flags)?;
    initialize_connection(conn, initializer)
}

/// Memory-backed variant, mostly useful in tests.
pub fn open_memory_database<CI: ConnectionInitializer>(initializer: &CI) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    initialize_connection(conn, initializer)
}

fn initialize_connection<CI: ConnectionInitializer>(
    conn: Connection,
    initializer: &CI,
) -> Result<Connection> {
    log::debug!("{}: opening database", CI::NAME);
    initializer.prepare(&conn)?;
    let version: u32 = conn.try_query_one("PRAGMA user_version", [])?.unwrap_or(0);
    match version {
        0 => {
            log::debug!("{}: initializing new database", CI::NAME);
            let tx = conn.unchecked_transaction()?;
            initializer.init(&tx)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
        }
        SCHEMA_VERSION => (),
        other => return Err(Error::IncompatibleVersion(other)),
    }
    log::debug!("{}: database open successful", CI::NAME);
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestInitializer;

    impl ConnectionInitializer for TestInitializer {
        const NAME: &'static str = "test db";

        fn prepare(&self, conn: &Connection) -> Result<()> {
            conn.execute_batch("PRAGMA temp_store = 2;")?;
            Ok(())
        }

        fn init(&self, conn: &Connection) -> Result<()> {
            conn.execute_batch("CREATE TABLE test_table (col TEXT)")?;
            Ok(())
        }
    }

    #[test]
    fn test_init_new_database() {
        let conn = open_memory_database(&TestInitializer).unwrap();
        conn.execute("INSERT INTO test_table (col) VALUES ('a')", [])
            .unwrap();
        let version: u32 = conn.try_query_one("PRAGMA user_version", []).unwrap().unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let conn = open_database(&path, &TestInitializer).unwrap();
            conn.execute("INSERT INTO test_table (col) VALUES ('a')", [])
                .unwrap();
        }
        let conn = open_database(&path, &TestInitializer).unwrap();
        let count: i64 = conn
            .try_query_one("SELECT COUNT(*) FROM test_table", [])
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_version_too_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(
            open_database(&path, &TestInitializer),
            Err(Error::IncompatibleVersion(99))
        ));
    }
}
