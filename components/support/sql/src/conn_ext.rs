/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{self, types::FromSql, Connection, Params, Result as SqlResult, Row, Transaction};

/// Query conveniences shared by `rusqlite::Connection` and
/// `rusqlite::Transaction`. Import the trait to call these on either.
pub trait ConnExt {
    /// The method you need to implement to opt in to all of this.
    fn conn(&self) -> &Connection;

    /// Execute all the provided statements, without parameters.
    fn execute_all(&self, stmts: &[&str]) -> SqlResult<()> {
        let conn = self.conn();
        for sql in stmts {
            conn.execute(sql, [])?;
        }
        Ok(())
    }

    /// Execute a single statement through the prepared-statement cache.
    fn execute_cached<P: Params>(&self, sql: &str, params: P) -> SqlResult<usize> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        stmt.execute(params)
    }

    /// Execute a query returning a single value, or `None` if the query
    /// returns no rows.
    fn try_query_one<T: FromSql, P: Params>(&self, sql: &str, params: P) -> SqlResult<Option<T>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let mut rows = stmt.query(params)?;
        Ok(match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        })
    }

    /// Run a query, mapping each row through `mapper` and collecting the
    /// results. The mapper's error type only needs a `From<rusqlite::Error>`.
    fn query_rows_and_then<T, E, P, F>(&self, sql: &str, params: P, mapper: F) -> Result<Vec<T>, E>
    where
        P: Params,
        E: From<rusqlite::Error>,
        F: FnMut(&Row<'_>) -> Result<T, E>,
    {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let mut mapper = mapper;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(E::from)? {
            out.push(mapper(row)?);
        }
        Ok(out)
    }
}

impl ConnExt for Connection {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

impl ConnExt for Transaction<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}
