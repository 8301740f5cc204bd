/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The user-declared schema catalog and the SQL it expands to.
//!
//! Every declared table implicitly carries two reserved columns: the record
//! identifier and the modification timestamp. The identifier column name is a
//! single compile-time constant shared by the DDL and every query we build;
//! nothing else in the crate spells it out.

use crate::error::{Error, Result};
use crate::types::ColumnType;

/// Name of the reserved identifier column in every synced table.
pub const RECORD_ID_COLUMN: &str = "ZRECORDNAME";

/// Name of the reserved modification-timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Name of the reserved journal table recording dirty identifiers.
pub(crate) const JOURNAL_TABLE: &str = "_kdata2_updates";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub(crate) fn create_table_sql(&self) -> String {
        let mut cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.ty.sql_decl()))
            .collect();
        cols.push(format!("\"{}\" TEXT PRIMARY KEY", RECORD_ID_COLUMN));
        cols.push(format!("\"{}\" INT", TIMESTAMP_COLUMN));
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.name,
            cols.join(", ")
        )
    }
}

/// Builds one [`Table`] from (type, column-name) pairs, in declaration order.
#[derive(Debug)]
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
}

impl TableBuilder {
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Integer)
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Float)
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Text)
    }

    pub fn binary(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Binary)
    }

    pub fn build(self) -> Result<Table> {
        if !is_valid_identifier(&self.name) {
            return Err(Error::SchemaInvalid(format!(
                "invalid table name: {:?}",
                self.name
            )));
        }
        let mut columns: Vec<Column> = Vec::with_capacity(self.columns.len());
        for col in self.columns {
            // Attempts to declare the reserved columns are silently ignored;
            // they are appended to every table anyway.
            if col.name == RECORD_ID_COLUMN || col.name == TIMESTAMP_COLUMN {
                continue;
            }
            if !is_valid_identifier(&col.name) {
                return Err(Error::SchemaInvalid(format!(
                    "invalid column name in table {:?}: {:?}",
                    self.name, col.name
                )));
            }
            if columns.iter().any(|c| c.name == col.name) {
                return Err(Error::SchemaInvalid(format!(
                    "duplicate column in table {:?}: {:?}",
                    self.name, col.name
                )));
            }
            columns.push(col);
        }
        if columns.is_empty() {
            return Err(Error::SchemaInvalid(format!(
                "table {:?} declares no columns",
                self.name
            )));
        }
        Ok(Table {
            name: self.name,
            columns,
        })
    }
}

/// The immutable catalog of synced tables, fixed at open.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<Table>,
}

impl Schema {
    pub fn new(tables: Vec<Table>) -> Result<Self> {
        if tables.is_empty() {
            return Err(Error::SchemaInvalid("no tables declared".into()));
        }
        for (i, table) in tables.iter().enumerate() {
            if tables[..i].iter().any(|t| t.name == table.name) {
                return Err(Error::SchemaInvalid(format!(
                    "duplicate table name: {:?}",
                    table.name
                )));
            }
        }
        Ok(Schema { tables })
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// All the DDL needed by a fresh database: one statement per declared
    /// table plus the journal table.
    pub(crate) fn create_statements(&self) -> Vec<String> {
        let mut stmts: Vec<String> = self.tables.iter().map(Table::create_table_sql).collect();
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (tablename TEXT, \"{}\" TEXT PRIMARY KEY, \"{}\" INT, local INT, deleted INT)",
            JOURNAL_TABLE, RECORD_ID_COLUMN, TIMESTAMP_COLUMN
        ));
        stmts
    }
}

/// We interpolate table and column names into SQL (values are always bound),
/// so the catalog only admits plain identifiers.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pers() -> Table {
        Table::builder("pers")
            .text("name")
            .integer("date")
            .binary("photo")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_order_and_types() {
        let t = pers();
        assert_eq!(t.name, "pers");
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "date", "photo"]);
        assert_eq!(t.column("photo").unwrap().ty, ColumnType::Binary);
        assert!(!t.has_column("missing"));
    }

    #[test]
    fn test_reserved_columns_silently_ignored() {
        let t = Table::builder("notes")
            .text("body")
            .text(RECORD_ID_COLUMN)
            .integer(TIMESTAMP_COLUMN)
            .build()
            .unwrap();
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["body"]);
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        assert!(matches!(
            Table::builder("bad table").text("x").build(),
            Err(Error::SchemaInvalid(_))
        ));
        assert!(matches!(
            Table::builder("t").text("drop;--").build(),
            Err(Error::SchemaInvalid(_))
        ));
        assert!(matches!(
            Table::builder("t").text("").build(),
            Err(Error::SchemaInvalid(_))
        ));
        assert!(matches!(
            Table::builder("1st").text("x").build(),
            Err(Error::SchemaInvalid(_))
        ));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        assert!(matches!(
            Table::builder("t").text("x").integer("x").build(),
            Err(Error::SchemaInvalid(_))
        ));
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(matches!(
            Table::builder("t").build(),
            Err(Error::SchemaInvalid(_))
        ));
        // A table declaring only reserved names ends up empty too.
        assert!(matches!(
            Table::builder("t").text(RECORD_ID_COLUMN).build(),
            Err(Error::SchemaInvalid(_))
        ));
    }

    #[test]
    fn test_schema_rejects_duplicate_tables() {
        let a = pers();
        let b = pers();
        assert!(matches!(
            Schema::new(vec![a, b]),
            Err(Error::SchemaInvalid(_))
        ));
        assert!(matches!(Schema::new(vec![]), Err(Error::SchemaInvalid(_))));
    }

    #[test]
    fn test_create_statements() {
        let schema = Schema::new(vec![pers()]).unwrap();
        let stmts = schema.create_statements();
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0],
            format!(
                "CREATE TABLE IF NOT EXISTS \"pers\" (\"name\" TEXT, \"date\" INT, \
                 \"photo\" BLOB, \"{}\" TEXT PRIMARY KEY, \"{}\" INT)",
                RECORD_ID_COLUMN, TIMESTAMP_COLUMN
            )
        );
        assert!(stmts[1].contains(JOURNAL_TABLE));
        assert!(stmts[1].contains(RECORD_ID_COLUMN));
    }
}
