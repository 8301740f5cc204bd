/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef,
};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The declared type of a user column. The discriminants double as the wire
/// codes in envelope `"type"` fields (0 is reserved for null and never
/// declared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Text,
    Binary,
    Float,
}

/// Wire code meaning "no value"; never a declarable column type.
pub(crate) const TYPE_CODE_NULL: i64 = 0;

impl ColumnType {
    /// The envelope wire code.
    pub fn code(self) -> i64 {
        match self {
            ColumnType::Integer => 1,
            ColumnType::Text => 2,
            ColumnType::Binary => 3,
            ColumnType::Float => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ColumnType::Integer),
            2 => Some(ColumnType::Text),
            3 => Some(ColumnType::Binary),
            4 => Some(ColumnType::Float),
            _ => None,
        }
    }

    /// The SQL column declaration for this type.
    pub(crate) fn sql_decl(self) -> &'static str {
        match self {
            ColumnType::Integer => "INT",
            ColumnType::Text => "TEXT",
            ColumnType::Binary => "BLOB",
            ColumnType::Float => "REAL",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
            ColumnType::Float => "float",
        };
        f.write_str(name)
    }
}

/// A single cell value, as stored locally and carried through the envelope
/// codec. Binary payloads are owned copies; they never travel inline in
/// envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    /// The column type this value would be tagged with on the wire, or `None`
    /// for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Binary(_) => Some(ColumnType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Size in bytes for binary and text values, 0 otherwise. Mirrors what
    /// row callbacks report to embedders.
    pub fn size(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Binary(b) => b.len(),
            _ => 0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Binary(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

/// Seconds since the epoch. Typesafe so local clocks and server-reported
/// modification times can't silently swap places with other integers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    #[inline]
    pub fn as_secs(self) -> i64 {
        self.0
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        // The clock being before 1970 is not a case worth threading an error
        // through every caller for.
        let secs = match st.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        };
        Timestamp(secs)
    }
}

impl From<i64> for Timestamp {
    #[inline]
    fn from(secs: i64) -> Self {
        Timestamp(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(Timestamp).map_err(|_| FromSqlError::InvalidType)
    }
}
