/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An embedded record store that keeps a local SQLite database continuously
//! synchronized against a remote cloud file store.
//!
//! Embedders declare a [`Schema`] of tables, write records through typed
//! setters on [`RecordStore`], and read them back with plain SQL. A background
//! worker reconciles local and remote copies under last-writer-wins
//! semantics: each record is serialized to a JSON envelope file named by its
//! identifier, binary columns are stored out-of-line as sidecar objects, and
//! deletions travel as tombstones in a dedicated remote directory.

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]

mod envelope;
mod error;
mod journal;
pub mod remote;
mod schema;
mod storage;
mod store;
mod sync;
mod types;

pub use crate::error::{Error, Result};
pub use crate::schema::{Column, Schema, Table, TableBuilder, RECORD_ID_COLUMN, TIMESTAMP_COLUMN};
pub use crate::store::{ColumnData, RecordStore, RowData, StoreConfig, SyncObserver};
pub use crate::types::{ColumnType, Timestamp, Value};
pub use record_guid::Guid;
