/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The remote store seam: everything the sync engine needs from a cloud file
//! store, and nothing else.
//!
//! The engine runs on a single worker thread and treats every operation as
//! blocking. Implementations are expected to enforce a per-operation
//! deadline and surface its expiry as [`RemoteError::Transient`], which
//! leaves the affected record dirty for the next cycle.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

use crate::types::Timestamp;

/// Metadata for one remote object, as reported by `head` and `ls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Bare object name (the last path segment).
    pub name: String,
    /// Full remote path, usable with `get`.
    pub path: String,
    /// Server-assigned modification time, seconds since the epoch.
    pub modified: Timestamp,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Often a normal signal (a record not yet uploaded), not a failure.
    #[error("remote object not found")]
    NotFound,

    #[error("unauthorized against the remote store")]
    Unauthorized,

    /// Timeouts, connection drops, server hiccups. Worth retrying next cycle.
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote store failure: {0}")]
    Other(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Blocking operations against the remote file store. Paths use the
/// app-scoped form (`app:/<dir>/<name>`); listing order is unspecified and
/// the engine must not rely on it.
pub trait RemoteStore: Send + Sync {
    /// Fetch metadata for one object or directory.
    fn head(&self, path: &str) -> RemoteResult<RemoteFile>;

    /// Download full object content.
    fn get(&self, path: &str) -> RemoteResult<Vec<u8>>;

    /// Upload full object content atomically.
    fn put(&self, path: &str, bytes: &[u8], overwrite: bool) -> RemoteResult<()>;

    /// Move an object; used to relocate envelopes into the deleted
    /// directory.
    fn mv(&self, src: &str, dst: &str, overwrite: bool) -> RemoteResult<()>;

    /// Create a directory. Already-exists is success; a missing parent is
    /// swallowed too (the layout is flat).
    fn mkdir(&self, path: &str) -> RemoteResult<()>;

    /// Stream the entries of a directory.
    fn ls(&self, path: &str, on_entry: &mut dyn FnMut(RemoteFile)) -> RemoteResult<()>;
}
