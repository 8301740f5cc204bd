/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Replication: the background sync loop and its remote directory layout.

pub(crate) mod engine;

use crate::types::Timestamp;

/// Remote directory holding one envelope file per live record.
pub(crate) const DATABASE_DIR: &str = "kdata_database";

/// Remote directory holding tombstone envelopes for deleted records.
pub(crate) const DELETED_DIR: &str = "kdata_deleted";

/// Remote directory holding binary sidecar objects.
pub(crate) const DATAFILES_DIR: &str = "kdata_data";

/// Root of the app-scoped remote namespace; used as the reachability probe.
pub(crate) const APP_ROOT: &str = "app:/";

pub(crate) fn dir_path(dir: &str) -> String {
    format!("app:/{}", dir)
}

pub(crate) fn database_path(id: &str) -> String {
    format!("app:/{}/{}", DATABASE_DIR, id)
}

pub(crate) fn deleted_path(id: &str) -> String {
    format!("app:/{}/{}", DELETED_DIR, id)
}

pub(crate) fn datafile_path(sidecar_id: &str) -> String {
    format!("app:/{}/{}", DATAFILES_DIR, sidecar_id)
}

/// One unit of replication work. Items own plain data and borrow nothing;
/// the engine they run on holds the shared handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkItem {
    /// Upload the current local row as an envelope (plus sidecars).
    Push {
        table: String,
        id: String,
        timestamp: Timestamp,
    },
    /// Move the remote envelope into the deleted directory.
    Delete { id: String },
    /// Download a remote envelope and apply it locally.
    Pull { path: String, id: String, modified: Timestamp },
    /// Download one sidecar object and bind it to its column.
    FetchSidecar {
        table: String,
        id: String,
        column: String,
        sidecar_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_paths() {
        assert_eq!(database_path("u-1"), "app:/kdata_database/u-1");
        assert_eq!(deleted_path("u-1"), "app:/kdata_deleted/u-1");
        assert_eq!(datafile_path("u-1_photo"), "app:/kdata_data/u-1_photo");
        assert_eq!(dir_path(DATABASE_DIR), "app:/kdata_database");
    }
}
