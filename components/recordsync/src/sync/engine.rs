/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The sync cycle: drain the journal outward, pull newer remote state
//! inward, then apply remote deletions.
//!
//! Arbitration is last-writer-wins on per-record timestamps. The one rule
//! that keeps the loop convergent under concurrent local writes is the
//! post-upload reconciliation in [`SyncEngine::upload_record`]: after an
//! envelope lands remotely, the local timestamp is re-read, and the journal
//! entry is only cleared if no newer local write appeared while the upload
//! was in flight.
//!
//! Nothing in here panics or aborts: per-record failures are reported and
//! leave that record's journal entry in place for the next cycle, while
//! `Unauthorized` aborts the whole cycle (the worker sleeps and retries,
//! typically after the embedder refreshes the token).

use crate::envelope;
use crate::error::{Error, Result};
use crate::remote::{RemoteError, RemoteFile, RemoteStore};
use crate::schema::Schema;
use crate::storage::LocalStore;
use crate::store::Reporter;
use crate::sync::{
    database_path, datafile_path, deleted_path, dir_path, WorkItem, APP_ROOT, DATABASE_DIR,
    DATAFILES_DIR, DELETED_DIR,
};
use crate::types::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct SyncEngine {
    local: Arc<LocalStore>,
    schema: Arc<Schema>,
    remote: Arc<dyn RemoteStore>,
    reporter: Reporter,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<LocalStore>,
        schema: Arc<Schema>,
        remote: Arc<dyn RemoteStore>,
        reporter: Reporter,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            local,
            schema,
            remote,
            reporter,
            cancelled,
        }
    }

    /// One full iteration of the sync loop. Never fails; everything is
    /// reported and either retried next cycle or skipped.
    pub fn run_cycle(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        // Reachability probe; a dead or unauthorized remote means the whole
        // cycle would only produce noise.
        match self.remote.head(APP_ROOT) {
            Ok(_) => {}
            Err(RemoteError::Unauthorized) => {
                self.reporter
                    .error("sync: unauthorized against the remote store".to_string());
                return;
            }
            Err(e) => {
                self.reporter.log(format!("sync: remote unreachable: {}", e));
                return;
            }
        }
        for dir in [DATABASE_DIR, DELETED_DIR, DATAFILES_DIR] {
            if let Err(e) = self.remote.mkdir(&dir_path(dir)) {
                self.reporter.log(format!("sync: mkdir {}: {}", dir, e));
            }
        }
        if !self.run_pass("push", self.push_pass()) {
            return;
        }
        if !self.run_pass("pull", self.pull_pass()) {
            return;
        }
        self.run_pass("deletions", self.deletion_pass());
    }

    /// Returns false if the cycle should stop here.
    fn run_pass(&self, name: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(Error::Interrupted) => false,
            Err(e) if e.is_unauthorized() => {
                self.reporter.error(format!("sync: {} pass aborted: {}", name, e));
                false
            }
            Err(e) => {
                self.reporter.error(format!("sync: {} pass failed: {}", name, e));
                true
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    fn run_item(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Push {
                table,
                id,
                timestamp,
            } => self.push_record(&table, &id, timestamp),
            WorkItem::Delete { id } => self.delete_record(&id),
            WorkItem::Pull { path, id, modified } => self.pull_record(&path, &id, modified),
            WorkItem::FetchSidecar {
                table,
                id,
                column,
                sidecar_id,
            } => self.fetch_sidecar(&table, &id, &column, &sidecar_id),
        }
    }

    /// Drain the journal: one push or tombstone move per entry. Entries are
    /// only removed once the remote side confirms.
    fn push_pass(&self) -> Result<()> {
        for entry in self.local.journal_entries()? {
            self.check_cancelled()?;
            if entry.id.is_empty() {
                log::warn!("skipping journal entry without an identifier");
                continue;
            }
            let item = if entry.deleted {
                WorkItem::Delete {
                    id: entry.id.clone(),
                }
            } else {
                WorkItem::Push {
                    table: entry.table.clone(),
                    id: entry.id.clone(),
                    timestamp: entry.timestamp,
                }
            };
            match self.run_item(item) {
                Ok(()) => {}
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) if e.is_unauthorized() => return Err(e),
                // Transient or local failure: the journal entry stays and the
                // record is retried next cycle.
                Err(e) => self.reporter.error(format!("push {}: {}", entry.id, e)),
            }
        }
        Ok(())
    }

    fn push_record(&self, table: &str, id: &str, timestamp: Timestamp) -> Result<()> {
        match self.remote.head(&database_path(id)) {
            Ok(meta) if meta.modified >= timestamp => {
                // Remote is newer or equal; drop the journal entry and let
                // the pull phase bring the newer copy in. The local row is
                // not touched here.
                self.reporter
                    .log(format!("push {}: remote copy is newer, skipping", id));
                self.local.forget(id)?;
                return Ok(());
            }
            Ok(_) | Err(RemoteError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        self.upload_record(table, id, timestamp)
    }

    fn upload_record(&self, table_name: &str, id: &str, push_ts: Timestamp) -> Result<()> {
        let table = match self.schema.table(table_name) {
            Some(table) => table,
            None => {
                // A journal row for a table that is no longer declared can
                // never be pushed; retrying it forever helps nobody.
                self.reporter.error(format!(
                    "push {}: table {:?} is not in the catalog",
                    id, table_name
                ));
                self.local.forget(id)?;
                return Ok(());
            }
        };
        let snapshot = match self.local.query_record(table, id)? {
            Some(snapshot) => snapshot,
            None => {
                // The row vanished locally after being journalled; any
                // tombstone work belongs to the deletion path.
                self.local.forget(id)?;
                return Ok(());
            }
        };
        let encoded = envelope::encode(table_name, id, &snapshot)?;
        // Sidecars first: the envelope must never reference bytes that are
        // not on the server. Overwrites make retries idempotent.
        for sidecar in &encoded.sidecars {
            self.check_cancelled()?;
            self.reporter
                .log(format!("push {}: uploading sidecar {}", id, sidecar.sidecar_id));
            self.remote
                .put(&datafile_path(&sidecar.sidecar_id), &sidecar.bytes, true)?;
        }
        self.check_cancelled()?;
        self.reporter.log(format!("push {}: uploading envelope", id));
        self.remote.put(&database_path(id), &encoded.json, true)?;

        // Post-upload reconciliation. A local write that landed during the
        // upload has a newer timestamp; keep the journal entry so it is
        // pushed again next cycle.
        let current = self.local.query_timestamp(table, id)?.unwrap_or_default();
        if current > push_ts {
            self.reporter.log(format!(
                "push {}: superseded by a local write at {}, keeping journal entry",
                id, current
            ));
            return Ok(());
        }
        // Otherwise absorb the server's clock so future comparisons use the
        // same timeline the listing reports.
        let meta = self.remote.head(&database_path(id))?;
        if meta.modified > current {
            self.local.set_timestamp(table, id, meta.modified)?;
        }
        self.local.forget(id)?;
        Ok(())
    }

    fn delete_record(&self, id: &str) -> Result<()> {
        match self
            .remote
            .mv(&database_path(id), &deleted_path(id), true)
        {
            Ok(()) => {}
            // Nothing to move: the record never made it to the remote store.
            Err(RemoteError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        self.local.forget(id)?;
        Ok(())
    }

    /// Walk the remote database directory and pull every record that is
    /// missing locally or newer remotely.
    fn pull_pass(&self) -> Result<()> {
        let mut listing = Vec::new();
        self.remote
            .ls(&dir_path(DATABASE_DIR), &mut |file| listing.push(file))?;
        for file in listing {
            self.check_cancelled()?;
            match self.consider_pull(&file) {
                Ok(()) => {}
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) if e.is_unauthorized() => return Err(e),
                // A malformed or unfetchable envelope only costs this one
                // record this one cycle; the remote file is left untouched.
                Err(e) => self.reporter.error(format!("pull {}: {}", file.name, e)),
            }
        }
        Ok(())
    }

    fn consider_pull(&self, file: &RemoteFile) -> Result<()> {
        let mut exists = false;
        let mut stale = false;
        for table in self.schema.tables() {
            if let Some(ts) = self.local.query_timestamp(table, &file.name)? {
                exists = true;
                if file.modified > ts {
                    stale = true;
                }
            }
        }
        if exists && !stale {
            return Ok(());
        }
        self.run_item(WorkItem::Pull {
            path: file.path.clone(),
            id: file.name.clone(),
            modified: file.modified,
        })
    }

    fn pull_record(&self, path: &str, id: &str, modified: Timestamp) -> Result<()> {
        let bytes = self.remote.get(path)?;
        let staged = envelope::decode(&bytes)?;
        let table = match self.schema.table(&staged.table) {
            Some(table) => table,
            None => {
                self.reporter.log(format!(
                    "pull {}: table {:?} is not in the catalog, skipping",
                    id, staged.table
                ));
                return Ok(());
            }
        };
        let scalars: Vec<_> = staged
            .scalars
            .into_iter()
            .filter(|(name, _)| {
                let known = table.has_column(name);
                if !known {
                    log::warn!("pull {}: dropping undeclared column {:?}", id, name);
                }
                known
            })
            .collect();
        self.local.upsert_record(table, id, &scalars, modified)?;
        for sidecar in staged.sidecars {
            self.check_cancelled()?;
            if !table.has_column(&sidecar.column) {
                log::warn!(
                    "pull {}: dropping undeclared binary column {:?}",
                    id,
                    sidecar.column
                );
                continue;
            }
            let item = WorkItem::FetchSidecar {
                table: table.name.clone(),
                id: id.to_string(),
                column: sidecar.column,
                sidecar_id: sidecar.sidecar_id.clone(),
            };
            match self.run_item(item) {
                Ok(()) => {}
                // The envelope referenced bytes that aren't there (yet);
                // the scalar part of the record is still useful.
                Err(Error::RemoteError(RemoteError::NotFound)) => {
                    log::warn!("pull {}: sidecar {} not found", id, sidecar.sidecar_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn fetch_sidecar(&self, table: &str, id: &str, column: &str, sidecar_id: &str) -> Result<()> {
        let table = match self.schema.table(table) {
            Some(table) => table,
            None => return Ok(()),
        };
        let bytes = self.remote.get(&datafile_path(sidecar_id))?;
        self.local.bind_binary(table, id, column, &bytes)?;
        Ok(())
    }

    /// Remote tombstones carry no table name, so each one fans out as a
    /// delete against every declared table; rows that aren't there are
    /// no-ops.
    fn deletion_pass(&self) -> Result<()> {
        let mut listing = Vec::new();
        self.remote
            .ls(&dir_path(DELETED_DIR), &mut |file| listing.push(file))?;
        for file in listing {
            self.check_cancelled()?;
            for table in self.schema.tables() {
                if let Err(e) = self.local.delete(table, &file.name) {
                    self.reporter
                        .error(format!("deletion {}: {}", file.name, e));
                }
            }
        }
        Ok(())
    }
}
