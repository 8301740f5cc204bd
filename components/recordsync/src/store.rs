/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The public handle embedders hold: typed writes, SQL reads, and the
//! lifecycle of the background sync worker.
//!
//! All four typed setters funnel into one generic set-value path, so there is
//! exactly one place that mints identifiers, stamps timestamps, and journals
//! the mutation. The worker is spawned at open and joined at close (or drop);
//! in between it runs one sync cycle per configured interval.

use crate::error::{Error, Result};
use crate::remote::http::{HttpRemoteStore, DEFAULT_BASE_URL};
use crate::remote::RemoteStore;
use crate::schema::Schema;
use crate::storage::LocalStore;
use crate::sync::engine::SyncEngine;
use crate::types::{ColumnType, Timestamp, Value};
use parking_lot::{Condvar, Mutex, RwLock};
use record_guid::Guid;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receives everything the sync machinery wants the embedder to see. Both
/// methods may be called from the worker thread.
pub trait SyncObserver: Send + Sync {
    fn on_error(&self, _message: &str) {}
    fn on_log(&self, _message: &str) {}
}

/// Fans a message out to the log crate and the embedder's observer.
#[derive(Clone)]
pub(crate) struct Reporter {
    observer: Option<Arc<dyn SyncObserver>>,
}

impl Reporter {
    pub fn new(observer: Option<Arc<dyn SyncObserver>>) -> Self {
        Self { observer }
    }

    pub fn error(&self, message: String) {
        log::error!("{}", message);
        if let Some(observer) = &self.observer {
            observer.on_error(&message);
        }
    }

    pub fn log(&self, message: String) {
        log::debug!("{}", message);
        if let Some(observer) = &self.observer {
            observer.on_log(&message);
        }
    }
}

pub struct StoreConfig {
    /// Where the local database file lives.
    pub db_path: PathBuf,
    /// The declared tables; immutable once the store is open.
    pub schema: Schema,
    /// Remote access token. May be absent at open and supplied later via
    /// [`RecordStore::set_access_token`]; until then every cycle fails its
    /// reachability probe and retries.
    pub access_token: Option<String>,
    /// Delay between sync cycles.
    pub sync_interval: Duration,
    /// Base URL of the cloud-disk API; `None` for the default service.
    pub remote_base_url: Option<String>,
    /// Upper bound for one remote operation; expiry counts as transient.
    pub remote_deadline: Duration,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            access_token: None,
            sync_interval: Duration::from_secs(30),
            remote_base_url: None,
            remote_deadline: Duration::from_secs(30),
        }
    }
}

/// One row streamed out of [`RecordStore::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    pub columns: Vec<ColumnData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnData {
    pub name: String,
    pub value: Value,
}

impl ColumnData {
    /// The wire type of this cell, or `None` when it is null.
    pub fn column_type(&self) -> Option<ColumnType> {
        self.value.column_type()
    }

    /// Byte length for text and binary cells, 0 otherwise.
    pub fn size(&self) -> usize {
        self.value.size()
    }
}

pub(crate) struct StoreInner {
    pub(crate) local: Arc<LocalStore>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) reporter: Reporter,
    token: Arc<RwLock<String>>,
}

impl StoreInner {
    /// The single generic write path behind every typed setter: resolve the
    /// table, mint an identifier if the caller didn't bring one, upsert the
    /// cell, and journal the mutation.
    fn set_value(
        &self,
        table_name: &str,
        id: Option<&str>,
        column: &str,
        value: Value,
    ) -> Result<Guid> {
        let table = self.schema.table(table_name).ok_or_else(|| {
            Error::SchemaInvalid(format!("no such table: {:?}", table_name))
        })?;
        let guid = match id {
            Some(id) if !id.is_empty() => Guid::from(id),
            Some(_) => return Err(Error::InvalidIdentifier("empty identifier".into())),
            None => Guid::random(),
        };
        let now = Timestamp::now();
        self.local
            .upsert_scalar(table, guid.as_str(), column, &value, now)?;
        self.local.mark_dirty(table_name, guid.as_str(), now, false)?;
        Ok(guid)
    }

    fn remove(&self, table_name: &str, id: &str) -> Result<()> {
        let table = self.schema.table(table_name).ok_or_else(|| {
            Error::SchemaInvalid(format!("no such table: {:?}", table_name))
        })?;
        if id.is_empty() {
            return Err(Error::InvalidIdentifier("empty identifier".into()));
        }
        self.local.delete(table, id)?;
        self.local.mark_dirty(table_name, id, Timestamp::now(), true)?;
        Ok(())
    }
}

/// Wakes the worker out of its inter-cycle sleep when the store closes.
struct ShutdownFlag {
    flag: Arc<AtomicBool>,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownFlag {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// The cancellation flag the engine polls between records.
    fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until shutdown is requested. Returns true if
    /// shutdown was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock.lock();
        while !self.is_set() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.cond.wait_for(&mut guard, deadline - now).timed_out() {
                break;
            }
        }
        self.is_set()
    }
}

pub struct RecordStore {
    inner: Arc<StoreInner>,
    shutdown: Arc<ShutdownFlag>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordStore {
    /// Open the store against the production cloud-disk remote and start the
    /// background worker.
    pub fn open(config: StoreConfig, observer: Option<Arc<dyn SyncObserver>>) -> Result<Self> {
        let token = Arc::new(RwLock::new(
            config.access_token.clone().unwrap_or_default(),
        ));
        let base_url = config
            .remote_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let remote = Arc::new(HttpRemoteStore::new(
            &base_url,
            Arc::clone(&token),
            config.remote_deadline,
        )?);
        Self::open_impl(config, observer, remote, token)
    }

    /// Open the store against any [`RemoteStore`] implementation. This is the
    /// seam for alternative backends and for tests.
    pub fn open_with_remote(
        config: StoreConfig,
        observer: Option<Arc<dyn SyncObserver>>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let token = Arc::new(RwLock::new(
            config.access_token.clone().unwrap_or_default(),
        ));
        Self::open_impl(config, observer, remote, token)
    }

    fn open_impl(
        config: StoreConfig,
        observer: Option<Arc<dyn SyncObserver>>,
        remote: Arc<dyn RemoteStore>,
        token: Arc<RwLock<String>>,
    ) -> Result<Self> {
        if config.db_path.as_os_str().is_empty() {
            return Err(Error::ConfigMissing("database path"));
        }
        let local = Arc::new(LocalStore::open(&config.db_path, &config.schema)?);
        let inner = Arc::new(StoreInner {
            local,
            schema: Arc::new(config.schema),
            remote,
            reporter: Reporter::new(observer),
            token,
        });
        let shutdown = Arc::new(ShutdownFlag::new());
        let worker = spawn_worker(Arc::clone(&inner), Arc::clone(&shutdown), config.sync_interval)?;
        Ok(Self {
            inner,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Replace the remote access token. Takes effect on the worker's next
    /// remote call.
    pub fn set_access_token(&self, token: &str) {
        *self.inner.token.write() = token.to_string();
    }

    /// Set an integer cell. With `id: None` a fresh identifier is minted and
    /// returned; the same goes for the other typed setters.
    pub fn set_integer(
        &self,
        table: &str,
        id: Option<&str>,
        column: &str,
        value: i64,
    ) -> Result<Guid> {
        self.inner.set_value(table, id, column, Value::Integer(value))
    }

    pub fn set_float(
        &self,
        table: &str,
        id: Option<&str>,
        column: &str,
        value: f64,
    ) -> Result<Guid> {
        self.inner.set_value(table, id, column, Value::Float(value))
    }

    pub fn set_text(
        &self,
        table: &str,
        id: Option<&str>,
        column: &str,
        value: &str,
    ) -> Result<Guid> {
        self.inner.set_value(table, id, column, Value::from(value))
    }

    pub fn set_binary(
        &self,
        table: &str,
        id: Option<&str>,
        column: &str,
        value: &[u8],
    ) -> Result<Guid> {
        self.inner.set_value(table, id, column, Value::from(value))
    }

    /// Delete a record locally and journal a deletion for the remote side.
    pub fn remove(&self, table: &str, id: &str) -> Result<()> {
        self.inner.remove(table, id)
    }

    /// Run embedder SQL against the local store, streaming each row.
    pub fn query(&self, sql: &str, mut on_row: impl FnMut(&RowData)) -> Result<()> {
        self.inner.local.for_each_row(sql, &mut |columns| {
            let row = RowData {
                columns: columns
                    .iter()
                    .map(|(name, value)| ColumnData {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            };
            on_row(&row);
        })
    }

    /// First column of the first row as text, or `None` for no rows / null.
    pub fn query_string(&self, sql: &str) -> Result<Option<String>> {
        self.inner.local.query_string(sql)
    }

    /// Stop the worker and close the store. Dropping the handle does the
    /// same; this form just makes the point explicit.
    pub fn close(self) -> Result<()> {
        self.shutdown_and_join();
        Ok(())
    }

    fn shutdown_and_join(&self) {
        self.shutdown.request();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("sync worker panicked during shutdown");
            }
        }
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn spawn_worker(
    inner: Arc<StoreInner>,
    shutdown: Arc<ShutdownFlag>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("recordsync-sync".into())
        .spawn(move || {
            let engine = SyncEngine::new(
                Arc::clone(&inner.local),
                Arc::clone(&inner.schema),
                Arc::clone(&inner.remote),
                inner.reporter.clone(),
                shutdown.handle(),
            );
            loop {
                if shutdown.is_set() {
                    break;
                }
                engine.run_cycle();
                if shutdown.sleep(interval) {
                    break;
                }
            }
            log::debug!("sync worker exiting");
        })?;
    Ok(handle)
}
