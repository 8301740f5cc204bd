/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An in-memory [`RemoteStore`] used to drive full sync cycles in tests:
//! a flat path→bytes map with a settable server clock, an authorization
//! toggle, and an optional after-put hook for racing writes against an
//! in-flight push.

use crate::remote::{RemoteError, RemoteFile, RemoteResult, RemoteStore};
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct MemFile {
    bytes: Vec<u8>,
    modified: Timestamp,
}

type PutHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct MemoryRemoteStore {
    files: Mutex<HashMap<String, MemFile>>,
    dirs: Mutex<HashSet<String>>,
    authorized: AtomicBool,
    clock: AtomicI64,
    puts: AtomicUsize,
    after_put: Mutex<Option<PutHook>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            authorized: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Every subsequent upload is stamped with this server time.
    pub fn set_clock(&self, now: i64) {
        self.clock.store(now, Ordering::SeqCst);
    }

    /// Number of uploads accepted so far (envelopes and sidecars).
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Run `hook` after each accepted upload, with the uploaded path.
    pub fn on_put(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.after_put.lock() = Some(Box::new(hook));
    }

    /// Seed a file directly, bypassing the clock.
    pub fn insert_file(&self, path: &str, bytes: Vec<u8>, modified: i64) {
        self.files.lock().insert(
            path.to_string(),
            MemFile {
                bytes,
                modified: Timestamp(modified),
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).map(|f| f.bytes.clone())
    }

    fn check_auth(&self) -> RemoteResult<()> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unauthorized)
        }
    }

    fn file_meta(path: &str, file: &MemFile) -> RemoteFile {
        RemoteFile {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            modified: file.modified,
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn head(&self, path: &str) -> RemoteResult<RemoteFile> {
        self.check_auth()?;
        if path == "app:/" || self.dirs.lock().contains(path) {
            return Ok(RemoteFile {
                name: String::new(),
                path: path.to_string(),
                modified: Timestamp(0),
            });
        }
        match self.files.lock().get(path) {
            Some(file) => Ok(Self::file_meta(path, file)),
            None => Err(RemoteError::NotFound),
        }
    }

    fn get(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.check_auth()?;
        self.files
            .lock()
            .get(path)
            .map(|f| f.bytes.clone())
            .ok_or(RemoteError::NotFound)
    }

    fn put(&self, path: &str, bytes: &[u8], overwrite: bool) -> RemoteResult<()> {
        self.check_auth()?;
        let mut files = self.files.lock();
        if !overwrite && files.contains_key(path) {
            return Err(RemoteError::Other(format!("already exists: {}", path)));
        }
        files.insert(
            path.to_string(),
            MemFile {
                bytes: bytes.to_vec(),
                modified: Timestamp(self.clock.load(Ordering::SeqCst)),
            },
        );
        drop(files);
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &*self.after_put.lock() {
            hook(path);
        }
        Ok(())
    }

    fn mv(&self, src: &str, dst: &str, overwrite: bool) -> RemoteResult<()> {
        self.check_auth()?;
        let mut files = self.files.lock();
        if !overwrite && files.contains_key(dst) {
            return Err(RemoteError::Other(format!("already exists: {}", dst)));
        }
        // A move keeps the object's modification time.
        match files.remove(src) {
            Some(file) => {
                files.insert(dst.to_string(), file);
                Ok(())
            }
            None => Err(RemoteError::NotFound),
        }
    }

    fn mkdir(&self, path: &str) -> RemoteResult<()> {
        self.check_auth()?;
        self.dirs.lock().insert(path.to_string());
        Ok(())
    }

    fn ls(&self, path: &str, on_entry: &mut dyn FnMut(RemoteFile)) -> RemoteResult<()> {
        self.check_auth()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        for (file_path, file) in self.files.lock().iter() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    on_entry(Self::file_meta(file_path, file));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_head_get() {
        let remote = MemoryRemoteStore::new();
        remote.set_clock(500);
        remote.put("app:/d/x", b"bytes", true).unwrap();
        let meta = remote.head("app:/d/x").unwrap();
        assert_eq!(meta.name, "x");
        assert_eq!(meta.modified, Timestamp(500));
        assert_eq!(remote.get("app:/d/x").unwrap(), b"bytes");
        assert!(matches!(
            remote.head("app:/d/y"),
            Err(RemoteError::NotFound)
        ));
    }

    #[test]
    fn test_mv_preserves_modified() {
        let remote = MemoryRemoteStore::new();
        remote.insert_file("app:/a/x", b"v".to_vec(), 42);
        remote.mv("app:/a/x", "app:/b/x", true).unwrap();
        assert!(!remote.contains("app:/a/x"));
        assert_eq!(remote.head("app:/b/x").unwrap().modified, Timestamp(42));
    }

    #[test]
    fn test_ls_is_shallow() {
        let remote = MemoryRemoteStore::new();
        remote.insert_file("app:/d/x", b"".to_vec(), 1);
        remote.insert_file("app:/d/y", b"".to_vec(), 2);
        remote.insert_file("app:/d/sub/z", b"".to_vec(), 3);
        remote.insert_file("app:/other/w", b"".to_vec(), 4);
        let mut names = Vec::new();
        remote
            .ls("app:/d", &mut |f| names.push(f.name))
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_unauthorized() {
        let remote = MemoryRemoteStore::new();
        remote.set_authorized(false);
        assert!(matches!(
            remote.head("app:/"),
            Err(RemoteError::Unauthorized)
        ));
        assert!(matches!(
            remote.put("app:/d/x", b"", true),
            Err(RemoteError::Unauthorized)
        ));
        remote.set_authorized(true);
        assert!(remote.head("app:/").is_ok());
    }
}
