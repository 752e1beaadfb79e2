// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Test utilities for snapcar.
//!
//! SQLite fixtures standing in for the live source database, a writer that
//! keeps committing in the background, and proptest strategies for object
//! key inputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rusqlite::{Connection, params};
use tempfile::TempDir;

pub mod fixtures;

pub use fixtures::{create_blob_db, create_fixture_db, integrity_check, row_count};

/// A wrapper around TempDir that provides a canonicalized path.
/// This resolves symlinks like /var -> /private/var on macOS.
pub struct CanonicalTempDir {
    _inner: TempDir,
    path: PathBuf,
}

impl CanonicalTempDir {
    /// Create a new temporary directory with a canonicalized path.
    pub fn new() -> std::io::Result<Self> {
        let inner = TempDir::new()?;
        let path = inner.path().canonicalize()?;
        Ok(Self {
            _inner: inner,
            path,
        })
    }

    /// Get the canonicalized path to the temporary directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if needed) and return a subdirectory.
    pub fn subdir(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.path.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Names of the entries currently in `dir`.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Content and modification time of a file, for before/after comparisons.
pub fn fingerprint(path: &Path) -> std::io::Result<(Vec<u8>, SystemTime)> {
    let content = std::fs::read(path)?;
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok((content, mtime))
}

/// Background writer committing small transactions against a database.
///
/// Each transaction inserts a batch of rows and updates a running total, so a
/// torn copy would show up as an inconsistent `ledger` table.
pub struct ConcurrentWriter {
    stop: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
    handle: Option<JoinHandle<rusqlite::Result<()>>>,
}

impl ConcurrentWriter {
    /// Start writing to the fixture database at `path` (see [`create_fixture_db`]).
    pub fn start(path: &Path) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let commits = Arc::new(AtomicU64::new(0));
        let path = path.to_owned();
        let (thread_stop, thread_commits) = (stop.clone(), commits.clone());

        let handle = std::thread::spawn(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(10))?;
            let mut n: i64 = 0;
            while !thread_stop.load(Ordering::Relaxed) {
                let tx = conn.transaction()?;
                for _ in 0..16 {
                    n += 1;
                    tx.execute(
                        "INSERT INTO items (id, payload) VALUES (?1, randomblob(512))",
                        params![n],
                    )?;
                }
                tx.execute("UPDATE ledger SET total = total + 16 WHERE id = 1", [])?;
                tx.commit()?;
                thread_commits.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        });

        Self {
            stop,
            commits,
            handle: Some(handle),
        }
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Block until at least `n` transactions have committed.
    pub fn wait_for_commits(&self, n: u64) {
        while self.commits() < n {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the writer and surface any error it hit.
    pub fn stop(mut self) -> rusqlite::Result<u64> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("writer thread panicked")?;
        }
        Ok(self.commits())
    }
}

impl Drop for ConcurrentWriter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Key prefixes as operators write them: empty, or ending in `/`.
pub fn arb_prefix() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z0-9_-]{1,12}(/[a-z0-9_-]{1,12}){0,2}/",
    ]
}

/// Instance identifiers shaped like pod names.
pub fn arb_instance_id() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,30}[a-z0-9])?"
}

prop_compose! {
    /// Millisecond-precision UTC timestamps between 2000 and 2100.
    pub fn arb_timestamp()(millis in 946_684_800_000i64..4_102_444_800_000i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }
}
