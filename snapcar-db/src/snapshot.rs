// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Building snapshot artifacts and owning their lifetime.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::connection::{DEFAULT_BUSY_TIMEOUT, SourceDb};
use crate::error::{Error, Result};

/// Timestamp layout used in artifact names and derived object keys.
///
/// Fixed width, so a name can be split from the right unambiguously.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Disambiguates artifacts created within the same timestamp resolution.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A materialized snapshot file on scratch storage.
///
/// The file belongs to exactly one request. It is removed when the value is
/// dropped, whether the snapshot was delivered or not.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl Artifact {
    /// Take ownership of `path`. Nothing needs to exist there yet.
    fn claim(path: PathBuf, created_at: DateTime<Utc>) -> Self {
        Self { path, created_at }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the snapshot was taken.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `created_at` rendered with [`TIMESTAMP_FORMAT`].
    pub fn timestamp(&self) -> String {
        self.created_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Size of the artifact file in bytes.
    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed snapshot artifact {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove snapshot artifact {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Produces consistent copies of one source database into a scratch directory.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    source: PathBuf,
    scratch_dir: PathBuf,
    busy_timeout: Duration,
    file_stem: String,
}

impl SnapshotBuilder {
    pub fn new(source: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            scratch_dir: scratch_dir.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            file_stem: "snapshot".to_string(),
        }
    }

    /// How long to wait on a writer holding the source lock.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Leading part of every artifact file name.
    pub fn file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = stem.into();
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Take a snapshot of the source database.
    ///
    /// Blocks until the copy is complete. The returned artifact is a whole,
    /// openable database. On error no artifact file is left behind.
    pub fn build(&self) -> Result<Artifact> {
        let meta = std::fs::metadata(&self.scratch_dir).map_err(|e| Error::Scratch {
            path: self.scratch_dir.clone(),
            source: e,
        })?;
        if !meta.is_dir() {
            return Err(Error::Scratch {
                path: self.scratch_dir.clone(),
                source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            });
        }

        let created_at = Utc::now();
        // Armed before the export so a partial file is removed on failure.
        let artifact = Artifact::claim(self.artifact_path(created_at), created_at);

        {
            let source = SourceDb::open(&self.source, self.busy_timeout)?;
            source.export_into(artifact.path())?;
        }

        debug!(
            "Built snapshot of {} at {}",
            self.source.display(),
            artifact.path().display()
        );
        Ok(artifact)
    }

    fn artifact_path(&self, created_at: DateTime<Utc>) -> PathBuf {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.scratch_dir.join(format!(
            "{}-{}-{}-{}.db",
            self.file_stem,
            created_at.format(TIMESTAMP_FORMAT),
            std::process::id(),
            seq
        ))
    }
}
