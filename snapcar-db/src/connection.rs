// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Read-only access to the live source database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::error::{Error, Result};

/// How long an export waits on a writer holding the database lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only connection to a database owned by another process.
///
/// The connection is closed when the value is dropped. Keep its scope as
/// short as the export that needs it.
pub struct SourceDb {
    conn: Connection,
    path: PathBuf,
}

impl SourceDb {
    /// Open `path` read-only and check that it really is a SQLite database.
    ///
    /// Never sets the `immutable` URI flag; the writer keeps committing while
    /// we read and SQLite must keep taking shared locks.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::DatabaseNotFound(path.to_owned()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::DatabaseOpen {
            path: path.to_owned(),
            source: e,
        })?;
        conn.busy_timeout(busy_timeout)?;

        // Opening is lazy; the header is only read on first access.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| Error::DatabaseOpen {
            path: path.to_owned(),
            source: e,
        })?;

        debug!("Opened source database at {} (read-only)", path.display());
        Ok(Self {
            conn,
            path: path.to_owned(),
        })
    }

    /// Write a transactionally consistent copy of the database to `dest`.
    ///
    /// `dest` must not exist yet. On failure SQLite may leave a partial file
    /// behind; removing it is the caller's job.
    pub fn export_into(&self, dest: &Path) -> Result<()> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| Error::InvalidPath(dest.to_owned()))?;

        self.conn
            .execute("VACUUM INTO ?1", [dest_str])
            .map_err(|e| Error::Export {
                dest: dest.to_owned(),
                source: e,
            })?;

        debug!(
            "Exported {} into {}",
            self.path.display(),
            dest.display()
        );
        Ok(())
    }

    /// Path of the source database.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn missing_source_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceDb::open(dir.path().join("absent.db"), DEFAULT_BUSY_TIMEOUT)
            .err()
            .unwrap();
        assert!(matches!(err, Error::DatabaseNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn garbage_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x5a; 8192]).unwrap();

        let err = SourceDb::open(&path, DEFAULT_BUSY_TIMEOUT).err().unwrap();
        assert!(matches!(err, Error::DatabaseOpen { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn export_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.db");
        let conn = Connection::open(&src).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        drop(conn);

        let dest = dir.path().join("dest.db");
        std::fs::write(&dest, b"occupied").unwrap();

        let db = SourceDb::open(&src, DEFAULT_BUSY_TIMEOUT).unwrap();
        let err = db.export_into(&dest).err().unwrap();
        assert!(matches!(err, Error::Export { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Snapshot);
    }
}
