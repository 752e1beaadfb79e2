// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Error types for snapshot operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of a snapshot failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source database could not be opened or is not a database.
    Open,
    /// The consistent copy itself failed.
    Snapshot,
}

/// Errors that can occur while building a snapshot.
#[derive(Error, Debug)]
pub enum Error {
    /// Source database file does not exist
    #[error("Failed to open source database: no such file '{0}'")]
    DatabaseNotFound(PathBuf),

    /// Source database exists but could not be opened read-only
    #[error("Failed to open source database '{path}': {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite error outside of open/export
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The engine failed while writing the copy
    #[error("Failed to export snapshot to '{dest}': {source}")]
    Export {
        dest: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Path cannot be handed to SQLite
    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    /// Scratch directory is missing or unusable
    #[error("Scratch directory '{path}' is unusable: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Classify the error as an open or a snapshot failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DatabaseNotFound(_) | Error::DatabaseOpen { .. } => ErrorKind::Open,
            Error::Sqlite(_) | Error::Export { .. } | Error::InvalidPath(_) | Error::Scratch { .. } => {
                ErrorKind::Snapshot
            }
        }
    }
}
