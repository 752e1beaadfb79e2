// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Consistent point-in-time copies of a live SQLite database.
//!
//! The source database is owned and written by another process. This crate
//! only ever opens it read-only and asks SQLite itself for a transactionally
//! consistent copy (`VACUUM INTO`), so a snapshot taken mid-commit is never a
//! torn page set.
//!
//! # Key Features
//!
//! - Read-only source access, never `immutable=1` (the file is live)
//! - Busy timeout so rollback-journal writers delay rather than fail an export
//! - [`Artifact`] guard that removes the copy on drop, on every exit path
//! - Unique artifact names even for builds within the same millisecond
//!
//! # Example
//!
//! ```ignore
//! use snapcar_db::SnapshotBuilder;
//!
//! let builder = SnapshotBuilder::new("/var/lib/app/cache.db", "/tmp");
//! let artifact = builder.build()?;
//! println!("{} bytes at {}", artifact.size()?, artifact.path().display());
//! // artifact file is removed here
//! ```

mod connection;
mod error;
mod snapshot;

pub use connection::{DEFAULT_BUSY_TIMEOUT, SourceDb};
pub use error::{Error, ErrorKind, Result};
pub use snapshot::{Artifact, SnapshotBuilder, TIMESTAMP_FORMAT};
