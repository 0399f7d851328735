//! Failure modes of the embedded store.

use std::path::PathBuf;
use thiserror::Error;

/// Everything the persistence layer can report. Startup is the only
/// place these are fatal; per-tick callers log and retry next tick.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A statement or connection-level failure inside SQLite.
    #[error("Store operation failed: {0}")]
    Store(#[from] rusqlite::Error),

    /// The directory holding the database file could not be prepared.
    #[error("Cannot prepare data directory '{path}': {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema migration did not apply; the process must not continue
    /// on a half-migrated store.
    #[error("Schema migration v{version} did not apply: {reason}")]
    Migration { version: u32, reason: String },

    /// A thread panicked while holding the connection.
    #[error("Store connection poisoned by a panicked thread")]
    Poisoned,
}
