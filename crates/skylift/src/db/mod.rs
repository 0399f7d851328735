//! Embedded database for durable service state.
//!
//! A single SQLite file holds the configuration table, the data source
//! declarations and the upload queue. All durable state in the service
//! lives here; everything else is reconstructable.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

pub mod config_repo;
pub mod data_source_repo;
mod error;
pub mod migrations;
pub mod queue_repo;

pub use error::DatabaseError;

/// Shared handle to the embedded database.
///
/// The connection is guarded by a mutex so watcher threads, the supervisor
/// and the per-tick upload workers can all write through the same handle.
/// Transactions are short; contention is not a concern at this scale.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if necessary) the database file and applies pending
    /// migrations. Fails loudly if the schema cannot be brought up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::DataDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_all(&conn)?;

        info!("Database ready at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database with the full schema. Test use only.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure with exclusive access to the underlying connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let guard = self.conn.lock().map_err(|_| DatabaseError::Poisoned)?;
        f(&guard)
    }
}
