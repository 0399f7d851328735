//! Data source service — CRUD over watched-folder declarations.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::data_source_repo::{self, DataSourceRow};
use crate::db::{Database, DatabaseError};

/// Fields an operator supplies when declaring a folder to watch.
#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub folder_path: String,
    pub archive_folder_path: Option<String>,
    pub file_pattern: Option<String>,
    pub is_enabled: bool,
}

#[derive(Clone)]
pub struct DataSourceService {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl DataSourceService {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Declares a new source. The file pattern defaults to match-all.
    pub fn create(&self, source: NewDataSource) -> Result<DataSourceRow, DatabaseError> {
        let row = DataSourceRow {
            name: source.name,
            folder_path: source.folder_path,
            archive_folder_path: source.archive_folder_path,
            file_pattern: source
                .file_pattern
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "*".to_string()),
            is_enabled: source.is_enabled,
            needs_refresh: false,
            created_at: self.clock.now_millis(),
        };
        data_source_repo::insert(&self.db, &row)?;
        Ok(row)
    }

    /// Overwrites a source's mutable fields. Callers set `needs_refresh`
    /// on the row when the running watcher should pick up the change.
    pub fn update(&self, row: &DataSourceRow) -> Result<(), DatabaseError> {
        data_source_repo::update(&self.db, row)
    }

    pub fn delete(&self, name: &str) -> Result<(), DatabaseError> {
        data_source_repo::delete(&self.db, name)
    }

    pub fn get(&self, name: &str) -> Result<Option<DataSourceRow>, DatabaseError> {
        data_source_repo::find_by_name(&self.db, name)
    }

    /// Full set, ordered by name ascending for stable reconciliation.
    pub fn list_all(&self) -> Result<Vec<DataSourceRow>, DatabaseError> {
        data_source_repo::list_all(&self.db)
    }

    /// Supervisor acknowledgement after acting on the refresh flag.
    pub fn clear_needs_refresh(&self, name: &str) -> Result<(), DatabaseError> {
        data_source_repo::clear_needs_refresh(&self.db, name)
    }

    /// Operator request for a watcher restart by the next tick.
    pub fn request_refresh(&self, name: &str) -> Result<(), DatabaseError> {
        data_source_repo::set_needs_refresh(&self.db, name)
    }
}
