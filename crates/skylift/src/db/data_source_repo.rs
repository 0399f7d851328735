//! Data source repository — rows of the `data_sources` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A declared folder to watch.
#[derive(Debug, Clone)]
pub struct DataSourceRow {
    pub name: String,
    pub folder_path: String,
    pub archive_folder_path: Option<String>,
    pub file_pattern: String,
    pub is_enabled: bool,
    pub needs_refresh: bool,
    pub created_at: i64,
}

impl DataSourceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            name: row.get("name")?,
            folder_path: row.get("folder_path")?,
            archive_folder_path: row.get("archive_folder_path")?,
            file_pattern: row.get("file_pattern")?,
            is_enabled: row.get("is_enabled")?,
            needs_refresh: row.get("needs_refresh")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new data source. Fails on duplicate name.
pub fn insert(db: &Database, source: &DataSourceRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO data_sources
             (name, folder_path, archive_folder_path, file_pattern,
              is_enabled, needs_refresh, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source.name,
                source.folder_path,
                source.archive_folder_path,
                source.file_pattern,
                source.is_enabled,
                source.needs_refresh,
                source.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing data source. All fields except `name` and
/// `created_at` are overwritten.
pub fn update(db: &Database, source: &DataSourceRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE data_sources SET folder_path=?2, archive_folder_path=?3,
             file_pattern=?4, is_enabled=?5, needs_refresh=?6
             WHERE name=?1",
            params![
                source.name,
                source.folder_path,
                source.archive_folder_path,
                source.file_pattern,
                source.is_enabled,
                source.needs_refresh,
            ],
        )?;
        Ok(())
    })
}

/// Deletes a data source by name.
pub fn delete(db: &Database, name: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM data_sources WHERE name = ?1", params![name])?;
        Ok(())
    })
}

/// Finds a data source by name.
pub fn find_by_name(db: &Database, name: &str) -> Result<Option<DataSourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM data_sources WHERE name = ?1",
                params![name],
                DataSourceRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists all data sources ordered by name so reconciliation diffs are stable.
pub fn list_all(db: &Database) -> Result<Vec<DataSourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM data_sources ORDER BY name ASC")?;
        let rows: Vec<DataSourceRow> = stmt
            .query_map([], DataSourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Clears the refresh flag after the supervisor has acted on it.
pub fn clear_needs_refresh(db: &Database, name: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE data_sources SET needs_refresh = 0 WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    })
}

/// Requests a watcher restart for the named source.
pub fn set_needs_refresh(db: &Database, name: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE data_sources SET needs_refresh = 1 WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    })
}
