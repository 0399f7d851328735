//! Configuration repository — rows of the `configurations` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw configuration row.
#[derive(Debug, Clone)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
    pub category: String,
    pub description: String,
    pub updated_at: i64,
}

impl ConfigRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            category: row.get("category")?,
            description: row.get("description")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Finds a configuration row by key.
pub fn find(db: &Database, key: &str) -> Result<Option<ConfigRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM configurations WHERE key = ?1",
                params![key],
                ConfigRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Full upsert on `key`.
pub fn upsert(
    db: &Database,
    key: &str,
    value: &str,
    category: &str,
    description: &str,
    now: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO configurations (key, value, category, description, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 category = excluded.category,
                 description = excluded.description,
                 updated_at = excluded.updated_at",
            params![key, value, category, description, now],
        )?;
        Ok(())
    })
}

/// Inserts a row only when the key is absent. Returns true if inserted.
/// Used by bootstrap seeding, which must never overwrite operator edits.
pub fn insert_if_absent(
    db: &Database,
    key: &str,
    value: &str,
    category: &str,
    description: &str,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO configurations (key, value, category, description, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO NOTHING",
            params![key, value, category, description, now],
        )?;
        Ok(changed > 0)
    })
}

/// Returns true if a row exists for the key.
pub fn exists(db: &Database, key: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM configurations WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Lists all rows, ordered by key for stable display.
pub fn list_all(db: &Database) -> Result<Vec<ConfigRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM configurations ORDER BY key ASC")?;
        let rows: Vec<ConfigRow> = stmt
            .query_map([], ConfigRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
