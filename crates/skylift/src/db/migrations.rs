//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Schema changes are declarative SQL files
//! embedded at compile time.

use rusqlite::Connection;
use tracing::info;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_configurations_table",
        sql: include_str!("sql/001_create_configurations.sql"),
    },
    Migration {
        version: 2,
        description: "create_data_sources_table",
        sql: include_str!("sql/002_create_data_sources.sql"),
    },
    Migration {
        version: 3,
        description: "create_upload_queue_table",
        sql: include_str!("sql/003_create_upload_queue.sql"),
    },
    Migration {
        version: 4,
        description: "add_content_type_to_upload_queue",
        sql: include_str!("sql/004_add_content_type.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        info!(
            "Running migration v{}: {}",
            migration.version, migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        for table in ["configurations", "data_sources", "upload_queue"] {
            let found: u32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(found, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_upload_queue_has_content_type_column() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let found = conn
            .prepare("PRAGMA table_info(upload_queue)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .any(|name| name.map(|n| n == "content_type").unwrap_or(false));
        assert!(found);
    }

    #[test]
    fn test_upload_queue_rejects_unknown_state() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO upload_queue
             (data_source_name, local_path, target_container, target_object_name,
              state, next_attempt_at, created_at, updated_at)
             VALUES ('s', '/tmp/x', 'c', 'x', 'bogus', 0, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
