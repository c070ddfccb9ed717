//! Local SQLite database layer for The Small Workbench.
//!
//! Uses rusqlite with WAL mode. Holds workstation-local settings and the
//! generation audit log; order and line-item data is never cached here — the
//! admin dashboard stays the single source of truth for rows.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{app_data_dir}/workbench.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join("workbench.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn mark_version(conn: &Connection, version: i32) -> Result<(), String> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![version],
    )
    .map_err(|e| format!("mark schema v{version}: {e}"))?;
    Ok(())
}

/// v1: workstation-local settings.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key      TEXT NOT NULL,
            setting_value    TEXT,
            updated_at       TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );",
    )
    .map_err(|e| format!("migrate v1: {e}"))?;
    mark_version(conn, 1)
}

/// v2: audit log of barcode generations performed on this workstation.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS generation_log (
            id          TEXT PRIMARY KEY,
            row_id      TEXT NOT NULL,
            order_id    TEXT NOT NULL,
            content     TEXT NOT NULL,
            symbology   TEXT NOT NULL,
            persisted   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_generation_log_order
            ON generation_log (order_id, created_at);",
    )
    .map_err(|e| format!("migrate v2: {e}"))?;
    mark_version(conn, 2)
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a setting, or `None` when unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Generation audit log
// ---------------------------------------------------------------------------

/// Append one generation to the audit log.
pub fn record_generation(
    conn: &Connection,
    row_id: &str,
    order_id: &str,
    content: &str,
    symbology: &str,
    persisted: bool,
) -> Result<String, String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO generation_log (id, row_id, order_id, content, symbology, persisted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, row_id, order_id, content, symbology, persisted as i64],
    )
    .map_err(|e| format!("record_generation: {e}"))?;
    Ok(id)
}

/// Mark a logged generation as persisted once the update call confirms.
pub fn mark_generation_persisted(conn: &Connection, id: &str) -> Result<(), String> {
    conn.execute(
        "UPDATE generation_log SET persisted = 1 WHERE id = ?1",
        params![id],
    )
    .map_err(|e| format!("mark_generation_persisted: {e}"))?;
    Ok(())
}

/// Most recent generations for an order, newest first.
pub fn recent_generations(
    conn: &Connection,
    order_id: &str,
    limit: i64,
) -> Result<Vec<serde_json::Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT row_id, content, symbology, persisted, created_at
             FROM generation_log
             WHERE order_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![order_id, limit], |row| {
            Ok(serde_json::json!({
                "rowId": row.get::<_, String>(0)?,
                "content": row.get::<_, String>(1)?,
                "symbology": row.get::<_, String>(2)?,
                "persisted": row.get::<_, i64>(3)? != 0,
                "createdAt": row.get::<_, String>(4)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        // WAL is a no-op in memory but the rest of the pragmas apply.
        configure(&conn).unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_conn();
        run_migrations(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_setting_roundtrip() {
        let conn = test_conn();
        assert!(get_setting(&conn, "local", "recent_orders_cache").is_none());
        set_setting(&conn, "local", "recent_orders_cache", "[]").unwrap();
        assert_eq!(
            get_setting(&conn, "local", "recent_orders_cache").as_deref(),
            Some("[]")
        );
        set_setting(&conn, "local", "recent_orders_cache", "[1]").unwrap();
        assert_eq!(
            get_setting(&conn, "local", "recent_orders_cache").as_deref(),
            Some("[1]")
        );
    }

    #[test]
    fn test_generation_log_roundtrip() {
        let conn = test_conn();
        let id =
            record_generation(&conn, "li-1", "O-1", "SO-100-Widget-li-1", "code128", false).unwrap();
        mark_generation_persisted(&conn, &id).unwrap();

        let rows = recent_generations(&conn, "O-1", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["rowId"], "li-1");
        assert_eq!(rows[0]["persisted"], true);

        assert!(recent_generations(&conn, "O-2", 10).unwrap().is_empty());
    }
}
