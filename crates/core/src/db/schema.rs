//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "users and user metadata",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            login           TEXT    NOT NULL UNIQUE CHECK (trim(login) <> ''),
            email           TEXT    NOT NULL DEFAULT '',
            password_hash   TEXT    NOT NULL,
            display_name    TEXT    NOT NULL DEFAULT '',
            registered_at   TEXT    NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (email COLLATE NOCASE)
            WHERE email <> '';

        CREATE TABLE IF NOT EXISTS user_meta (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            meta_key    TEXT    NOT NULL,
            meta_value  TEXT    NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_user_meta_user_id ON user_meta (user_id);
        CREATE INDEX IF NOT EXISTS idx_user_meta_key_value ON user_meta (meta_key, meta_value);
        "#,
    ),
    (
        2,
        "tenant partitions and option tables",
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL
        );

        INSERT OR IGNORE INTO tenants (id, created_at)
            VALUES ('main', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));

        CREATE TABLE IF NOT EXISTS options (
            tenant_id     TEXT NOT NULL REFERENCES tenants (id) ON DELETE CASCADE,
            option_name   TEXT NOT NULL,
            option_value  TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (tenant_id, option_name)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
