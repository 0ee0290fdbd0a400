//! Schema migrations for the tasks database.
//!
//! Migrations are compiled into the binary so a deployed gateway never
//! depends on finding SQL files on disk. Applied versions are tracked in
//! `schema_versions`; pending ones run in order at startup.

use rusqlite::{params, Connection};
use tracing::info;

/// (version, name, sql) — append new entries, never edit applied ones.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "initial",
    include_str!("../../../migrations/001_initial.sql"),
)];

/// Apply all pending migrations. Call before any other database access.
pub fn run_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    let mut applied = 0;
    for (version, name, sql) in MIGRATIONS {
        let already: bool = conn
            .prepare("SELECT 1 FROM schema_versions WHERE version = ?1")?
            .exists(params![version])?;
        if already {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;

        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = name,
            "Applied migration"
        );
        applied += 1;
    }

    info!(
        component = "migrations",
        event = "migrations.complete",
        total = MIGRATIONS.len(),
        applied = applied,
        "Migration check complete"
    );

    Ok(())
}
