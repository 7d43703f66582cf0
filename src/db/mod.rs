pub mod models;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    include_str!("../../migrations/001_initial.sql"),
)];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(8).build(manager)?;

    // Configure SQLite for performance
    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(pool)
}

/// True when an INSERT lost a race to a UNIQUE constraint. The schema holds
/// the invariant; callers recover by re-fetching the winner's row.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory pool with the full schema applied. max_size(1) so every
    /// caller shares the single in-memory database.
    pub fn pool() -> DbPool {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        drop(conn);
        run_migrations(&pool).unwrap();
        pool
    }

    /// File-backed pool for tests that need concurrent writers. Every
    /// connection gets a busy timeout so racing transactions queue instead
    /// of failing.
    pub fn file_pool(path: &Path) -> DbPool {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    /// Insert a bare user row and return its id.
    pub fn seed_user(pool: &DbPool, username: &str, role: &str) -> String {
        let conn = pool.get().unwrap();
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role)
             VALUES (?1, ?2, ?3, 'x', ?4)",
            params![id, username, format!("{}@example.com", username), role],
        )
        .unwrap();
        id
    }

    /// Insert a post for a user and return its id.
    pub fn seed_post(pool: &DbPool, user_id: &str, content: &str) -> String {
        let conn = pool.get().unwrap();
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO posts (id, user_id, content) VALUES (?1, ?2, ?3)",
            params![id, user_id, content],
        )
        .unwrap();
        id
    }
}
