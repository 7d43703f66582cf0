//! One-time provisioning. The owner role is only ever assigned here; no HTTP
//! endpoint can grant it.

use rusqlite::params;

use crate::auth::password;
use crate::state::DbPool;

pub enum CreateOwnerOutcome {
    Created,
    AlreadyExists,
}

pub fn create_owner(
    pool: &DbPool,
    username: &str,
    email: &str,
    plaintext_password: &str,
) -> anyhow::Result<CreateOwnerOutcome> {
    let conn = pool.get()?;

    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    if exists {
        return Ok(CreateOwnerOutcome::AlreadyExists);
    }

    let id = uuid::Uuid::now_v7().to_string();
    let hash = password::hash(plaintext_password)?;
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, role) VALUES (?1, ?2, ?3, ?4, 'owner')",
        params![id, username, email, hash],
    )?;

    Ok(CreateOwnerOutcome::Created)
}
