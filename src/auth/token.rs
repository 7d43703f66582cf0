use rand::Rng;
use rusqlite::params;

use crate::db;
use crate::error::AppResult;
use crate::state::DbPool;

/// Fetch the user's API token, creating one on first use. One token per user;
/// repeated calls return the same token.
pub fn get_or_create(pool: &DbPool, user_id: &str) -> AppResult<String> {
    let conn = pool.get()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT token FROM auth_tokens WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(token) = existing {
        return Ok(token);
    }

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO auth_tokens (id, user_id, token) VALUES (?1, ?2, ?3)",
        params![id, user_id, token],
    ) {
        // Two first logins can race past the existence check; the per-user
        // unique constraint holds and the winner's token is the stable one
        if db::is_unique_violation(&e) {
            return Ok(conn.query_row(
                "SELECT token FROM auth_tokens WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?);
        }
        return Err(e.into());
    }

    Ok(token)
}

/// Revoke a token. Used by UI logout.
pub fn delete(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM auth_tokens WHERE token = ?1", params![token])?;
    Ok(())
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
