//! Bookkeeping values stored beside the records. Never holds secrets.

use rusqlite::{params, OptionalExtension};

use crate::db::DbPool;
use crate::error::AppError;

/// SHA-256 fingerprint of the key the existing rows were written under.
pub const KEY_FINGERPRINT: &str = "key_fingerprint";

pub fn get(pool: &DbPool, name: &str) -> Result<Option<String>, AppError> {
    let conn = pool.get()?;
    Ok(conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert or overwrite `name`, stamping the change time.
pub fn set(pool: &DbPool, name: &str, value: &str) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO store_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![name, value, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
