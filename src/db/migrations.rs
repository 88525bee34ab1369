use rusqlite::Connection;

use crate::error::AppError;

/// Current on-disk schema, stamped into `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the schema if absent. Idempotent.
///
/// A database stamped by a newer build is refused rather than touched;
/// there is no downgrade path.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(AppError::StorageUnavailable(format!(
            "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    conn.execute_batch(&format!(
        "BEGIN;\n{SCHEMA}\nPRAGMA user_version = {SCHEMA_VERSION};\nCOMMIT;"
    ))?;

    tracing::info!(version = SCHEMA_VERSION, "Database migrations complete");
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i64, AppError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Intentions: opaque AES-GCM blob plus a plaintext projection for indexing
-- ============================================================================

CREATE TABLE IF NOT EXISTS intentions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ciphertext  BLOB    NOT NULL,
    iv          BLOB    NOT NULL CHECK(length(iv) = 12),
    timestamp   INTEGER NOT NULL,
    source      TEXT    NOT NULL CHECK(source IN ('manual', 'voice')),
    category    TEXT    NOT NULL DEFAULT 'general' CHECK(category IN (
                    'learning', 'health', 'career', 'creativity',
                    'relationships', 'finance', 'personal', 'general'))
);
CREATE INDEX IF NOT EXISTS idx_intentions_timestamp ON intentions(timestamp);
CREATE INDEX IF NOT EXISTS idx_intentions_source    ON intentions(source);
CREATE INDEX IF NOT EXISTS idx_intentions_category  ON intentions(category);

-- ============================================================================
-- Store metadata (key fingerprint and similar bookkeeping, never secrets)
-- ============================================================================

CREATE TABLE IF NOT EXISTS store_meta (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
