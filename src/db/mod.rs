pub mod migrations;
pub mod models;
pub mod repos;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::StoreConfig;
use crate::error::AppError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Connection customizer that sets per-connection SQLite pragmas.
#[derive(Debug)]
struct SqlitePragmaCustomizer {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<rusqlite::Connection, rusqlite::Error> for SqlitePragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        // secure_delete overwrites freed pages so removed ciphertext does not linger in the file.
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};
             PRAGMA synchronous = NORMAL;
             PRAGMA secure_delete = ON;",
            self.busy_timeout_ms
        ))?;
        Ok(())
    }
}

/// Open (creating if absent) the record database and bring its schema up to date.
pub fn init_db(config: &StoreConfig) -> Result<DbPool, AppError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();

    tracing::info!(path = %db_path.display(), "Initializing database");

    let manager = SqliteConnectionManager::file(&db_path);
    let pool = Pool::builder()
        .max_size(config.pool_max_size.max(1))
        .connection_customizer(Box::new(SqlitePragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(manager)?;

    {
        let conn = pool.get()?;
        // journal_mode is persistent and database-wide, unlike the per-connection pragmas.
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrations::run(&conn)?;
    }

    tracing::info!(pool_size = config.pool_max_size, "Record store ready");
    Ok(pool)
}

/// Fresh database in its own temp directory. Keep the `TempDir` alive for the test's duration.
#[cfg(test)]
pub fn init_test_db() -> Result<(tempfile::TempDir, DbPool), AppError> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig {
        pool_max_size: 2,
        ..StoreConfig::in_dir(dir.path())
    };
    let pool = init_db(&config)?;
    Ok((dir, pool))
}
