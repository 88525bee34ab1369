//! Row-level access to the `intentions` table. Everything here deals in
//! ciphertext and plaintext index fields only; nothing decrypts.
//!
//! Each function is a single SQL statement, so a failed write leaves the
//! table exactly as it was.

use rusqlite::{params, Row};

use crate::db::models::{Category, CategoryCount, NewStoredRecord, StoredRecord};
use crate::db::DbPool;
use crate::error::AppError;

/// Rows returned by one query. Rows whose stored columns do not map onto a
/// record (wrong storage class, unknown label) are listed in `malformed`
/// instead of failing the whole read.
#[derive(Debug, Default)]
pub struct Scan {
    pub records: Vec<StoredRecord>,
    pub malformed: Vec<i64>,
}

// ============================================================================
// Row Mappers
// ============================================================================

fn row_to_record(row: &Row) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get("id")?,
        ciphertext: row.get("ciphertext")?,
        iv: row.get("iv")?,
        timestamp: row.get("timestamp")?,
        source: row.get("source")?,
        category: row.get("category")?,
    })
}

/// `Ok(Err(id))` when the row exists but one of its columns is malformed.
fn map_row(row: &Row) -> rusqlite::Result<Result<StoredRecord, i64>> {
    match row_to_record(row) {
        Ok(record) => Ok(Ok(record)),
        Err(
            e @ (rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)),
        ) => {
            let id: i64 = row.get("id")?;
            tracing::warn!(storage_id = id, error = %e, "Malformed intention row");
            Ok(Err(id))
        }
        Err(e) => Err(e),
    }
}

fn collect(pool: &DbPool, sql: &str, params: impl rusqlite::Params) -> Result<Scan, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map_row)?;

    let mut scan = Scan::default();
    for row in rows {
        match row? {
            Ok(record) => scan.records.push(record),
            Err(id) => scan.malformed.push(id),
        }
    }
    Ok(scan)
}

// ============================================================================
// Record CRUD
// ============================================================================

/// Insert a new row and return its freshly assigned id. Ids are never reused,
/// even after the row that held them is deleted.
pub fn insert(pool: &DbPool, record: &NewStoredRecord) -> Result<i64, AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO intentions (ciphertext, iv, timestamp, source, category)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.ciphertext,
            record.iv,
            record.timestamp,
            record.source,
            record.category,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite every column of an existing row. Strict: a missing id is `NotFound`, never an upsert.
pub fn replace(pool: &DbPool, id: i64, record: &NewStoredRecord) -> Result<(), AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE intentions
         SET ciphertext = ?1, iv = ?2, timestamp = ?3, source = ?4, category = ?5
         WHERE id = ?6",
        params![
            record.ciphertext,
            record.iv,
            record.timestamp,
            record.source,
            record.category,
            id,
        ],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(format!("Intention {id}")));
    }
    Ok(())
}

/// All rows in storage order. Callers impose their own ordering.
pub fn get_all(pool: &DbPool) -> Result<Scan, AppError> {
    collect(pool, "SELECT * FROM intentions", [])
}

/// A row that exists but cannot be mapped is `DecryptionFailed`: it is as
/// unreadable to callers as one that fails authentication.
pub fn get_by_id(pool: &DbPool, id: i64) -> Result<StoredRecord, AppError> {
    let conn = pool.get()?;
    let mapped = conn
        .query_row(
            "SELECT * FROM intentions WHERE id = ?1",
            params![id],
            map_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Intention {id}")),
            other => other.into(),
        })?;
    mapped.map_err(|_| {
        AppError::DecryptionFailed(format!("Intention {id}: stored columns are malformed"))
    })
}

pub fn get_by_category(pool: &DbPool, category: Category) -> Result<Scan, AppError> {
    collect(
        pool,
        "SELECT * FROM intentions WHERE category = ?1 ORDER BY timestamp DESC",
        params![category],
    )
}

/// Returns true if a row was removed. A missing id is not an error.
pub fn delete_by_id(pool: &DbPool, id: i64) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM intentions WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Remove every row. Full reset only.
pub fn clear(pool: &DbPool) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM intentions", [])?;
    tracing::info!(rows, "All intention rows cleared");
    Ok(rows)
}

pub fn count(pool: &DbPool) -> Result<i64, AppError> {
    let conn = pool.get()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM intentions", [], |row| row.get(0))?)
}

pub fn category_counts(pool: &DbPool) -> Result<Vec<CategoryCount>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) AS n FROM intentions
         GROUP BY category ORDER BY n DESC, category ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(CategoryCount {
            category: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ============================================================================
// Tests
// ============================================================================
