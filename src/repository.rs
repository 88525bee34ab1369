//! Public CRUD surface over intentions.
//!
//! Composes the key manager, the cipher and the record store. Every write goes
//! through [`seal_record`], which derives the plaintext index columns from the
//! exact payload it encrypts, so the two can never drift apart.

use std::sync::{Mutex, OnceLock};

use serde::Serialize;

use crate::config::StoreConfig;
use crate::db::models::{
    Category, CategoryCount, ExportSnapshot, Intention, IntentionPayload, IntentionSource,
    NewStoredRecord, StoredIntention, StoredRecord, PAYLOAD_VERSION,
};
use crate::db::repos::records::{self, Scan};
use crate::db::repos::meta;
use crate::db::{self, DbPool};
use crate::engine::crypto;
use crate::engine::keys::{CorruptKeyPolicy, EncryptionKey, KeyManager, KeySlot};
use crate::error::AppError;
use crate::validation::validate_intention;

/// Result of a bulk read: everything that decrypted, plus the ids that did not.
#[derive(Debug, Default, Clone)]
pub struct ReadOutcome {
    /// Newest first.
    pub intentions: Vec<StoredIntention>,
    pub skipped: Vec<i64>,
}

/// A row whose plaintext index column disagrees with its encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMismatch {
    pub storage_id: i64,
    pub field: &'static str,
    pub indexed: String,
    pub decrypted: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub checked: usize,
    pub mismatches: Vec<IndexMismatch>,
    pub undecryptable: Vec<i64>,
}

struct Ready {
    key: EncryptionKey,
    pool: DbPool,
}

pub struct IntentionRepository {
    config: StoreConfig,
    key_manager: KeyManager,
    ready: OnceLock<Ready>,
    init_lock: Mutex<()>,
}

impl IntentionRepository {
    /// Repository using the key backend selected in `config`.
    pub fn new(config: StoreConfig) -> Result<Self, AppError> {
        let slot = config.key_slot()?;
        Ok(Self::with_key_slot(config, slot))
    }

    pub fn with_key_slot(config: StoreConfig, slot: Box<dyn KeySlot>) -> Self {
        let key_manager = KeyManager::new(slot, config.on_corrupt_key);
        Self {
            config,
            key_manager,
            ready: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Load (or create) the key, then open the store. Must succeed before any
    /// other call. Safe to call repeatedly and from several threads.
    pub fn initialize(&self) -> Result<(), AppError> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_initialized() {
            return Ok(());
        }

        let key = self.key_manager.ensure_key()?;
        let pool = db::init_db(&self.config)?;
        check_key_fingerprint(&pool, &key, self.key_manager.policy())?;

        // Only this thread can reach here while holding the guard.
        let _ = self.ready.set(Ready { key, pool });
        tracing::info!("Encrypted intention store initialized");
        Ok(())
    }

    fn ready(&self) -> Result<&Ready, AppError> {
        self.ready.get().ok_or(AppError::NotInitialized)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Encrypt and persist a new intention. Returns its storage id.
    pub fn save(&self, intention: &Intention) -> Result<i64, AppError> {
        let ready = self.ready()?;
        validate_intention(intention)?;

        let payload = IntentionPayload {
            intention: intention.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: None,
            version: PAYLOAD_VERSION.to_string(),
        };
        let record = seal_record(&ready.key, &payload)?;
        let id = records::insert(&ready.pool, &record)?;

        tracing::debug!(
            storage_id = id,
            source = %record.source,
            category = %record.category,
            "Intention saved"
        );
        Ok(id)
    }

    /// Re-encrypt the row at `storage_id` with new content under a fresh nonce.
    /// The original `createdAt` is kept whenever the previous row still decrypts.
    pub fn update(
        &self,
        storage_id: i64,
        intention: &Intention,
    ) -> Result<StoredIntention, AppError> {
        let ready = self.ready()?;
        validate_intention(intention)?;

        let previous = records::get_by_id(&ready.pool, storage_id).and_then(|existing| {
            crypto::open::<IntentionPayload>(&ready.key, &existing.ciphertext, &existing.iv)
        });
        let now = chrono::Utc::now().to_rfc3339();
        let created_at = match previous {
            Ok(previous) => previous.created_at,
            Err(e @ AppError::DecryptionFailed(_)) => {
                tracing::warn!(
                    storage_id,
                    error = %e,
                    "Previous version unreadable; createdAt reset to update time"
                );
                now.clone()
            }
            Err(e) => return Err(e),
        };

        let payload = IntentionPayload {
            intention: intention.clone(),
            created_at,
            updated_at: Some(now),
            version: PAYLOAD_VERSION.to_string(),
        };
        let record = seal_record(&ready.key, &payload)?;
        records::replace(&ready.pool, storage_id, &record)?;

        tracing::debug!(storage_id, "Intention updated");
        Ok(StoredIntention::from_payload(storage_id, payload))
    }

    /// Remove one intention. Returns false if nothing was stored under `storage_id`.
    pub fn delete(&self, storage_id: i64) -> Result<bool, AppError> {
        let ready = self.ready()?;
        let removed = records::delete_by_id(&ready.pool, storage_id)?;
        tracing::debug!(storage_id, removed, "Intention delete");
        Ok(removed)
    }

    /// Drop every stored intention. Full reset only; the key is kept.
    pub fn clear_all(&self) -> Result<usize, AppError> {
        let ready = self.ready()?;
        records::clear(&ready.pool)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Decrypt every row, skipping (and reporting) the ones that fail.
    pub fn load_all(&self) -> Result<ReadOutcome, AppError> {
        let ready = self.ready()?;
        let scan = records::get_all(&ready.pool)?;
        Ok(decrypt_rows(&ready.key, scan))
    }

    /// All readable intentions, newest first. One bad row never hides the others.
    pub fn get_all(&self) -> Result<Vec<StoredIntention>, AppError> {
        Ok(self.load_all()?.intentions)
    }

    pub fn get_by_id(&self, storage_id: i64) -> Result<StoredIntention, AppError> {
        let ready = self.ready()?;
        let row = records::get_by_id(&ready.pool, storage_id)?;
        decrypt_row(&ready.key, &row)
    }

    /// Intentions captured within `start..=end` (epoch millis), newest first.
    pub fn get_by_date_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<StoredIntention>, AppError> {
        let mut all = self.get_all()?;
        all.retain(|i| (start..=end).contains(&i.intention.timestamp));
        Ok(all)
    }

    pub fn get_by_source(&self, source: IntentionSource) -> Result<Vec<StoredIntention>, AppError> {
        let mut all = self.get_all()?;
        all.retain(|i| i.intention.source == source);
        Ok(all)
    }

    /// Uses the category index, so only matching rows are decrypted.
    pub fn get_by_category(&self, category: Category) -> Result<Vec<StoredIntention>, AppError> {
        let ready = self.ready()?;
        let scan = records::get_by_category(&ready.pool, category)?;
        Ok(decrypt_rows(&ready.key, scan).intentions)
    }

    /// Row count from the plaintext index; includes rows that may not decrypt.
    pub fn count(&self) -> Result<i64, AppError> {
        let ready = self.ready()?;
        records::count(&ready.pool)
    }

    pub fn category_counts(&self) -> Result<Vec<CategoryCount>, AppError> {
        let ready = self.ready()?;
        records::category_counts(&ready.pool)
    }

    /// Re-derive the index columns from each decrypted payload and report disagreements.
    pub fn verify_index_consistency(&self) -> Result<IndexReport, AppError> {
        let ready = self.ready()?;
        let scan = records::get_all(&ready.pool)?;

        let mut report = IndexReport {
            undecryptable: scan.malformed,
            ..IndexReport::default()
        };
        for row in &scan.records {
            let decrypted = match decrypt_row(&ready.key, row) {
                Ok(d) => d,
                Err(_) => {
                    report.undecryptable.push(row.id);
                    continue;
                }
            };
            report.checked += 1;
            report.mismatches.extend(index_mismatches(row, &decrypted.intention));
        }

        if !report.mismatches.is_empty() {
            tracing::warn!(
                mismatches = report.mismatches.len(),
                "Index columns disagree with encrypted payloads"
            );
        }
        Ok(report)
    }

    /// Plaintext snapshot for a user-initiated backup. Nothing is written anywhere.
    pub fn export_all(&self) -> Result<ExportSnapshot, AppError> {
        let intentions = self.get_all()?;
        tracing::info!(count = intentions.len(), "Exporting decrypted snapshot");
        Ok(ExportSnapshot::new(intentions))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// The one place ciphertext and index columns are produced together.
fn seal_record(key: &EncryptionKey, payload: &IntentionPayload) -> Result<NewStoredRecord, AppError> {
    let sealed = crypto::seal(key, payload)?;
    Ok(NewStoredRecord {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv.to_vec(),
        timestamp: payload.intention.timestamp,
        source: payload.intention.source,
        category: payload.intention.category,
    })
}

fn decrypt_row(key: &EncryptionKey, row: &StoredRecord) -> Result<StoredIntention, AppError> {
    let payload: IntentionPayload = crypto::open(key, &row.ciphertext, &row.iv)?;
    Ok(StoredIntention::from_payload(row.id, payload))
}

fn decrypt_rows(key: &EncryptionKey, scan: Scan) -> ReadOutcome {
    let seed = ReadOutcome {
        intentions: Vec::with_capacity(scan.records.len()),
        skipped: scan.malformed,
    };
    let mut outcome = scan
        .records
        .iter()
        .fold(seed, |mut acc, row| {
            match decrypt_row(key, row) {
                Ok(intention) => acc.intentions.push(intention),
                Err(e) => {
                    tracing::warn!(storage_id = row.id, error = %e, "Skipping undecryptable intention");
                    acc.skipped.push(row.id);
                }
            }
            acc
        });
    sort_newest_first(&mut outcome.intentions);
    outcome
}

fn sort_newest_first(intentions: &mut [StoredIntention]) {
    intentions.sort_by(|a, b| {
        b.intention
            .timestamp
            .cmp(&a.intention.timestamp)
            .then_with(|| b.storage_id.cmp(&a.storage_id))
    });
}

fn index_mismatches(row: &StoredRecord, decrypted: &Intention) -> Vec<IndexMismatch> {
    let mut out = Vec::new();
    if row.timestamp != decrypted.timestamp {
        out.push(IndexMismatch {
            storage_id: row.id,
            field: "timestamp",
            indexed: row.timestamp.to_string(),
            decrypted: decrypted.timestamp.to_string(),
        });
    }
    if row.source != decrypted.source {
        out.push(IndexMismatch {
            storage_id: row.id,
            field: "source",
            indexed: row.source.to_string(),
            decrypted: decrypted.source.to_string(),
        });
    }
    if row.category != decrypted.category {
        out.push(IndexMismatch {
            storage_id: row.id,
            field: "category",
            indexed: row.category.to_string(),
            decrypted: decrypted.category.to_string(),
        });
    }
    out
}

/// Compare the loaded key against the one recorded at first use. A mismatch
/// over a non-empty store means every existing row is unreadable.
fn check_key_fingerprint(
    pool: &DbPool,
    key: &EncryptionKey,
    policy: CorruptKeyPolicy,
) -> Result<(), AppError> {
    let current = key.fingerprint();
    match meta::get(pool, meta::KEY_FINGERPRINT)? {
        Some(previous) if previous == current => return Ok(()),
        Some(previous) => {
            let rows = records::count(pool)?;
            if rows > 0 {
                if policy == CorruptKeyPolicy::Fail {
                    return Err(AppError::KeyRecoveryNeeded(format!(
                        "store holds {rows} records written under key {previous}, \
                         but the loaded key is {current}"
                    )));
                }
                tracing::error!(
                    %previous,
                    %current,
                    rows,
                    "Encryption key changed; existing records cannot be decrypted"
                );
            }
        }
        None => {}
    }
    meta::set(pool, meta::KEY_FINGERPRINT, &current)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine as _;
    use proptest::prelude::*;
    use rusqlite::params;
    use tempfile::TempDir;

    use super::*;
    use crate::db::models::Confidence;
    use crate::engine::keys::{FileKeySlot, MemoryKeySlot};

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            pool_max_size: 2,
            ..StoreConfig::in_dir(dir.path())
        }
    }

    fn test_repo() -> (TempDir, IntentionRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = IntentionRepository::new(test_config(&dir)).unwrap();
        repo.initialize().unwrap();
        (dir, repo)
    }

    fn intention(text: &str, timestamp: i64) -> Intention {
        Intention::manual(text, timestamp, Category::General)
    }

    fn pool(repo: &IntentionRepository) -> &DbPool {
        &repo.ready().unwrap().pool
    }

    fn corrupt_ciphertext(repo: &IntentionRepository, id: i64) {
        let conn = pool(repo).get().unwrap();
        let mut ciphertext: Vec<u8> = conn
            .query_row("SELECT ciphertext FROM intentions WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        ciphertext[0] ^= 0x01;
        conn.execute(
            "UPDATE intentions SET ciphertext = ?1 WHERE id = ?2",
            params![ciphertext, id],
        )
        .unwrap();
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn test_save_before_initialize_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = IntentionRepository::new(test_config(&dir)).unwrap();

        let err = repo.save(&intention("Learn Rust", 1000)).unwrap_err();
        assert!(matches!(err, AppError::NotInitialized));
        assert!(matches!(repo.get_all().unwrap_err(), AppError::NotInitialized));
        assert!(matches!(repo.delete(1).unwrap_err(), AppError::NotInitialized));
        assert!(matches!(repo.export_all().unwrap_err(), AppError::NotInitialized));

        repo.initialize().unwrap();
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, repo) = test_repo();
        let id = repo.save(&intention("first", 1)).unwrap();
        repo.initialize().unwrap();
        repo.initialize().unwrap();
        assert_eq!(repo.get_by_id(id).unwrap().intention.text, "first");
    }

    #[test]
    fn test_concurrent_initialize_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(IntentionRepository::new(test_config(&dir)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    repo.initialize().unwrap();
                    repo.save(&intention(&format!("thread {i}"), i)).unwrap()
                })
            })
            .collect();
        let mut ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 8);
        assert_eq!(repo.get_all().unwrap().len(), 8);
    }

    #[test]
    fn test_key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let repo = IntentionRepository::new(test_config(&dir)).unwrap();
            repo.initialize().unwrap();
            repo.save(&intention("Learn Rust", 1000)).unwrap()
        };

        // Second start: key reloaded from the slot, not regenerated.
        let key = KeyManager::new(
            Box::new(FileKeySlot::new(test_config(&dir).key_path())),
            CorruptKeyPolicy::Fail,
        )
        .ensure_key()
        .unwrap();
        let repo = IntentionRepository::new(test_config(&dir)).unwrap();
        repo.initialize().unwrap();

        let row = records::get_by_id(pool(&repo), id).unwrap();
        let payload: IntentionPayload = crypto::open(&key, &row.ciphertext, &row.iv).unwrap();
        assert_eq!(payload.intention.text, "Learn Rust");
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_key_with_strict_policy_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            on_corrupt_key: CorruptKeyPolicy::Fail,
            ..test_config(&dir)
        };
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.key_path(), "garbage").unwrap();

        let repo = IntentionRepository::new(config.clone()).unwrap();
        let err = repo.initialize().unwrap_err();
        assert_eq!(err.kind(), "key_recovery_needed");
        assert!(!repo.is_initialized());
        assert_eq!(std::fs::read_to_string(config.key_path()).unwrap(), "garbage");
    }

    #[test]
    fn test_corrupt_key_regenerates_and_orphans_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        {
            let repo = IntentionRepository::new(config.clone()).unwrap();
            repo.initialize().unwrap();
            repo.save(&intention("written under the first key", 1)).unwrap();
        }
        std::fs::write(config.key_path(), "not base64 at all!").unwrap();

        let repo = IntentionRepository::new(config.clone()).unwrap();
        repo.initialize().unwrap();

        let outcome = repo.load_all().unwrap();
        assert!(outcome.intentions.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(repo.count().unwrap(), 1);

        // New rows work under the new key.
        repo.save(&intention("after regeneration", 2)).unwrap();
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_binary_key_file_is_regenerated_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.key_path(), [0xFF, 0xFE, 0x00, 0x80, 0xC3]).unwrap();

        let repo = IntentionRepository::new(config).unwrap();
        repo.initialize().unwrap();
        let id = repo.save(&intention("fresh start", 1)).unwrap();
        assert_eq!(repo.get_by_id(id).unwrap().intention.text, "fresh start");
    }

    #[test]
    fn test_swapped_key_with_strict_policy_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            on_corrupt_key: CorruptKeyPolicy::Fail,
            ..test_config(&dir)
        };
        {
            let repo = IntentionRepository::new(config.clone()).unwrap();
            repo.initialize().unwrap();
            repo.save(&intention("kept safe", 1)).unwrap();
        }
        let other = EncryptionKey::generate();
        std::fs::write(config.key_path(), B64.encode(other.as_bytes())).unwrap();

        let repo = IntentionRepository::new(config).unwrap();
        assert_eq!(repo.initialize().unwrap_err().kind(), "key_recovery_needed");
    }

    #[test]
    fn test_fingerprint_recorded_on_first_start() {
        let dir = tempfile::tempdir().unwrap();
        let repo = IntentionRepository::with_key_slot(
            test_config(&dir),
            Box::new(MemoryKeySlot::new()),
        );
        repo.initialize().unwrap();

        let stored = meta::get(pool(&repo), meta::KEY_FINGERPRINT).unwrap().unwrap();
        assert_eq!(stored, repo.ready().unwrap().key.fingerprint());
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    #[test]
    fn test_crud_scenario() {
        let (_dir, repo) = test_repo();

        let k = repo
            .save(&Intention::manual("Learn Rust", 1000, Category::Learning))
            .unwrap();

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].storage_id, k);
        assert_eq!(all[0].intention.text, "Learn Rust");
        assert_eq!(all[0].version, "1.0");
        assert!(all[0].updated_at.is_none());

        repo.update(k, &Intention::manual("Learn Rust basics", 1000, Category::Learning))
            .unwrap();
        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].storage_id, k);
        assert_eq!(all[0].intention.text, "Learn Rust basics");

        assert!(repo.delete(k).unwrap());
        assert!(repo.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_update_uses_fresh_iv_and_keeps_created_at() {
        let (_dir, repo) = test_repo();
        let id = repo.save(&intention("same text", 5)).unwrap();
        let before_row = records::get_by_id(pool(&repo), id).unwrap();
        let before = repo.get_by_id(id).unwrap();

        // Identical content: only the nonce can make the ciphertext differ.
        let updated = repo.update(id, &intention("same text", 5)).unwrap();
        let after_row = records::get_by_id(pool(&repo), id).unwrap();

        assert_ne!(before_row.iv, after_row.iv);
        assert_ne!(before_row.ciphertext, after_row.ciphertext);
        assert_eq!(updated.created_at, before.created_at);
        assert!(updated.updated_at.is_some());
        assert_eq!(repo.get_by_id(id).unwrap(), updated);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let (_dir, repo) = test_repo();
        let err = repo.update(404, &intention("ghost", 1)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_update_over_corrupt_row_repairs_it() {
        let (_dir, repo) = test_repo();
        let id = repo.save(&intention("original", 1)).unwrap();
        corrupt_ciphertext(&repo, id);
        assert!(repo.get_by_id(id).is_err());

        let repaired = repo.update(id, &intention("rewritten", 1)).unwrap();
        assert_eq!(repaired.updated_at.as_deref(), Some(repaired.created_at.as_str()));
        assert_eq!(repo.get_by_id(id).unwrap().intention.text, "rewritten");
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let (_dir, repo) = test_repo();
        repo.save(&intention("stay", 1)).unwrap();
        assert!(!repo.delete(9999).unwrap());
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_validation_rejects_and_writes_nothing() {
        let (_dir, repo) = test_repo();

        for bad in [
            intention("", 1),
            intention("   ", 1),
            intention(&"x".repeat(281), 1),
            intention("negative time", -1),
        ] {
            assert_eq!(repo.save(&bad).unwrap_err().kind(), "validation");
        }
        assert_eq!(repo.count().unwrap(), 0);

        let id = repo.save(&intention("valid", 1)).unwrap();
        assert_eq!(repo.update(id, &intention("", 1)).unwrap_err().kind(), "validation");
        assert_eq!(repo.get_by_id(id).unwrap().intention.text, "valid");
    }

    #[test]
    fn test_voice_fields_roundtrip() {
        let (_dir, repo) = test_repo();
        let voice = Intention {
            text: "I want to start journaling every night".into(),
            timestamp: 1_700_000_000_000,
            source: IntentionSource::Voice,
            category: Category::Personal,
            confidence: Some(Confidence::Label("91%".into())),
        };
        let id = repo.save(&voice).unwrap();
        assert_eq!(repo.get_by_id(id).unwrap().intention, voice);
    }

    #[test]
    fn test_numeric_confidence_is_bit_exact() {
        let (_dir, repo) = test_repo();
        let score = 0.9856906946328695_f64;
        let voice = Intention {
            source: IntentionSource::Voice,
            confidence: Some(Confidence::Score(score)),
            ..intention("drink more water", 7)
        };
        let id = repo.save(&voice).unwrap();

        match repo.get_by_id(id).unwrap().intention.confidence {
            Some(Confidence::Score(back)) => assert_eq!(back.to_bits(), score.to_bits()),
            other => panic!("unexpected confidence {other:?}"),
        }
    }

    #[test]
    fn test_clear_all() {
        let (_dir, repo) = test_repo();
        for ts in 0..3 {
            repo.save(&intention("note", ts)).unwrap();
        }
        assert_eq!(repo.clear_all().unwrap(), 3);
        assert!(repo.get_all().unwrap().is_empty());
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    #[test]
    fn test_get_all_is_newest_first() {
        let (_dir, repo) = test_repo();
        for ts in [100, 300, 200] {
            repo.save(&intention(&format!("at {ts}"), ts)).unwrap();
        }
        let timestamps: Vec<i64> = repo
            .get_all()
            .unwrap()
            .iter()
            .map(|i| i.intention.timestamp)
            .collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn test_one_corrupt_row_does_not_hide_the_rest() {
        let (_dir, repo) = test_repo();
        let ids: Vec<i64> = (0..5)
            .map(|ts| repo.save(&intention(&format!("note {ts}"), ts)).unwrap())
            .collect();
        corrupt_ciphertext(&repo, ids[2]);

        let outcome = repo.load_all().unwrap();
        assert_eq!(outcome.intentions.len(), 4);
        assert_eq!(outcome.skipped, vec![ids[2]]);
        assert!(outcome.intentions.iter().all(|i| i.storage_id != ids[2]));
        assert_eq!(repo.get_all().unwrap().len(), 4);

        assert_eq!(repo.get_by_id(ids[2]).unwrap_err().kind(), "decryption_failed");
    }

    #[test]
    fn test_row_with_wrong_column_type_does_not_hide_the_rest() {
        let (_dir, repo) = test_repo();
        let ids: Vec<i64> = (1..=3)
            .map(|ts| repo.save(&intention(&format!("note {ts}"), ts)).unwrap())
            .collect();
        pool(&repo)
            .get()
            .unwrap()
            .execute(
                "UPDATE intentions SET ciphertext = 'garbage' WHERE id = ?1",
                params![ids[1]],
            )
            .unwrap();

        let outcome = repo.load_all().unwrap();
        assert_eq!(
            outcome.intentions.iter().map(|i| i.storage_id).collect::<Vec<_>>(),
            vec![ids[2], ids[0]]
        );
        assert_eq!(outcome.skipped, vec![ids[1]]);
        assert_eq!(repo.get_by_id(ids[1]).unwrap_err().kind(), "decryption_failed");

        let report = repo.verify_index_consistency().unwrap();
        assert_eq!(report.undecryptable, vec![ids[1]]);
        assert_eq!(report.checked, 2);

        // Writing over the malformed row brings it back.
        repo.update(ids[1], &intention("rewritten", 2)).unwrap();
        assert_eq!(repo.get_all().unwrap().len(), 3);
    }

    #[test]
    fn test_tampered_iv_is_skipped() {
        let (_dir, repo) = test_repo();
        let keep = repo.save(&intention("keep", 1)).unwrap();
        let bad = repo.save(&intention("bad", 2)).unwrap();
        pool(&repo)
            .get()
            .unwrap()
            .execute(
                "UPDATE intentions SET iv = ?1 WHERE id = ?2",
                params![vec![0u8; 12], bad],
            )
            .unwrap();

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].storage_id, keep);
    }

    #[test]
    fn test_filters() {
        let (_dir, repo) = test_repo();
        repo.save(&Intention::manual("read a book", 100, Category::Learning)).unwrap();
        repo.save(&Intention {
            source: IntentionSource::Voice,
            ..Intention::manual("go to the gym", 200, Category::Health)
        })
        .unwrap();
        repo.save(&Intention::manual("budget review", 300, Category::Finance)).unwrap();

        let range: Vec<i64> = repo
            .get_by_date_range(100, 200)
            .unwrap()
            .iter()
            .map(|i| i.intention.timestamp)
            .collect();
        assert_eq!(range, vec![200, 100]);
        assert!(repo.get_by_date_range(400, 500).unwrap().is_empty());

        let voice = repo.get_by_source(IntentionSource::Voice).unwrap();
        assert_eq!(voice.len(), 1);
        assert_eq!(voice[0].intention.text, "go to the gym");

        let finance = repo.get_by_category(Category::Finance).unwrap();
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].intention.text, "budget review");

        let counts = repo.category_counts().unwrap();
        assert_eq!(counts.len(), 3);
        assert!(counts.iter().all(|c| c.count == 1));
    }

    #[test]
    fn test_export_all() {
        let (_dir, repo) = test_repo();
        repo.save(&intention("older", 1)).unwrap();
        repo.save(&intention("newer", 2)).unwrap();

        let snapshot = repo.export_all().unwrap();
        assert_eq!(snapshot.version, "1.0");
        assert_eq!(snapshot.intentions_count, 2);
        assert_eq!(snapshot.intentions[0].intention.text, "newer");

        let json: serde_json::Value =
            serde_json::from_str(&snapshot.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["intentionsCount"], 2);
        assert_eq!(json["intentions"][0]["text"], "newer");
        assert!(json["intentions"][0]["storageId"].is_i64());
        assert!(json["intentions"][0]["createdAt"].is_string());
    }

    #[test]
    fn test_verify_detects_drifted_index() {
        let (_dir, repo) = test_repo();
        let id = repo.save(&Intention::manual("plan trip", 10, Category::Personal)).unwrap();
        let broken = repo.save(&intention("unreadable", 20)).unwrap();
        corrupt_ciphertext(&repo, broken);

        assert!(repo.verify_index_consistency().unwrap().mismatches.is_empty());

        pool(&repo)
            .get()
            .unwrap()
            .execute(
                "UPDATE intentions SET category = 'finance' WHERE id = ?1",
                params![id],
            )
            .unwrap();

        let report = repo.verify_index_consistency().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.undecryptable, vec![broken]);
        assert_eq!(
            report.mismatches,
            vec![IndexMismatch {
                storage_id: id,
                field: "category",
                indexed: "finance".into(),
                decrypted: "personal".into(),
            }]
        );
    }

    fn arb_intention() -> impl Strategy<Value = Intention> {
        (
            "[a-zA-Z0-9 ]{1,60}",
            0i64..4_000_000_000_000,
            proptest::sample::select(IntentionSource::ALL.to_vec()),
            proptest::sample::select(Category::ALL.to_vec()),
        )
            .prop_filter("text must not be blank", |(t, ..)| !t.trim().is_empty())
            .prop_map(|(text, timestamp, source, category)| Intention {
                text,
                timestamp,
                source,
                category,
                confidence: None,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_index_columns_match_payload(batch in proptest::collection::vec(arb_intention(), 1..8)) {
            let (_dir, repo) = test_repo();
            for item in &batch {
                repo.save(item).unwrap();
            }
            // Overwrite the first row with a differently indexed value.
            let first = repo.get_all().unwrap()[0].storage_id;
            repo.update(first, &batch[batch.len() - 1]).unwrap();

            for row in records::get_all(pool(&repo)).unwrap().records {
                let decrypted = decrypt_row(&repo.ready().unwrap().key, &row).unwrap();
                prop_assert_eq!(row.timestamp, decrypted.intention.timestamp);
                prop_assert_eq!(row.source, decrypted.intention.source);
                prop_assert_eq!(row.category, decrypted.intention.category);
            }
            let report = repo.verify_index_consistency().unwrap();
            prop_assert!(report.mismatches.is_empty());
            prop_assert_eq!(report.checked, batch.len());
        }
    }
}
