//! Lifecycle of the single symmetric key that protects every stored intention.
//!
//! The key lives in exactly one durable slot outside the record database. It is
//! generated once, reloaded on every start, and never rotated or exported.
//!
//! SHARP EDGE: there is no escrow. If the slot is wiped or overwritten, every
//! existing record becomes permanently undecryptable. With
//! [`CorruptKeyPolicy::Regenerate`] a slot holding an unparsable value is
//! treated as empty and silently replaced, orphaning the old records.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::AppError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// 256-bit AEAD key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short, non-reversible identifier safe to log or persist next to the data.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }

    fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(B64.encode(self.0))
    }

    fn decode(raw: &[u8]) -> Result<Self, String> {
        let encoded = std::str::from_utf8(raw).map_err(|e| format!("not valid UTF-8: {e}"))?;
        let bytes = Zeroizing::new(
            B64.decode(encoded.trim())
                .map_err(|e| format!("not valid base64: {e}"))?,
        );
        if bytes.len() != KEY_LEN {
            return Err(format!(
                "wrong length: {} (expected {KEY_LEN})",
                bytes.len()
            ));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncryptionKey")
            .field(&format_args!("fp:{}", self.fingerprint()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Durable slots
// ---------------------------------------------------------------------------

/// One durable value holding the encoded key.
pub trait KeySlot: Send + Sync {
    /// Raw stored bytes, or `Ok(None)` when nothing has been stored yet. An
    /// `Err` means the slot exists but could not be read, which is NOT the same
    /// as absent. Whether the bytes form a valid key is decided by the caller.
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, AppError>;

    fn store(&self, encoded: &str) -> Result<(), AppError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Base64 key in a standalone file next to (never inside) the database.
#[derive(Debug, Clone)]
pub struct FileKeySlot {
    path: PathBuf,
}

impl FileKeySlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySlot for FileKeySlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, AppError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(Zeroizing::new(raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::KeyUnavailable(format!(
                "Failed reading key file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, encoded: &str) -> Result<(), AppError> {
        let write_err = |e: std::io::Error| {
            AppError::KeyUnavailable(format!(
                "Failed writing key file {}: {e}",
                self.path.display()
            ))
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        // Write-then-rename so a crash never leaves a half-written key behind.
        let tmp = self.path.with_extension("key.tmp");
        {
            let mut opts = fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(0o600);
            }
            let mut file = opts.open(&tmp).map_err(write_err)?;
            file.write_all(encoded.as_bytes()).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Process-local slot. Loses the key on exit, so only suitable for tests and
/// throwaway stores.
#[derive(Debug, Default)]
pub struct MemoryKeySlot {
    value: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryKeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the slot with an arbitrary (possibly corrupt) encoded value.
    pub fn with_value(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Mutex::new(Some(Zeroizing::new(raw.into()))),
        }
    }
}

impl KeySlot for MemoryKeySlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, AppError> {
        let guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn store(&self, encoded: &str) -> Result<(), AppError> {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Zeroizing::new(encoded.as_bytes().to_vec()));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// OS keychain slot (macOS Keychain, Windows Credential Manager, Secret Service).
#[cfg(feature = "keychain")]
#[derive(Debug, Clone)]
pub struct KeychainKeySlot {
    service: String,
    account: String,
}

#[cfg(feature = "keychain")]
impl KeychainKeySlot {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, AppError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| AppError::KeyUnavailable(format!("Keychain entry error: {e}")))
    }
}

#[cfg(feature = "keychain")]
impl KeySlot for KeychainKeySlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>, AppError> {
        match self.entry()?.get_secret() {
            Ok(raw) => Ok(Some(Zeroizing::new(raw))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::KeyUnavailable(format!(
                "Keychain access failed: {e}"
            ))),
        }
    }

    fn store(&self, encoded: &str) -> Result<(), AppError> {
        self.entry()?
            .set_password(encoded)
            .map_err(|e| AppError::KeyUnavailable(format!("Failed to store key in keychain: {e}")))
    }

    fn describe(&self) -> String {
        format!("keychain:{}/{}", self.service, self.account)
    }
}

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

/// What to do when the slot holds a value that is not a valid key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptKeyPolicy {
    /// Treat the value as absent and generate a new key. Favors availability;
    /// every record encrypted under the old key is lost.
    #[default]
    Regenerate,
    /// Refuse to start with [`AppError::KeyRecoveryNeeded`] and leave the slot alone.
    Fail,
}

pub struct KeyManager {
    slot: Box<dyn KeySlot>,
    policy: CorruptKeyPolicy,
}

impl KeyManager {
    pub fn new(slot: Box<dyn KeySlot>, policy: CorruptKeyPolicy) -> Self {
        Self { slot, policy }
    }

    pub fn policy(&self) -> CorruptKeyPolicy {
        self.policy
    }

    /// Return the persisted key, creating and persisting one if the slot is empty.
    /// Idempotent: two calls against the same slot yield the same key.
    pub fn ensure_key(&self) -> Result<EncryptionKey, AppError> {
        if let Some(raw) = self.slot.load()? {
            match EncryptionKey::decode(&raw) {
                Ok(key) => {
                    tracing::info!(
                        slot = %self.slot.describe(),
                        fingerprint = %key.fingerprint(),
                        "Encryption key loaded"
                    );
                    return Ok(key);
                }
                Err(reason) => match self.policy {
                    CorruptKeyPolicy::Fail => {
                        return Err(AppError::KeyRecoveryNeeded(format!(
                            "persisted key in {} is unreadable ({reason})",
                            self.slot.describe()
                        )));
                    }
                    CorruptKeyPolicy::Regenerate => {
                        tracing::error!(
                            slot = %self.slot.describe(),
                            %reason,
                            "Persisted encryption key is corrupt; generating a new one. \
                             Records encrypted under the old key can no longer be read"
                        );
                    }
                },
            }
        }

        let key = EncryptionKey::generate();
        self.slot.store(&key.encode())?;
        tracing::info!(
            slot = %self.slot.describe(),
            fingerprint = %key.fingerprint(),
            "New encryption key generated and persisted"
        );
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
