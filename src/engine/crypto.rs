use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::engine::keys::EncryptionKey;
use crate::error::AppError;

/// AES-GCM nonce length (96 bits).
pub const IV_LEN: usize = 12;

/// Output of one encryption: ciphertext with the GCM tag appended, plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

// ---------------------------------------------------------------------------
// Core Encryption / Decryption
// ---------------------------------------------------------------------------

/// Fresh random nonce. Every seal draws a new one; nonces are never derived or reused.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Serialize `payload` to JSON and encrypt it under a fresh random nonce.
pub fn seal<T: Serialize>(key: &EncryptionKey, payload: &T) -> Result<Sealed, AppError> {
    let iv = generate_iv();
    let ciphertext = seal_with_iv(key, payload, &iv)?;
    Ok(Sealed { ciphertext, iv })
}

/// Deterministic half of [`seal`]. Callers outside this module must not pick nonces themselves.
fn seal_with_iv<T: Serialize>(
    key: &EncryptionKey,
    payload: &T,
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, AppError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload)
            .map_err(|e| AppError::EncryptionFailed(format!("payload serialization: {e}")))?,
    );

    cipher(key)
        .encrypt(Nonce::from_slice(iv), plaintext.as_slice())
        .map_err(|e| AppError::EncryptionFailed(e.to_string()))
}

/// Verify and decrypt, then decode the JSON payload. Any tag mismatch (tampering,
/// wrong key, wrong nonce) fails closed with `DecryptionFailed`.
pub fn open<T: DeserializeOwned>(
    key: &EncryptionKey,
    ciphertext: &[u8],
    iv: &[u8],
) -> Result<T, AppError> {
    if iv.len() != IV_LEN {
        return Err(AppError::DecryptionFailed(format!(
            "Invalid nonce length: {} (expected {IV_LEN})",
            iv.len()
        )));
    }

    let plaintext = Zeroizing::new(
        cipher(key)
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| AppError::DecryptionFailed("authentication tag mismatch".into()))?,
    );

    serde_json::from_slice(&plaintext)
        .map_err(|e| AppError::DecryptionFailed(format!("payload decoding: {e}")))
}

fn cipher(key: &EncryptionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
