use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so presentation layers get a stable kind to match on.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Store not initialized: call initialize() first")]
    NotInitialized,

    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// The persisted key could not be parsed and the configured policy
    /// refuses to replace it. Existing records stay on disk untouched.
    #[error("Encryption key needs recovery: {0}")]
    KeyRecoveryNeeded(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable tag, also used as the serialized `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotInitialized => "not_initialized",
            AppError::KeyUnavailable(_) => "key_unavailable",
            AppError::KeyRecoveryNeeded(_) => "key_recovery_needed",
            AppError::EncryptionFailed(_) => "encryption_failed",
            AppError::DecryptionFailed(_) => "decryption_failed",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::StorageUnavailable(format!("database: {e}"))
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::StorageUnavailable(format!("connection pool: {e}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StorageUnavailable(format!("io: {e}"))
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}
