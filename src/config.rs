use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::keys::{CorruptKeyPolicy, FileKeySlot, KeySlot};
use crate::error::AppError;

const APP_DIR_NAME: &str = "ambient-intents";

/// Where the durable encryption key lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    #[default]
    File,
    /// Requires the `keychain` cargo feature.
    Keychain,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
    pub key_backend: KeyBackend,
    /// Resolved against `data_dir`. Kept outside the database on purpose.
    pub key_file: String,
    pub keychain_service: String,
    pub keychain_account: String,
    pub pool_max_size: u32,
    pub busy_timeout_ms: u64,
    pub on_corrupt_key: CorruptKeyPolicy,
    /// Also write daily-rolling logs under `<data_dir>/logs`.
    pub log_to_file: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: "intentions.db".into(),
            key_backend: KeyBackend::File,
            key_file: "intentions.key".into(),
            keychain_service: APP_DIR_NAME.into(),
            keychain_account: "intentions-encryption-key".into(),
            pool_max_size: 4,
            busy_timeout_ms: 5000,
            on_corrupt_key: CorruptKeyPolicy::Regenerate,
            log_to_file: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl StoreConfig {
    /// Defaults rooted at `dir`. Handy for tests and portable installs.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let mut config: StoreConfig = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, use defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config not loaded ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AMBIENT_INTENTS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AMBIENT_INTENTS_KEY_BACKEND") {
            match v.as_str() {
                "file" => self.key_backend = KeyBackend::File,
                "keychain" => self.key_backend = KeyBackend::Keychain,
                other => tracing::warn!(value = other, "Ignoring unknown AMBIENT_INTENTS_KEY_BACKEND"),
            }
        }
        if let Ok(v) = std::env::var("AMBIENT_INTENTS_ON_CORRUPT_KEY") {
            match v.as_str() {
                "regenerate" => self.on_corrupt_key = CorruptKeyPolicy::Regenerate,
                "fail" => self.on_corrupt_key = CorruptKeyPolicy::Fail,
                other => tracing::warn!(value = other, "Ignoring unknown AMBIENT_INTENTS_ON_CORRUPT_KEY"),
            }
        }
        if let Ok(v) = std::env::var("AMBIENT_INTENTS_POOL_SIZE") {
            if let Ok(n) = v.parse::<u32>() {
                if n > 0 {
                    self.pool_max_size = n;
                }
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join(&self.key_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Build the durable key slot selected by `key_backend`.
    pub fn key_slot(&self) -> Result<Box<dyn KeySlot>, AppError> {
        match self.key_backend {
            KeyBackend::File => Ok(Box::new(FileKeySlot::new(self.key_path()))),
            #[cfg(feature = "keychain")]
            KeyBackend::Keychain => Ok(Box::new(crate::engine::keys::KeychainKeySlot::new(
                &self.keychain_service,
                &self.keychain_account,
            ))),
            #[cfg(not(feature = "keychain"))]
            KeyBackend::Keychain => Err(AppError::Config(
                "key_backend = \"keychain\" requires building with the `keychain` feature".into(),
            )),
        }
    }
}
