//! Encrypted, local-only store for short personal "intentions".
//!
//! Each intention is serialized, sealed with AES-256-GCM under a single
//! installation key, and written to SQLite next to a small plaintext
//! projection (`timestamp`, `source`, `category`) used for querying.
//!
//! ```no_run
//! use ambient_intents::{Category, Intention, IntentionRepository, StoreConfig};
//!
//! # fn main() -> Result<(), ambient_intents::AppError> {
//! let repo = IntentionRepository::new(StoreConfig::load_or_default("ambient-intents.toml"))?;
//! repo.initialize()?;
//! let id = repo.save(&Intention::manual("Learn Rust", 1_700_000_000_000, Category::Learning))?;
//! for item in repo.get_all()? {
//!     println!("{} {}", item.storage_id, item.intention.text);
//! }
//! # let _ = id;
//! # Ok(())
//! # }
//! ```
//!
//! Losing the key file (or keychain entry) makes every stored record
//! permanently unreadable. There is no recovery path by design.

pub mod async_repository;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod repository;
pub mod validation;

pub use async_repository::AsyncIntentionRepository;
pub use config::{KeyBackend, StoreConfig};
pub use db::models::{
    Category, CategoryCount, Confidence, ExportSnapshot, Intention, IntentionSource,
    StoredIntention,
};
pub use engine::keys::{CorruptKeyPolicy, EncryptionKey, KeyManager, KeySlot};
pub use error::AppError;
pub use repository::{IndexMismatch, IndexReport, IntentionRepository, ReadOutcome};
