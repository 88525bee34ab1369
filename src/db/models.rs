use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Version tag stamped into every encrypted payload and every export.
pub const PAYLOAD_VERSION: &str = "1.0";

// ============================================================================
// Index enums
// ============================================================================

/// How an intention was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionSource {
    Manual,
    Voice,
}

impl IntentionSource {
    pub const ALL: [IntentionSource; 2] = [IntentionSource::Manual, IntentionSource::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionSource::Manual => "manual",
            IntentionSource::Voice => "voice",
        }
    }
}

impl FromStr for IntentionSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(IntentionSource::Manual),
            "voice" => Ok(IntentionSource::Voice),
            other => Err(AppError::Validation(format!(
                "source must be 'manual' or 'voice', got '{other}'"
            ))),
        }
    }
}

/// Category label assigned by the classifier before the intention reaches the store.
/// The store never derives it from text; it only persists what producers supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Learning,
    Health,
    Career,
    Creativity,
    Relationships,
    Finance,
    Personal,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Learning,
        Category::Health,
        Category::Career,
        Category::Creativity,
        Category::Relationships,
        Category::Finance,
        Category::Personal,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Learning => "learning",
            Category::Health => "health",
            Category::Career => "career",
            Category::Creativity => "creativity",
            Category::Relationships => "relationships",
            Category::Finance => "finance",
            Category::Personal => "personal",
            Category::General => "general",
        }
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown category '{s}'")))
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(IntentionSource);
sql_text_enum!(Category);

// ============================================================================
// Intentions (plaintext side)
// ============================================================================

/// Speech recognizer confidence. Older voice captures stored a display label
/// such as `"87%"`, newer ones a raw score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Score(f64),
    Label(String),
}

/// A producer-supplied intention, before the store adds provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intention {
    pub text: String,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub source: IntentionSource,
    #[serde(default)]
    pub category: Category,
    /// Voice captures only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl Intention {
    pub fn manual(text: impl Into<String>, timestamp: i64, category: Category) -> Self {
        Self {
            text: text.into(),
            timestamp,
            source: IntentionSource::Manual,
            category,
            confidence: None,
        }
    }
}

/// What actually gets encrypted: the intention plus store-assigned provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionPayload {
    #[serde(flatten)]
    pub intention: Intention,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub version: String,
}

/// A decrypted intention as handed back to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIntention {
    pub storage_id: i64,
    #[serde(flatten)]
    pub intention: Intention,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub version: String,
}

impl StoredIntention {
    pub fn from_payload(storage_id: i64, payload: IntentionPayload) -> Self {
        Self {
            storage_id,
            intention: payload.intention,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            version: payload.version,
        }
    }
}

// ============================================================================
// Stored rows (ciphertext side)
// ============================================================================

/// One row of the `intentions` table. `timestamp`, `source` and `category`
/// are a plaintext projection of the encrypted payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub timestamp: i64,
    pub source: IntentionSource,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStoredRecord {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub timestamp: i64,
    pub source: IntentionSource,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub count: i64,
}

// ============================================================================
// Export
// ============================================================================

/// Plaintext snapshot produced on explicit user request. The library never
/// persists it; the caller decides where (and whether) it goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub export_date: String,
    pub version: String,
    pub intentions_count: usize,
    pub intentions: Vec<StoredIntention>,
}

impl ExportSnapshot {
    pub fn new(intentions: Vec<StoredIntention>) -> Self {
        Self {
            export_date: chrono::Utc::now().to_rfc3339(),
            version: PAYLOAD_VERSION.to_string(),
            intentions_count: intentions.len(),
            intentions,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, AppError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize export: {e}")))
    }
}
