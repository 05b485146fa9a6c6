//! Page translation: provider client and the shared, persisted cache.

pub mod cache;
pub mod client;

pub use cache::{CacheStats, FetchHandle, FetchOutcome, TranslationCache};
pub use client::{
    HttpTranslator, RetryPolicy, RetryingTranslator, TranslateError, Translator,
    validate_language,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one cached translation.
///
/// Page indices are only meaningful for the layout they were computed
/// under, so the layout fingerprint is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranslationKey {
    /// Book ID.
    pub book_id: String,
    /// Layout fingerprint of the pagination.
    pub layout: String,
    /// Page index.
    pub page_index: usize,
    /// Target language code.
    pub lang: String,
}

impl TranslationKey {
    /// Create a key.
    pub fn new(
        book_id: impl Into<String>,
        layout: impl Into<String>,
        page_index: usize,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            layout: layout.into(),
            page_index,
            lang: lang.into(),
        }
    }

    /// Storage prefix holding every translation of a book.
    pub fn book_prefix(book_id: &str) -> String {
        format!("book/{}/translation/", book_id)
    }

    /// Storage key for this entry.
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}/{:06}/{}",
            Self::book_prefix(&self.book_id),
            self.layout,
            self.page_index,
            self.lang
        )
    }
}

impl std::fmt::Display for TranslationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}@{}:{}",
            self.book_id, self.page_index, self.layout, self.lang
        )
    }
}

/// A cached page translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEntry {
    /// Cache key.
    pub key: TranslationKey,
    /// Translated text.
    pub text: String,
    /// When the provider returned this translation.
    pub fetched_at: DateTime<Utc>,
    /// Served, but refreshed on next view.
    #[serde(default)]
    pub stale: bool,
    /// False when the persistence write failed; the entry lives only in memory.
    #[serde(skip, default = "default_durable")]
    pub durable: bool,
    /// Write order within this process; a write never replaces a newer generation.
    #[serde(skip)]
    pub generation: u64,
}

fn default_durable() -> bool {
    true
}
