mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored book in database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID.
    pub id: String,
    /// Book title.
    pub title: String,
    /// Primary author.
    pub author: Option<String>,
    /// All authors (JSON array).
    pub authors_json: Option<String>,
    /// Language code of the original text.
    pub language: Option<String>,
    /// Absolute path to source file.
    pub path: String,
    /// Book format.
    pub format: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Number of text blocks in the normalized document.
    pub block_count: i64,
    /// Import timestamp.
    pub imported_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
