//! Book metadata model.

use crate::config::BookFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Represents an imported book in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Unique identifier for the book.
    pub id: String,

    /// Book title.
    pub title: String,

    /// Authors (may be empty).
    pub authors: Vec<String>,

    /// Language code of the original text (e.g., "en").
    pub language: Option<String>,

    /// File format.
    pub format: BookFormat,

    /// Path to the source file.
    pub path: PathBuf,

    /// File size in bytes.
    pub file_size: u64,

    /// When the book was imported.
    pub imported_at: DateTime<Utc>,
}

impl Book {
    /// Create a new book with minimal information.
    pub fn new(path: PathBuf, format: BookFormat) -> Self {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string();

        // Generate a deterministic UUID based on the file path
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes()).to_string();

        Self {
            id,
            title,
            authors: Vec::new(),
            language: None,
            format,
            path,
            file_size: 0,
            imported_at: Utc::now(),
        }
    }

    /// Get display name for authors.
    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            "Unknown Author".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}
