//! Normalized document model produced by the format handlers.

use serde::{Deserialize, Serialize};

/// Ordered text blocks (paragraphs) of a book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Paragraphs with whitespace collapsed to single spaces.
    pub blocks: Vec<String>,
}

impl Document {
    /// Build a document from raw paragraphs, dropping empty ones.
    pub fn from_paragraphs<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut doc = Self::default();
        for p in paragraphs {
            doc.push_paragraph(p.as_ref());
        }
        doc
    }

    /// Append a paragraph after normalizing whitespace. Blank input is ignored.
    pub fn push_paragraph(&mut self, text: &str) {
        let normalized = normalize_whitespace(text);
        if !normalized.is_empty() {
            self.blocks.push(normalized);
        }
    }

    /// Whether the document has no text.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of whitespace-separated tokens.
    pub fn token_count(&self) -> usize {
        self.blocks.iter().map(|b| b.split(' ').count()).sum()
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split plain text into paragraphs on blank lines.
pub fn paragraphs_from_text(text: &str) -> Document {
    let mut doc = Document::default();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            doc.push_paragraph(&current);
            current.clear();
        } else {
            current.push(' ');
            current.push_str(line);
        }
    }
    doc.push_paragraph(&current);

    doc
}
