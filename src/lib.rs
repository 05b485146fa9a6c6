//! dual-reader: side-by-side reading of a book and its translation.
//!
//! Books (EPUB, MOBI, plain text) are imported into a normalized document,
//! split into pages for the current display layout, and shown in two
//! panels: the original page and its machine translation. Translations are
//! fetched from an online provider once per page and language, shared by
//! every view, and persisted so that they are available offline.
//!
//! # Features
//!
//! - Deterministic pagination from font size, margins and viewport
//! - Request coalescing: one provider call per page and language
//! - Navigation never waits on the network
//! - Reading position and bookmarks that survive re-pagination
//! - Synchronized scrolling between the two panels

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Library and book models.
pub mod library;
/// Page layout and pagination.
pub mod pagination;
/// Dual-panel reader and reading sessions.
pub mod reader;
/// Key-value persistence.
pub mod storage;
/// Translation client and cache.
pub mod translation;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use library::Library;
pub use reader::DualPanelReader;
