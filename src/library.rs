//! Imported books: import, listing, removal, and opening for reading.

pub mod book;
pub mod document;

pub use book::Book;
pub use document::Document;

use crate::config::{BookFormat, Config};
use crate::db::{self, Database, StoredBook};
use crate::error::{AppError, Result};
use crate::formats;
use crate::pagination::{LayoutConfig, Pagination};
use crate::reader::{DualPanelReader, ReaderSettings, SessionStore};
use crate::storage::Storage;
use crate::translation::{TranslationCache, Translator};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a directory import.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    /// Books imported (or re-imported).
    pub imported: Vec<Book>,
    /// Files that could not be imported, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// The book library and the shared state readers are built on.
pub struct Library {
    db: Database,
    cache: TranslationCache,
    sessions: Arc<SessionStore>,
}

impl Library {
    /// Create a library over an open database.
    pub fn new(db: Database, debounce: Duration) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(db.clone());
        Self {
            cache: TranslationCache::new(storage.clone()),
            sessions: Arc::new(SessionStore::new(storage, debounce)),
            db,
        }
    }

    /// Open the configured database.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        tracing::debug!(database = %config.database.path.display(), "Opened library");
        Ok(Self::new(db, config.session.debounce()))
    }

    /// Shared translation cache.
    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Reading sessions and bookmarks.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Import a single book file.
    ///
    /// Unsupported, unreadable or text-less files are rejected with
    /// [`AppError::Import`] and leave the library untouched.
    pub fn import(&self, path: &Path) -> Result<Book> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(BookFormat::from_extension)
            .ok_or_else(|| {
                AppError::Import(format!("Unsupported file type: {}", path.display()))
            })?;

        let path = path
            .canonicalize()
            .map_err(|e| AppError::Import(format!("{}: {}", path.display(), e)))?;
        let metadata = std::fs::metadata(&path)
            .map_err(|e| AppError::Import(format!("{}: {}", path.display(), e)))?;

        let mut book = Book::new(path, format);
        book.file_size = metadata.len();

        let handler = formats::get_handler(format);
        if let Err(e) = handler.extract_metadata(&mut book) {
            tracing::debug!(path = %book.path.display(), error = %e, "Failed to extract metadata");
        }

        let document = handler
            .extract_document(&book.path)
            .map_err(|e| import_error(&book.path, e))?;
        if document.is_empty() {
            return Err(AppError::Import(format!(
                "{}: no readable text",
                book.path.display()
            )));
        }

        let reimport = self.db.get_book(&book.id)?.is_some();
        self.db.save_book(&book_to_stored(&book, document.blocks.len()))?;
        self.db
            .save_document(&book.id, &serde_json::to_string(&document)?)?;

        if reimport {
            // Same file imported again; its text may have changed
            match self.cache.mark_stale(&book.id) {
                Ok(marked) => {
                    tracing::info!(book_id = %book.id, stale = marked, "Re-imported book");
                }
                Err(e) => {
                    tracing::warn!(book_id = %book.id, error = %e, "Re-imported book, translations not marked stale");
                }
            }
        } else {
            tracing::info!(
                book_id = %book.id,
                title = %book.title,
                format = format.as_str(),
                blocks = document.blocks.len(),
                "Imported book"
            );
        }

        Ok(book)
    }

    /// Import every supported file below a directory.
    pub fn import_dir(&self, dir: &Path) -> Result<ImportReport> {
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }

        let files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .and_then(BookFormat::from_extension)
                    .is_some()
            })
            .collect();

        tracing::info!(files = files.len(), dir = %dir.display(), "Found files to import");

        let mut report = ImportReport::default();
        for path in files {
            match self.import(&path) {
                Ok(book) => report.imported.push(book),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        tracing::info!(
            imported = report.imported.len(),
            failed = report.failed.len(),
            "Directory import complete"
        );
        Ok(report)
    }

    /// All books, ordered by title.
    pub fn list(&self) -> Result<Vec<Book>> {
        Ok(self
            .db
            .get_all_books()?
            .iter()
            .filter_map(stored_to_book)
            .collect())
    }

    /// A book by ID.
    pub fn get(&self, id: &str) -> Result<Book> {
        self.db
            .get_book(id)?
            .as_ref()
            .and_then(stored_to_book)
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
    }

    /// The normalized text of a book.
    pub fn document(&self, id: &str) -> Result<Document> {
        let json = self
            .db
            .get_document(id)?
            .ok_or_else(|| AppError::NotFound(format!("Document not found: {}", id)))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Paginate a book for a layout.
    pub fn pagination(&self, id: &str, layout: &LayoutConfig) -> Result<Pagination> {
        Ok(Pagination::new(id, &self.document(id)?, layout))
    }

    /// Remove a book with its translations, session and bookmarks.
    pub fn remove(&self, id: &str) -> Result<Book> {
        let book = self.get(id)?;
        let evicted = self.cache.evict(id)?;
        self.sessions.remove_book(id)?;
        self.db.delete_book(id)?;
        tracing::info!(book_id = id, title = %book.title, evicted, "Removed book");
        Ok(book)
    }

    /// Open a book in the dual-panel reader.
    pub fn open_reader<T: Translator>(
        &self,
        id: &str,
        settings: ReaderSettings,
        translator: Arc<T>,
    ) -> Result<DualPanelReader<T>> {
        let document = self.document(id)?;
        DualPanelReader::open(
            id,
            document,
            settings,
            self.cache.clone(),
            Arc::clone(&self.sessions),
            translator,
        )
    }
}

/// Report any handler failure as an import failure of `path`.
fn import_error(path: &Path, e: AppError) -> AppError {
    match e {
        AppError::Import(msg) => AppError::Import(format!("{}: {}", path.display(), msg)),
        other => AppError::Import(format!("{}: {}", path.display(), other)),
    }
}

fn stored_to_book(sb: &StoredBook) -> Option<Book> {
    let Some(format) = BookFormat::from_extension(&sb.format) else {
        tracing::warn!(book_id = %sb.id, format = %sb.format, "Unknown stored format");
        return None;
    };

    let authors = sb
        .authors_json
        .as_ref()
        .and_then(|j| serde_json::from_str::<Vec<String>>(j).ok())
        .unwrap_or_else(|| sb.author.clone().into_iter().collect());

    Some(Book {
        id: sb.id.clone(),
        title: sb.title.clone(),
        authors,
        language: sb.language.clone(),
        format,
        path: PathBuf::from(&sb.path),
        file_size: sb.file_size as u64,
        imported_at: db::timestamp_to_datetime(sb.imported_at),
    })
}

fn book_to_stored(book: &Book, block_count: usize) -> StoredBook {
    StoredBook {
        id: book.id.clone(),
        title: book.title.clone(),
        author: book.authors.first().cloned(),
        authors_json: Some(serde_json::to_string(&book.authors).unwrap_or_default()),
        language: book.language.clone(),
        path: book.path.to_string_lossy().to_string(),
        format: book.format.as_str().to_string(),
        file_size: book.file_size as i64,
        block_count: block_count as i64,
        imported_at: book.imported_at.timestamp(),
        updated_at: db::now_timestamp(),
    }
}
