use crate::db::*;
use crate::error::{AppError, Result};
use crate::storage::Storage;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT,
                authors_json TEXT,
                language TEXT,
                path TEXT NOT NULL,
                format TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                block_count INTEGER NOT NULL DEFAULT 0,
                imported_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Normalized documents (JSON array of text blocks)
            CREATE TABLE IF NOT EXISTS documents (
                book_id TEXT PRIMARY KEY,
                blocks_json TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Key-value store for translations, sessions and bookmarks
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_books_title ON books(title);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    /// Save or update a book.
    pub fn save_book(&self, book: &StoredBook) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, title, author, authors_json, language, path, format, file_size,
              block_count, imported_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                authors_json = excluded.authors_json,
                language = excluded.language,
                path = excluded.path,
                format = excluded.format,
                file_size = excluded.file_size,
                block_count = excluded.block_count,
                updated_at = excluded.updated_at",
            params![
                book.id,
                book.title,
                book.author,
                book.authors_json,
                book.language,
                book.path,
                book.format,
                book.file_size,
                book.block_count,
                book.imported_at,
                book.updated_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save book: {}", e)))?;
        Ok(())
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, title, author, authors_json, language, path, format, file_size,
                    block_count, imported_at, updated_at
             FROM books WHERE id = ?1",
            params![id],
            Self::row_to_stored_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Get all books, ordered by title.
    pub fn get_all_books(&self) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, author, authors_json, language, path, format, file_size,
                        block_count, imported_at, updated_at
                 FROM books ORDER BY title",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map([], Self::row_to_stored_book)
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    fn row_to_stored_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBook> {
        Ok(StoredBook {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            authors_json: row.get(3)?,
            language: row.get(4)?,
            path: row.get(5)?,
            format: row.get(6)?,
            file_size: row.get(7)?,
            block_count: row.get(8)?,
            imported_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Delete a book and its document.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents WHERE book_id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete document: {}", e)))?;
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== DOCUMENT OPERATIONS ==========

    /// Save the normalized document of a book.
    pub fn save_document(&self, book_id: &str, blocks_json: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (book_id, blocks_json) VALUES (?1, ?2)
             ON CONFLICT (book_id) DO UPDATE SET blocks_json = excluded.blocks_json",
            params![book_id, blocks_json],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save document: {}", e)))?;
        Ok(())
    }

    /// Get the normalized document of a book.
    pub fn get_document(&self, book_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT blocks_json FROM documents WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get document: {}", e)))
    }
}

impl Storage for Database {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| AppError::Persistence(format!("Failed to read {}: {}", key, e)))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, now_timestamp()],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to write {}: {}", key, e)))?;
        Ok(())
    }

    fn delete_all(&self, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock();
        // substr comparison avoids LIKE wildcards in book ids
        conn.execute(
            "DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )
        .map_err(|e| AppError::Persistence(format!("Failed to delete {}*: {}", prefix, e)))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .map_err(|e| AppError::Persistence(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))
            .map_err(|e| AppError::Persistence(format!("Failed to list keys: {}", e)))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| AppError::Persistence(format!("Failed to collect keys: {}", e)))?;

        Ok(keys)
    }
}
