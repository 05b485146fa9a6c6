//! Reading position and bookmarks, persisted per book.

use crate::error::{AppError, Result};
use crate::pagination::Pagination;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the reader left a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSession {
    /// Book ID.
    pub book_id: String,
    /// Page shown when the session was recorded.
    pub current_page_index: usize,
    /// Page count of the pagination the index belongs to.
    pub page_count: usize,
    /// Layout fingerprint of that pagination.
    pub layout: String,
    /// Fraction of the book before the current page.
    pub reading_fraction: f64,
    /// Last time the book was read.
    pub last_opened_at: DateTime<Utc>,
}

/// A bookmarked page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Book ID.
    pub book_id: String,
    /// Page index under `layout`.
    pub page_index: usize,
    /// Layout fingerprint the page index belongs to.
    pub layout: String,
    /// Position in the book, used once the layout changes.
    pub reading_fraction: f64,
    /// Optional user note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When the bookmark was created.
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Page this bookmark points at in the given pagination.
    pub fn page_in(&self, pagination: &Pagination) -> usize {
        if self.layout == pagination.fingerprint() {
            pagination.clamp(self.page_index)
        } else {
            pagination.page_for_fraction(self.reading_fraction)
        }
    }
}

fn session_key(book_id: &str) -> String {
    format!("book/{}/session", book_id)
}

fn bookmarks_key(book_id: &str) -> String {
    format!("book/{}/bookmarks", book_id)
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<String, ReadingSession>,
    bookmarks: HashMap<String, Vec<Bookmark>>,
    dirty: HashSet<String>,
    last_write: HashMap<String, Instant>,
}

/// Sessions and bookmarks for every book.
///
/// Navigation is written at most once per debounce interval; anything newer
/// stays dirty until the next write or [`SessionStore::flush`]. Bookmarks are
/// written immediately. Write failures are logged and the in-memory state
/// stays authoritative.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    debounce: Duration,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Create a store.
    pub fn new(storage: Arc<dyn Storage>, debounce: Duration) -> Self {
        Self {
            storage,
            debounce,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Current session of a book, if it was ever opened.
    pub fn load(&self, book_id: &str) -> Option<ReadingSession> {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get(book_id) {
            return Some(session.clone());
        }

        let session = match self.storage.read(&session_key(book_id)) {
            Ok(Some(json)) => match serde_json::from_str::<ReadingSession>(&json) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(book_id, error = %e, "Corrupt reading session, starting over");
                    return None;
                }
            },
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(book_id, error = %e, "Failed to read reading session");
                return None;
            }
        };
        state.sessions.insert(book_id.to_string(), session.clone());
        Some(session)
    }

    /// Page to open a book at.
    ///
    /// The stored index is used while the pagination is unchanged; otherwise
    /// the stored reading fraction is mapped onto the new pages.
    pub fn resume_index(&self, book_id: &str, pagination: &Pagination) -> usize {
        let Some(session) = self.load(book_id) else {
            return 0;
        };
        if session.layout == pagination.fingerprint() && session.page_count == pagination.len() {
            return pagination.clamp(session.current_page_index);
        }

        let index = pagination.page_for_fraction(session.reading_fraction);
        tracing::info!(
            book_id,
            stored = session.current_page_index,
            stored_pages = session.page_count,
            page = index,
            pages = pagination.len(),
            "Pagination changed, remapped reading position"
        );
        index
    }

    /// Record that `index` is now shown.
    pub fn record_navigation(&self, book_id: &str, pagination: &Pagination, index: usize) {
        let session = ReadingSession {
            book_id: book_id.to_string(),
            current_page_index: index,
            page_count: pagination.len(),
            layout: pagination.fingerprint().to_string(),
            reading_fraction: pagination.reading_fraction(index),
            last_opened_at: Utc::now(),
        };

        let mut state = self.state.lock();
        state.sessions.insert(book_id.to_string(), session);
        let due = state
            .last_write
            .get(book_id)
            .is_none_or(|at| at.elapsed() >= self.debounce);

        if due {
            if let Err(e) = self.write_session(&mut state, book_id) {
                tracing::warn!(book_id, error = %e, "Failed to save reading session");
            }
        } else {
            state.dirty.insert(book_id.to_string());
        }
    }

    fn write_session(&self, state: &mut SessionState, book_id: &str) -> Result<()> {
        let Some(session) = state.sessions.get(book_id) else {
            return Ok(());
        };
        let json = serde_json::to_string(session)?;
        state.last_write.insert(book_id.to_string(), Instant::now());
        match self.storage.write(&session_key(book_id), &json) {
            Ok(()) => {
                state.dirty.remove(book_id);
                Ok(())
            }
            Err(e) => {
                state.dirty.insert(book_id.to_string());
                Err(e)
            }
        }
    }

    /// Write every pending session. Returns how many were written.
    ///
    /// A failing book does not stop the others; the first error is returned
    /// once every book has been tried, and failed books stay pending.
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut dirty: Vec<String> = state.dirty.iter().cloned().collect();
        dirty.sort();

        let mut written = 0;
        let mut first_error = None;
        for book_id in dirty {
            match self.write_session(&mut state, &book_id) {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if written > 0 {
            tracing::debug!(written, "Flushed reading sessions");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn bookmarks_of<'a>(&self, state: &'a mut SessionState, book_id: &str) -> &'a mut Vec<Bookmark> {
        state
            .bookmarks
            .entry(book_id.to_string())
            .or_insert_with(|| match self.storage.read(&bookmarks_key(book_id)) {
                Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                    tracing::warn!(book_id, error = %e, "Corrupt bookmarks, ignoring");
                    Vec::new()
                }),
                Ok(None) => Vec::new(),
                Err(e) => {
                    tracing::warn!(book_id, error = %e, "Failed to read bookmarks");
                    Vec::new()
                }
            })
    }

    /// Bookmarks of a book, in reading order.
    pub fn bookmarks(&self, book_id: &str) -> Vec<Bookmark> {
        let mut state = self.state.lock();
        self.bookmarks_of(&mut state, book_id).clone()
    }

    /// Whether the page is bookmarked.
    pub fn is_bookmarked(&self, book_id: &str, pagination: &Pagination, index: usize) -> bool {
        let mut state = self.state.lock();
        self.bookmarks_of(&mut state, book_id)
            .iter()
            .any(|b| b.page_in(pagination) == index)
    }

    /// Add a bookmark on the page, or remove it if one exists.
    ///
    /// Returns whether the page is bookmarked afterwards.
    pub fn toggle_bookmark(
        &self,
        book_id: &str,
        pagination: &Pagination,
        index: usize,
        note: Option<String>,
    ) -> bool {
        let mut state = self.state.lock();
        let bookmarks = self.bookmarks_of(&mut state, book_id);

        let before = bookmarks.len();
        bookmarks.retain(|b| b.page_in(pagination) != index);
        let added = bookmarks.len() == before;
        if added {
            bookmarks.push(Bookmark {
                book_id: book_id.to_string(),
                page_index: index,
                layout: pagination.fingerprint().to_string(),
                reading_fraction: pagination.reading_fraction(index),
                note,
                created_at: Utc::now(),
            });
            bookmarks.sort_by(|a, b| a.reading_fraction.total_cmp(&b.reading_fraction));
        }

        let persisted = serde_json::to_string(&*bookmarks)
            .map_err(AppError::from)
            .and_then(|json| self.storage.write(&bookmarks_key(book_id), &json));
        if let Err(e) = persisted {
            tracing::warn!(book_id, page = index, error = %e, "Bookmark kept in memory only");
        }

        tracing::debug!(book_id, page = index, added, "Toggled bookmark");
        added
    }

    /// Forget the session and bookmarks of a book.
    pub fn remove_book(&self, book_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.sessions.remove(book_id);
            state.bookmarks.remove(book_id);
            state.dirty.remove(book_id);
            state.last_write.remove(book_id);
        }
        self.storage.delete_all(&session_key(book_id))?;
        self.storage.delete_all(&bookmarks_key(book_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::document::Document;
    use crate::pagination::tests::layout;
    use crate::storage::MemoryStorage;
    use crate::tests::CountingStorage;

    fn pagination(lines_per_page: usize) -> Pagination {
        let doc = Document::from_paragraphs((0..100).map(|i| format!("Line {}", i)));
        Pagination::new("alice", &doc, &layout(80, lines_per_page))
    }

    #[test]
    fn test_resume_at_stored_page() {
        let storage = Arc::new(MemoryStorage::new());
        let pages = pagination(1);

        let store = SessionStore::new(storage.clone(), Duration::ZERO);
        assert_eq!(store.resume_index("alice", &pages), 0);
        store.record_navigation("alice", &pages, 42);

        let reopened = SessionStore::new(storage, Duration::ZERO);
        assert_eq!(reopened.resume_index("alice", &pages), 42);
    }

    #[test]
    fn test_resume_remaps_when_pagination_changes() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone(), Duration::ZERO);
        store.record_navigation("alice", &pagination(1), 40);

        // Four lines per page: page 40 of the one-line layout is line 40, now on page 10
        let reopened = SessionStore::new(storage, Duration::ZERO);
        assert_eq!(reopened.resume_index("alice", &pagination(4)), 10);
    }

    #[test]
    fn test_navigation_writes_are_debounced() {
        let storage = Arc::new(CountingStorage::default());
        let pages = pagination(1);
        let store = SessionStore::new(storage.clone(), Duration::from_secs(3600));

        store.record_navigation("alice", &pages, 1);
        store.record_navigation("alice", &pages, 2);
        store.record_navigation("alice", &pages, 3);
        assert_eq!(storage.writes(), 1);

        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(storage.writes(), 2);
        assert_eq!(store.flush().unwrap(), 0);

        let reopened = SessionStore::new(storage, Duration::ZERO);
        assert_eq!(reopened.load("alice").unwrap().current_page_index, 3);
    }

    #[test]
    fn test_write_failure_keeps_session_in_memory() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_writes(true);
        let pages = pagination(1);
        let store = SessionStore::new(storage.clone(), Duration::ZERO);

        store.record_navigation("alice", &pages, 7);
        assert_eq!(store.resume_index("alice", &pages), 7);
        assert!(store.flush().is_err());

        storage.set_fail_writes(false);
        assert_eq!(store.flush().unwrap(), 1);
    }

    /// Rejects writes under the given key prefixes.
    #[derive(Default)]
    struct RejectingStorage {
        inner: MemoryStorage,
        rejected: parking_lot::Mutex<Vec<String>>,
    }

    impl RejectingStorage {
        fn reject(&self, prefixes: &[&str]) {
            *self.rejected.lock() = prefixes.iter().map(|p| p.to_string()).collect();
        }
    }

    impl Storage for RejectingStorage {
        fn read(&self, key: &str) -> Result<Option<String>> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> Result<()> {
            if self.rejected.lock().iter().any(|p| key.starts_with(p)) {
                return Err(AppError::Persistence(format!("Write rejected for {}", key)));
            }
            self.inner.write(key, value)
        }

        fn delete_all(&self, prefix: &str) -> Result<usize> {
            self.inner.delete_all(prefix)
        }

        fn keys(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.keys(prefix)
        }
    }

    #[test]
    fn test_flush_writes_other_books_past_a_failure() {
        let storage = Arc::new(RejectingStorage::default());
        let pages = pagination(1);
        let store = SessionStore::new(storage.clone(), Duration::ZERO);

        storage.reject(&["book/"]);
        store.record_navigation("alice", &pages, 7);
        store.record_navigation("bob", &pages, 3);
        store.record_navigation("carol", &pages, 5);

        storage.reject(&["book/alice/"]);
        assert!(store.flush().is_err());

        let reopened = SessionStore::new(storage.clone(), Duration::ZERO);
        assert!(reopened.load("alice").is_none());
        assert_eq!(reopened.load("bob").unwrap().current_page_index, 3);
        assert_eq!(reopened.load("carol").unwrap().current_page_index, 5);

        storage.reject(&[]);
        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(store.flush().unwrap(), 0);
    }

    #[test]
    fn test_toggle_bookmark_twice_restores_state() {
        let storage = Arc::new(MemoryStorage::new());
        let pages = pagination(1);
        let store = SessionStore::new(storage, Duration::ZERO);

        assert!(store.toggle_bookmark("alice", &pages, 42, Some("rabbit".into())));
        assert!(store.is_bookmarked("alice", &pages, 42));
        assert!(!store.is_bookmarked("alice", &pages, 43));

        assert!(!store.toggle_bookmark("alice", &pages, 42, None));
        assert!(!store.is_bookmarked("alice", &pages, 42));
        assert!(store.bookmarks("alice").is_empty());
    }

    #[test]
    fn test_bookmarks_follow_repagination() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone(), Duration::ZERO);
        store.toggle_bookmark("alice", &pagination(1), 60, None);
        store.toggle_bookmark("alice", &pagination(1), 20, None);

        let reopened = SessionStore::new(storage, Duration::ZERO);
        let bookmarks = reopened.bookmarks("alice");
        let pages: Vec<usize> = bookmarks.iter().map(|b| b.page_in(&pagination(4))).collect();
        assert_eq!(pages, vec![5, 15]);
        assert!(reopened.is_bookmarked("alice", &pagination(4), 15));
    }

    #[test]
    fn test_remove_book_drops_session_and_bookmarks() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write("book/other/session", "{}").unwrap();
        let pages = pagination(1);
        let store = SessionStore::new(storage.clone(), Duration::ZERO);
        store.record_navigation("alice", &pages, 5);
        store.toggle_bookmark("alice", &pages, 5, None);

        store.remove_book("alice").unwrap();
        assert!(store.load("alice").is_none());
        assert!(store.bookmarks("alice").is_empty());
        assert_eq!(storage.len(), 1);
    }
}
