//! Shared translation cache with request coalescing.
//!
//! At most one fetch per key is outstanding at any time: concurrent misses
//! join the in-flight fetch through a `watch` channel and all observe the
//! same outcome. Fetches run in their own task, so a view that stops
//! waiting (navigated away) does not abort the cache write.

use super::client::{TranslateError, Translator};
use super::{TranslationEntry, TranslationKey};
use crate::error::{AppError, Result};
use crate::storage::Storage;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Result delivered to everyone waiting on a fetch.
pub type FetchOutcome = std::result::Result<TranslationEntry, TranslateError>;

/// A translation that is either available now or being fetched.
#[derive(Debug, Clone)]
pub enum FetchHandle {
    /// Served from memory or storage.
    Ready(TranslationEntry),
    /// Subscription to an in-flight fetch. Dropping it only unsubscribes.
    Pending(watch::Receiver<Option<FetchOutcome>>),
}

impl FetchHandle {
    /// Outcome if already known, without waiting.
    pub fn try_outcome(&self) -> Option<FetchOutcome> {
        match self {
            FetchHandle::Ready(entry) => Some(Ok(entry.clone())),
            FetchHandle::Pending(rx) => (*rx.borrow()).clone(),
        }
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> FetchOutcome {
        match self {
            FetchHandle::Ready(entry) => Ok(entry),
            FetchHandle::Pending(mut rx) => {
                let result = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
                match result {
                    Ok(Some(outcome)) => outcome,
                    _ => Err(TranslateError::Network(
                        "Translation task ended without a result".into(),
                    )),
                }
            }
        }
    }
}

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served without a fetch.
    pub hits: u64,
    /// Lookups that started a fetch.
    pub misses: u64,
    /// Lookups that joined an in-flight fetch.
    pub coalesced: u64,
    /// Provider fetches started (misses plus stale refreshes).
    pub fetches: u64,
    /// Entries that could not be persisted.
    pub write_failures: u64,
    /// Entries held in memory.
    pub entries: usize,
    /// Fetches currently outstanding.
    pub in_flight: usize,
}

struct InFlight {
    generation: u64,
    rx: watch::Receiver<Option<FetchOutcome>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TranslationKey, TranslationEntry>,
    in_flight: HashMap<TranslationKey, InFlight>,
    /// Writes for a book with a lower generation are dropped (book was evicted).
    floors: HashMap<String, u64>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    write_failures: AtomicU64,
}

struct Inner {
    state: Mutex<CacheState>,
    storage: Arc<dyn Storage>,
    generation: AtomicU64,
    counters: Counters,
}

/// Translation cache shared by every page view.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<Inner>,
}

impl TranslationCache {
    /// Create a cache persisting to `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::default()),
                storage,
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Look up a translation in memory, then in storage.
    pub fn get(&self, key: &TranslationKey) -> Option<TranslationEntry> {
        let mut state = self.inner.state.lock();
        self.lookup(&mut state, key)
    }

    fn lookup(&self, state: &mut CacheState, key: &TranslationKey) -> Option<TranslationEntry> {
        if let Some(entry) = state.entries.get(key) {
            return Some(entry.clone());
        }
        let loaded = self.load(key)?;
        state.entries.insert(key.clone(), loaded.clone());
        Some(loaded)
    }

    fn load(&self, key: &TranslationKey) -> Option<TranslationEntry> {
        match self.inner.storage.read(&key.storage_key()) {
            Ok(Some(json)) => match serde_json::from_str::<TranslationEntry>(&json) {
                Ok(entry) if &entry.key == key => Some(entry),
                Ok(_) => {
                    tracing::warn!(key = %key, "Stored translation has a mismatched key, ignoring");
                    None
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Corrupt stored translation, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read stored translation");
                None
            }
        }
    }

    /// Store a translation, replacing any previous one for the key.
    pub fn put(&self, key: TranslationKey, text: impl Into<String>) -> TranslationEntry {
        let entry = TranslationEntry {
            key,
            text: text.into(),
            fetched_at: Utc::now(),
            stale: false,
            durable: true,
            generation: self.next_generation(),
        };
        let mut state = self.inner.state.lock();
        self.store(&mut state, entry)
    }

    /// Apply a write unless the book was evicted or a newer write landed since
    /// the entry's generation was taken. Returns the entry now current for the key.
    fn store(&self, state: &mut CacheState, mut entry: TranslationEntry) -> TranslationEntry {
        let floor = state.floors.get(&entry.key.book_id).copied().unwrap_or(0);
        if entry.generation < floor {
            tracing::debug!(key = %entry.key, "Dropping translation for evicted book");
            return entry;
        }
        if let Some(current) = state.entries.get(&entry.key)
            && current.generation > entry.generation
        {
            tracing::debug!(
                key = %entry.key,
                current = current.generation,
                incoming = entry.generation,
                "Ignoring outdated translation"
            );
            return current.clone();
        }

        let persisted = serde_json::to_string(&entry)
            .map_err(AppError::from)
            .and_then(|json| self.inner.storage.write(&entry.key.storage_key(), &json));
        match persisted {
            Ok(()) => entry.durable = true,
            Err(e) => {
                entry.durable = false;
                self.inner
                    .counters
                    .write_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %entry.key, error = %e, "Translation kept in memory only");
            }
        }

        state.entries.insert(entry.key.clone(), entry.clone());
        entry
    }

    /// Return the cached translation or start (or join) a fetch for it.
    ///
    /// Stale entries are returned immediately and refreshed in the background.
    pub fn get_or_fetch<T: Translator>(
        &self,
        key: TranslationKey,
        source_text: &str,
        translator: &Arc<T>,
    ) -> FetchHandle {
        let mut state = self.inner.state.lock();

        if let Some(entry) = self.lookup(&mut state, &key) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            if entry.stale && !state.in_flight.contains_key(&key) {
                tracing::debug!(key = %key, "Refreshing stale translation");
                self.start_fetch(&mut state, key, source_text, translator);
            }
            return FetchHandle::Ready(entry);
        }

        if let Some(in_flight) = state.in_flight.get(&key) {
            let abandoned = in_flight.rx.has_changed().is_err() && in_flight.rx.borrow().is_none();
            if !abandoned {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Joining in-flight translation");
                return FetchHandle::Pending(in_flight.rx.clone());
            }
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        FetchHandle::Pending(self.start_fetch(&mut state, key, source_text, translator))
    }

    fn start_fetch<T: Translator>(
        &self,
        state: &mut CacheState,
        key: TranslationKey,
        source_text: &str,
        translator: &Arc<T>,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        let generation = self.next_generation();
        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                rx: rx.clone(),
            },
        );
        self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let cache = self.clone();
        let translator = Arc::clone(translator);
        let text = source_text.to_string();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = translator.translate(&text, &key.lang).await;
            tracing::debug!(key = %key, ok = result.is_ok(), elapsed = ?started.elapsed(), "Fetch finished");
            let outcome = cache.complete(key, generation, result);
            // Nobody may be listening any more; the cache write above still happened
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    fn complete(
        &self,
        key: TranslationKey,
        generation: u64,
        result: std::result::Result<String, TranslateError>,
    ) -> FetchOutcome {
        let mut state = self.inner.state.lock();
        if state
            .in_flight
            .get(&key)
            .is_some_and(|f| f.generation == generation)
        {
            state.in_flight.remove(&key);
        }

        let text = result?;
        let entry = TranslationEntry {
            key,
            text,
            fetched_at: Utc::now(),
            stale: false,
            durable: true,
            generation,
        };
        Ok(self.store(&mut state, entry))
    }

    /// Remove every translation of a book, in memory and in storage.
    ///
    /// Fetches already running for the book complete for their waiters but
    /// are not written back.
    pub fn evict(&self, book_id: &str) -> Result<usize> {
        let mut state = self.inner.state.lock();
        let floor = self.next_generation();
        state.floors.insert(book_id.to_string(), floor);
        state.entries.retain(|k, _| k.book_id != book_id);
        state.in_flight.retain(|k, _| k.book_id != book_id);

        let removed = self
            .inner
            .storage
            .delete_all(&TranslationKey::book_prefix(book_id))?;
        tracing::info!(book_id, removed, "Evicted translations");
        Ok(removed)
    }

    /// Flag every translation of a book as stale. Returns how many stored entries were marked.
    ///
    /// Entries that cannot be read, decoded or rewritten are logged and
    /// skipped; only listing the book's keys can fail.
    pub fn mark_stale(&self, book_id: &str) -> Result<usize> {
        let mut state = self.inner.state.lock();
        for entry in state.entries.values_mut() {
            if entry.key.book_id == book_id {
                entry.stale = true;
            }
        }

        let storage = &self.inner.storage;
        let mut marked = 0;
        for storage_key in storage.keys(&TranslationKey::book_prefix(book_id))? {
            let json = match storage.read(&storage_key) {
                Ok(Some(json)) => json,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "Failed to read translation");
                    continue;
                }
            };
            let mut entry: TranslationEntry = match serde_json::from_str(&json) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "Skipping corrupt translation");
                    continue;
                }
            };
            entry.stale = true;
            let written = serde_json::to_string(&entry)
                .map_err(AppError::from)
                .and_then(|json| storage.write(&storage_key, &json));
            match written {
                Ok(()) => marked += 1,
                Err(e) => {
                    tracing::warn!(key = %storage_key, error = %e, "Failed to mark translation stale");
                }
            }
        }
        Ok(marked)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
        }
    }
}
