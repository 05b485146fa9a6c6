//! Synchronized original/translated panels.
//!
//! The reader owns the pagination and the page currently on screen. Each
//! page view carries a cancellation token: leaving the page cancels it and
//! drops the view's subscription, while the fetch itself keeps running in
//! the cache and back-fills it.

use super::session::SessionStore;
use crate::config::Config;
use crate::error::Result;
use crate::library::document::Document;
use crate::pagination::{LayoutConfig, Page, Pagination};
use crate::translation::{
    FetchHandle, FetchOutcome, TranslationCache, TranslationKey, Translator, validate_language,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Translation status of the page on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum TranslationState {
    /// No target language selected.
    Idle,
    /// Fetch in progress.
    Loading,
    /// Translated text.
    Ready(String),
    /// The fetch failed; the reason is shown as a badge.
    Errored(String),
}

/// One of the two panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    /// Source text.
    Original,
    /// Translated text.
    Translated,
}

/// Scroll offsets of both panels, in characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrollPositions {
    /// Offset into the original panel.
    pub original: usize,
    /// Offset into the translated panel.
    pub translated: usize,
}

/// Reader settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Display layout.
    pub layout: LayoutConfig,
    /// Target language; `None` shows the original only.
    pub target_language: Option<String>,
    /// Scroll both panels together.
    pub sync_scrolling: bool,
    /// Page to open at instead of the saved reading position.
    pub start_page: Option<usize>,
}

impl From<&Config> for ReaderSettings {
    fn from(config: &Config) -> Self {
        let lang = config.translation.target_language.trim();
        Self {
            layout: config.layout.clone(),
            target_language: (!lang.is_empty()).then(|| lang.to_string()),
            sync_scrolling: config.reader.sync_scrolling,
            start_page: None,
        }
    }
}

/// Everything the UI needs to draw both panels.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderSnapshot {
    /// Book ID.
    pub book_id: String,
    /// Page on screen.
    pub page_index: usize,
    /// Pages in the book under the current layout.
    pub page_count: usize,
    /// Progress through the book (0.0 - 1.0).
    pub reading_fraction: f64,
    /// Left panel text.
    pub original: String,
    /// Right panel text; the original text unless the translation is ready.
    pub translated: String,
    /// Translation status.
    pub state: TranslationState,
    /// Error shown next to the right panel.
    pub error_badge: Option<String>,
    /// Target language.
    pub target_language: Option<String>,
    /// Whether the page is bookmarked.
    pub bookmarked: bool,
    /// Whether scrolling is synchronized.
    pub sync_scrolling: bool,
    /// Panel scroll offsets.
    pub scroll: ScrollPositions,
}

/// Detached wait for the translation of the page on screen.
///
/// Resolves to `None` once the reader moves to another page or language.
pub struct PageSubscription {
    /// Page the subscription was taken for.
    pub page_index: usize,
    /// Language the subscription was taken for.
    pub lang: String,
    handle: FetchHandle,
    cancel: CancellationToken,
}

impl PageSubscription {
    /// Wait for the outcome unless the view is left first.
    pub async fn recv(self) -> Option<FetchOutcome> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            outcome = self.handle.wait() => Some(outcome),
        }
    }
}

struct PageView {
    index: usize,
    lang: Option<String>,
    state: TranslationState,
    pending: Option<FetchHandle>,
    cancel: CancellationToken,
    scroll: ScrollPositions,
}

impl PageView {
    fn empty() -> Self {
        Self {
            index: 0,
            lang: None,
            state: TranslationState::Idle,
            pending: None,
            cancel: CancellationToken::new(),
            scroll: ScrollPositions::default(),
        }
    }

    fn apply(&mut self, outcome: FetchOutcome) {
        self.pending = None;
        self.state = match outcome {
            Ok(entry) => TranslationState::Ready(entry.text),
            Err(e) => TranslationState::Errored(e.to_string()),
        };
    }
}

/// Reads one book in two synchronized panels.
pub struct DualPanelReader<T: Translator> {
    book_id: String,
    document: Document,
    layout: LayoutConfig,
    pagination: Pagination,
    target_lang: Option<String>,
    sync_scrolling: bool,
    view: PageView,
    cache: TranslationCache,
    sessions: Arc<SessionStore>,
    translator: Arc<T>,
}

impl<T: Translator> DualPanelReader<T> {
    /// Paginate a book and open it where the reader left it, or at
    /// `settings.start_page` (clamped) when one is given.
    ///
    /// Must be called inside a tokio runtime; translation fetches are spawned.
    pub fn open(
        book_id: impl Into<String>,
        document: Document,
        settings: ReaderSettings,
        cache: TranslationCache,
        sessions: Arc<SessionStore>,
        translator: Arc<T>,
    ) -> Result<Self> {
        if let Some(lang) = &settings.target_language {
            validate_language(lang)?;
        }

        let book_id = book_id.into();
        let pagination = Pagination::new(&book_id, &document, &settings.layout);
        let start = match settings.start_page {
            Some(page) => pagination.clamp(page),
            None => sessions.resume_index(&book_id, &pagination),
        };

        let mut reader = Self {
            book_id,
            document,
            layout: settings.layout,
            pagination,
            target_lang: settings.target_language,
            sync_scrolling: settings.sync_scrolling,
            view: PageView::empty(),
            cache,
            sessions,
            translator,
        };
        tracing::info!(
            book_id = %reader.book_id,
            pages = reader.pagination.len(),
            page = start,
            "Opened book"
        );
        reader.show(start);
        Ok(reader)
    }

    /// Book ID.
    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    /// Index of the page on screen.
    pub fn current_page(&self) -> usize {
        self.view.index
    }

    /// Current pagination.
    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Current translation status.
    pub fn state(&self) -> &TranslationState {
        &self.view.state
    }

    /// Target language.
    pub fn target_language(&self) -> Option<&str> {
        self.view.lang.as_deref()
    }

    fn page(&self) -> Option<&Page> {
        self.pagination.page(self.view.index)
    }

    /// Put `index` on screen, leaving the previous view.
    fn show(&mut self, index: usize) {
        let index = self.pagination.clamp(index);
        self.view.cancel.cancel();

        let source = self.pagination.page(index).map(|p| p.text.clone()).unwrap_or_default();
        let (state, pending) = match &self.target_lang {
            None => (TranslationState::Idle, None),
            Some(_) if source.trim().is_empty() => (TranslationState::Ready(String::new()), None),
            Some(lang) => {
                let key = TranslationKey::new(
                    &self.book_id,
                    self.pagination.fingerprint(),
                    index,
                    lang,
                );
                let handle = self.cache.get_or_fetch(key, &source, &self.translator);
                match handle.try_outcome() {
                    Some(Ok(entry)) => (TranslationState::Ready(entry.text), None),
                    Some(Err(e)) => (TranslationState::Errored(e.to_string()), None),
                    None => (TranslationState::Loading, Some(handle)),
                }
            }
        };

        tracing::debug!(
            book_id = %self.book_id,
            page = index,
            lang = ?self.target_lang,
            loading = pending.is_some(),
            "Showing page"
        );
        self.view = PageView {
            index,
            lang: self.target_lang.clone(),
            state,
            pending,
            cancel: CancellationToken::new(),
            scroll: ScrollPositions::default(),
        };
        self.sessions
            .record_navigation(&self.book_id, &self.pagination, index);
    }

    /// Go to the next page. Returns false on the last page.
    pub fn next(&mut self) -> bool {
        if self.view.index + 1 >= self.pagination.len() {
            return false;
        }
        self.show(self.view.index + 1);
        true
    }

    /// Go to the previous page. Returns false on the first page.
    pub fn prev(&mut self) -> bool {
        if self.view.index == 0 {
            return false;
        }
        self.show(self.view.index - 1);
        true
    }

    /// Go to a page; out-of-range indices are clamped. Returns the page shown.
    pub fn jump_to_page(&mut self, index: usize) -> usize {
        self.show(index);
        self.view.index
    }

    /// Go to the page at a fraction of the book. Returns the page shown.
    pub fn jump_to_fraction(&mut self, fraction: f64) -> usize {
        self.show(self.pagination.page_for_fraction(fraction));
        self.view.index
    }

    /// Bookmark the page on screen, or remove its bookmark.
    pub fn toggle_bookmark(&mut self, note: Option<String>) -> bool {
        self.sessions
            .toggle_bookmark(&self.book_id, &self.pagination, self.view.index, note)
    }

    /// Translate into another language. Translations already fetched for
    /// other languages stay cached.
    pub fn set_target_language(&mut self, lang: &str) -> Result<()> {
        validate_language(lang)?;
        if self.target_lang.as_deref() == Some(lang) {
            return Ok(());
        }
        tracing::info!(book_id = %self.book_id, lang, "Target language changed");
        self.target_lang = Some(lang.to_string());
        self.show(self.view.index);
        Ok(())
    }

    /// Show the original text only.
    pub fn clear_target_language(&mut self) {
        if self.target_lang.take().is_some() {
            self.show(self.view.index);
        }
    }

    /// Enable or disable synchronized scrolling.
    pub fn set_sync_scrolling(&mut self, enabled: bool) {
        self.sync_scrolling = enabled;
    }

    /// Re-paginate for a new layout, keeping the reading position.
    pub fn set_layout(&mut self, layout: LayoutConfig) {
        if layout.fingerprint() == self.pagination.fingerprint() {
            self.layout = layout;
            return;
        }

        let pagination = Pagination::new(&self.book_id, &self.document, &layout);
        let index = pagination.remap_from(&self.pagination, self.view.index);
        tracing::info!(
            book_id = %self.book_id,
            from = self.view.index,
            to = index,
            layout = %layout.fingerprint(),
            "Layout changed, re-paginated"
        );
        self.layout = layout;
        self.pagination = pagination;
        self.show(index);
    }

    /// Current layout.
    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Pick up a finished fetch without waiting.
    pub fn poll(&mut self) -> &TranslationState {
        if let Some(outcome) = self.view.pending.as_ref().and_then(FetchHandle::try_outcome) {
            self.view.apply(outcome);
        }
        &self.view.state
    }

    /// Wait until the page on screen leaves the loading state.
    pub async fn await_translation(&mut self) -> &TranslationState {
        if let Some(handle) = self.view.pending.clone() {
            let outcome = handle.wait().await;
            self.view.apply(outcome);
        }
        &self.view.state
    }

    /// Subscription for the page on screen while it is loading.
    pub fn subscribe(&self) -> Option<PageSubscription> {
        let handle = self.view.pending.clone()?;
        Some(PageSubscription {
            page_index: self.view.index,
            lang: self.view.lang.clone().unwrap_or_default(),
            handle,
            cancel: self.view.cancel.child_token(),
        })
    }

    /// Apply the outcome of a subscription. Ignored (returns false) when the
    /// view has moved on since the subscription was taken.
    pub fn deliver(&mut self, page_index: usize, lang: &str, outcome: FetchOutcome) -> bool {
        let current = self.view.index == page_index
            && self.view.lang.as_deref() == Some(lang)
            && self.view.pending.is_some();
        if current {
            self.view.apply(outcome);
        } else {
            tracing::debug!(page = page_index, lang, "Dropping result for a page no longer shown");
        }
        current
    }

    fn panel_len(&self, panel: Panel) -> usize {
        match panel {
            Panel::Original => self.page().map_or(0, |p| p.text.chars().count()),
            Panel::Translated => match &self.view.state {
                TranslationState::Ready(text) => text.chars().count(),
                _ => self.panel_len(Panel::Original),
            },
        }
    }

    /// Scroll one panel; with sync enabled the other follows proportionally.
    pub fn scroll(&mut self, panel: Panel, offset: usize) -> ScrollPositions {
        let own_len = self.panel_len(panel);
        let offset = offset.min(own_len);
        let other = match panel {
            Panel::Original => Panel::Translated,
            Panel::Translated => Panel::Original,
        };

        let follow = if self.sync_scrolling {
            let other_len = self.panel_len(other);
            Some(if own_len == 0 {
                0
            } else {
                ((offset as u128 * other_len as u128) / own_len as u128) as usize
            })
        } else {
            None
        };

        let scroll = &mut self.view.scroll;
        match panel {
            Panel::Original => {
                scroll.original = offset;
                if let Some(f) = follow {
                    scroll.translated = f;
                }
            }
            Panel::Translated => {
                scroll.translated = offset;
                if let Some(f) = follow {
                    scroll.original = f;
                }
            }
        }
        *scroll
    }

    /// Content and status of both panels.
    pub fn snapshot(&self) -> ReaderSnapshot {
        let original = self.page().map(|p| p.text.clone()).unwrap_or_default();
        let (translated, error_badge) = match &self.view.state {
            TranslationState::Ready(text) => (text.clone(), None),
            TranslationState::Errored(reason) => (original.clone(), Some(reason.clone())),
            TranslationState::Idle | TranslationState::Loading => (original.clone(), None),
        };

        ReaderSnapshot {
            book_id: self.book_id.clone(),
            page_index: self.view.index,
            page_count: self.pagination.len(),
            reading_fraction: self.pagination.reading_fraction(self.view.index),
            original,
            translated,
            state: self.view.state.clone(),
            error_badge,
            target_language: self.view.lang.clone(),
            bookmarked: self
                .sessions
                .is_bookmarked(&self.book_id, &self.pagination, self.view.index),
            sync_scrolling: self.sync_scrolling,
            scroll: self.view.scroll,
        }
    }

    /// Leave the book, writing the reading position.
    pub fn close(self) -> Result<()> {
        self.view.cancel.cancel();
        let written = self.sessions.flush()?;
        tracing::info!(book_id = %self.book_id, page = self.view.index, written, "Closed book");
        Ok(())
    }
}
