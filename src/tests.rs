use crate::config::{BookFormat, Config};
use crate::db::Database;
use crate::error::Result;
use crate::library::Library;
use crate::pagination::tests::layout;
use crate::reader::{DualPanelReader, ReaderSettings, SessionStore, TranslationState};
use crate::storage::{MemoryStorage, Storage};
use crate::translation::{
    RetryPolicy, RetryingTranslator, TranslateError, TranslationCache, Translator,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

// ========== TEST DOUBLES ==========

/// Answers immediately with `[lang] text`.
#[derive(Default)]
pub(crate) struct EchoTranslator {
    calls: AtomicUsize,
}

impl EchoTranslator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
    ) -> std::result::Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{}] {}", target_lang, text))
    }
}

/// Like [`EchoTranslator`], but each call waits for a permit from [`GatedTranslator::release`].
pub(crate) struct GatedTranslator {
    calls: AtomicUsize,
    gate: Semaphore,
}

impl Default for GatedTranslator {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }
}

impl GatedTranslator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Let `n` pending or future calls finish.
    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

impl Translator for GatedTranslator {
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
    ) -> std::result::Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(TranslateError::Network("gate closed".into())),
        }
        Ok(format!("[{}] {}", target_lang, text))
    }
}

/// Provider that cannot be reached.
#[derive(Default)]
pub(crate) struct OfflineTranslator {
    calls: AtomicUsize,
}

impl OfflineTranslator {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for OfflineTranslator {
    async fn translate(
        &self,
        _text: &str,
        _target_lang: &str,
    ) -> std::result::Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TranslateError::Network("connection refused".into()))
    }
}

/// Memory storage that counts writes.
#[derive(Default)]
pub(crate) struct CountingStorage {
    inner: MemoryStorage,
    writes: AtomicUsize,
}

impl CountingStorage {
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Storage for CountingStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, value)
    }

    fn delete_all(&self, prefix: &str) -> Result<usize> {
        self.inner.delete_all(prefix)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys(prefix)
    }
}

// ========== HELPERS ==========

fn write_alice(dir: &Path) -> PathBuf {
    let text = (0..100)
        .map(|i| format!("Line {}", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let path = dir.join("alice.txt");
    std::fs::write(&path, text).unwrap();
    path
}

/// One block per page, 100 pages for `write_alice`.
fn one_line_pages(lang: Option<&str>) -> ReaderSettings {
    ReaderSettings {
        layout: layout(80, 1),
        target_language: lang.map(str::to_string),
        sync_scrolling: true,
        start_page: None,
    }
}

fn fast_retries<T: Translator>(inner: T) -> RetryingTranslator<T> {
    RetryingTranslator::new(
        inner,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    )
}

const POOL_OF_TEARS: &str = r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<h1>The Pool of Tears</h1>
<p>Curiouser and curiouser!</p>
</body></html>"#;

/// Two-chapter EPUB; the second chapter's XHTML is given.
fn write_epub(path: &Path, chapter2: &str) {
    use zip::write::SimpleFileOptions;

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    zip.start_file("mimetype", options).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();

    zip.start_file("META-INF/container.xml", options).unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
    )
    .unwrap();

    zip.start_file("OEBPS/content.opf", options).unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Alice's Adventures in Wonderland</dc:title>
    <dc:creator>Lewis Carroll</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="c1" href="text/chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/chapter2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#,
    )
    .unwrap();

    zip.start_file("OEBPS/text/chapter1.xhtml", options).unwrap();
    zip.write_all(
        br#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<h1>Down the Rabbit-Hole</h1>
<p>Alice was beginning to get very tired of sitting by her sister.</p>
</body></html>"#,
    )
    .unwrap();

    zip.start_file("OEBPS/text/chapter2.xhtml", options).unwrap();
    zip.write_all(chapter2.as_bytes()).unwrap();

    zip.finish().unwrap();
}

// ========== READING SCENARIOS ==========

#[tokio::test]
async fn alice_resumes_at_page_42_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reader.db");
    let book_path = write_alice(dir.path());

    let book_id = {
        let lib = Library::new(Database::open(&db_path).unwrap(), Duration::from_secs(60));
        let book = lib.import(&book_path).unwrap();
        let translator = Arc::new(EchoTranslator::default());
        let mut reader = lib
            .open_reader(&book.id, one_line_pages(None), translator)
            .unwrap();
        assert_eq!(reader.pagination().len(), 100);

        for _ in 0..10 {
            reader.next();
        }
        assert_eq!(reader.jump_to_page(42), 42);
        assert!(reader.toggle_bookmark(Some("the pool of tears".into())));
        reader.close().unwrap();
        book.id
    };

    let lib = Library::new(Database::open(&db_path).unwrap(), Duration::from_secs(60));
    let reader = lib
        .open_reader(&book_id, one_line_pages(None), Arc::new(EchoTranslator::default()))
        .unwrap();
    let snapshot = reader.snapshot();
    assert_eq!(snapshot.page_index, 42);
    assert_eq!(snapshot.original, "Line 42");
    assert!(snapshot.bookmarked);

    let bookmarks = lib.sessions().bookmarks(&book_id);
    assert_eq!(bookmarks.len(), 1);
    assert_eq!(bookmarks[0].note.as_deref(), Some("the pool of tears"));
}

#[tokio::test]
async fn offline_translation_shows_original_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&write_alice(dir.path())).unwrap();

    let translator = Arc::new(fast_retries(OfflineTranslator::default()));
    let mut reader = lib
        .open_reader(&book.id, one_line_pages(Some("fr")), translator.clone())
        .unwrap();
    reader.await_translation().await;

    let snapshot = reader.snapshot();
    assert!(matches!(snapshot.state, TranslationState::Errored(_)));
    assert_eq!(snapshot.translated, snapshot.original);
    assert!(snapshot.error_badge.unwrap().contains("connection refused"));
    assert_eq!(translator.inner().calls(), 3);

    // Navigation is never blocked by a failed translation
    assert!(reader.next());
    assert_eq!(reader.snapshot().original, "Line 1");
}

#[tokio::test]
async fn switching_languages_back_uses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&write_alice(dir.path())).unwrap();

    let translator = Arc::new(EchoTranslator::default());
    let mut reader = lib
        .open_reader(&book.id, one_line_pages(Some("fr")), translator.clone())
        .unwrap();
    reader.await_translation().await;

    reader.set_target_language("de").unwrap();
    assert_eq!(
        reader.await_translation().await,
        &TranslationState::Ready("[de] Line 0".into())
    );

    reader.set_target_language("fr").unwrap();
    assert_eq!(reader.state(), &TranslationState::Ready("[fr] Line 0".into()));
    assert_eq!(translator.calls(), 2);
}

#[tokio::test]
async fn two_readers_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&write_alice(dir.path())).unwrap();

    let translator = Arc::new(GatedTranslator::default());
    let mut left = lib
        .open_reader(&book.id, one_line_pages(Some("fr")), translator.clone())
        .unwrap();
    let mut right = lib
        .open_reader(&book.id, one_line_pages(Some("fr")), translator.clone())
        .unwrap();
    assert_eq!(left.state(), &TranslationState::Loading);
    assert_eq!(right.state(), &TranslationState::Loading);

    translator.release(1);
    let (a, b) = tokio::join!(left.await_translation(), right.await_translation());
    assert_eq!(a, b);
    assert_eq!(translator.calls(), 1);
    assert_eq!(lib.cache().stats().coalesced, 1);
}

#[tokio::test]
async fn navigating_away_and_back_writes_each_page_once() {
    let translations = Arc::new(CountingStorage::default());
    let sessions = Arc::new(SessionStore::new(
        Arc::new(MemoryStorage::new()),
        Duration::ZERO,
    ));
    let translator = Arc::new(GatedTranslator::default());
    let doc = crate::library::Document::from_paragraphs((0..10).map(|i| format!("Line {}", i)));

    let mut reader = DualPanelReader::open(
        "alice",
        doc,
        one_line_pages(Some("fr")),
        TranslationCache::new(translations.clone()),
        sessions,
        translator.clone(),
    )
    .unwrap();

    assert!(reader.next());
    assert!(reader.prev());
    assert_eq!(reader.state(), &TranslationState::Loading);

    translator.release(2);
    reader.await_translation().await;
    assert!(reader.next());
    reader.await_translation().await;

    assert_eq!(translator.calls(), 2);
    assert_eq!(translations.writes(), 2);
    assert_eq!(translations.keys("book/alice/translation/").unwrap().len(), 2);
}

#[tokio::test]
async fn bookmark_toggle_twice_is_identity() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&write_alice(dir.path())).unwrap();

    let mut reader = lib
        .open_reader(&book.id, one_line_pages(None), Arc::new(EchoTranslator::default()))
        .unwrap();
    reader.jump_to_page(7);
    let before = lib.sessions().bookmarks(&book.id);

    assert!(reader.toggle_bookmark(None));
    assert!(!reader.toggle_bookmark(None));
    assert_eq!(lib.sessions().bookmarks(&book.id), before);
    assert!(!reader.snapshot().bookmarked);
}

// ========== IMPORT ==========

#[test]
fn import_epub_reads_metadata_and_spine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice.epub");
    write_epub(&path, POOL_OF_TEARS);

    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&path).unwrap();
    assert_eq!(book.format, BookFormat::Epub);
    assert_eq!(book.title, "Alice's Adventures in Wonderland");
    assert_eq!(book.authors_display(), "Lewis Carroll");
    assert_eq!(book.language.as_deref(), Some("en"));

    let doc = lib.document(&book.id).unwrap();
    assert_eq!(
        doc.blocks,
        vec![
            "Down the Rabbit-Hole",
            "Alice was beginning to get very tired of sitting by her sister.",
            "The Pool of Tears",
            "Curiouser and curiouser!",
        ]
    );

    let stored = lib.get(&book.id).unwrap();
    assert_eq!(stored.title, book.title);
    assert_eq!(stored.authors, vec!["Lewis Carroll".to_string()]);
}

#[test]
fn import_epub_chapter_with_html_entities() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice.epub");
    // Not valid XML: the entities are never declared
    write_epub(
        &path,
        r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<h1>The Pool of&nbsp;Tears</h1>
<p>&ldquo;Curiouser and curiouser!&rdquo; cried Alice &mdash; she was so much surprised&hellip;</p>
</body></html>"#,
    );

    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&path).unwrap();

    let doc = lib.document(&book.id).unwrap();
    assert_eq!(
        doc.blocks,
        vec![
            "Down the Rabbit-Hole",
            "Alice was beginning to get very tired of sitting by her sister.",
            "The Pool of Tears",
            "\u{201C}Curiouser and curiouser!\u{201D} cried Alice \u{2014} she was so much surprised\u{2026}",
        ]
    );
}

#[test]
fn import_mobi_reads_metadata_and_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice.mobi");
    let data = crate::formats::build_mobi(
        "Alice in Wonderland",
        "Lewis Carroll",
        "<html><head><title>ignored</title></head><body>\
         <h2>Chapter I</h2><p>Alice was beginning&hellip;</p><p>So she was considering.</p>\
         </body></html>",
    );
    std::fs::write(&path, data).unwrap();

    let lib = Library::new(Database::open_memory().unwrap(), Duration::ZERO);
    let book = lib.import(&path).unwrap();
    assert_eq!(book.format, BookFormat::Mobi);
    assert_eq!(book.title, "Alice in Wonderland");
    assert_eq!(book.authors_display(), "Lewis Carroll");

    let doc = lib.document(&book.id).unwrap();
    assert_eq!(
        doc.blocks,
        vec![
            "Chapter I",
            "Alice was beginning\u{2026}",
            "So she was considering."
        ]
    );
    assert_eq!(lib.get(&book.id).unwrap().authors, vec!["Lewis Carroll".to_string()]);
}

// ========== CONFIG ==========

#[test]
fn config_partial_toml_uses_defaults() {
    let config: Config = toml::from_str(
        r#"
[translation]
target_language = "de"
api_key = "secret"

[layout]
font_size = 20.0
"#,
    )
    .unwrap();

    assert_eq!(config.translation.target_language, "de");
    assert_eq!(config.translation.api_key.as_deref(), Some("secret"));
    assert_eq!(config.translation.max_attempts, 3);
    assert_eq!(config.layout.font_size, 20.0);
    assert_eq!(config.layout.margin, 24.0);
    assert_eq!(config.session.debounce(), Duration::from_secs(1));
    assert!(config.reader.sync_scrolling);

    let settings = ReaderSettings::from(&config);
    assert_eq!(settings.target_language.as_deref(), Some("de"));
}

#[test]
fn generated_config_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.translation.target_language, "fr");
    assert_eq!(config.layout, Default::default());
    assert_eq!(RetryPolicy::from(&config.translation), RetryPolicy::default());
}

#[test]
fn retrying_translator_passes_through_success() {
    let translator = fast_retries(EchoTranslator::default());
    let text = tokio_test::block_on(translator.translate("Hello", "pt-BR")).unwrap();
    assert_eq!(text, "[pt-BR] Hello");
    assert_eq!(translator.inner().calls(), 1);
}
