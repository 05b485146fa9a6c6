//! Pagination of normalized documents into fixed-capacity pages.
//!
//! Pages are a pure function of the document and the layout: the same
//! inputs always produce the same boundaries. When the layout changes the
//! whole book is re-paginated and positions are carried over through the
//! reading fraction, since absolute page indices are not stable.

use crate::library::document::Document;
use serde::{Deserialize, Serialize};

/// Average glyph width as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f32 = 0.5;

/// Display configuration that determines page capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Font size in pixels.
    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// Margin on every side of a panel, in pixels.
    #[serde(default = "default_margin")]
    pub margin: f32,

    /// Share of the viewport width given to one panel (0.0 - 1.0).
    #[serde(default = "default_panel_ratio")]
    pub panel_ratio: f32,

    /// Viewport width in pixels.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f32,

    /// Viewport height in pixels.
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f32,

    /// Line height as a multiple of the font size.
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            margin: default_margin(),
            panel_ratio: default_panel_ratio(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            line_spacing: default_line_spacing(),
        }
    }
}

fn default_font_size() -> f32 {
    16.0
}

fn default_margin() -> f32 {
    24.0
}

fn default_panel_ratio() -> f32 {
    0.5
}

fn default_viewport_width() -> f32 {
    1280.0
}

fn default_viewport_height() -> f32 {
    800.0
}

fn default_line_spacing() -> f32 {
    1.4
}

impl LayoutConfig {
    /// Characters that fit on one line of a panel.
    pub fn chars_per_line(&self) -> usize {
        let panel_width = self.viewport_width * self.panel_ratio.clamp(0.0, 1.0) - 2.0 * self.margin;
        let glyph = (self.font_size * GLYPH_WIDTH_RATIO).max(f32::EPSILON);
        ((panel_width / glyph).floor() as usize).max(1)
    }

    /// Lines that fit on one page of a panel.
    pub fn lines_per_page(&self) -> usize {
        let height = self.viewport_height - 2.0 * self.margin;
        let line = (self.font_size * self.line_spacing).max(f32::EPSILON);
        ((height / line).floor() as usize).max(1)
    }

    /// Identifies the page boundaries this layout produces.
    ///
    /// Two layouts with the same capacity paginate identically, so the
    /// fingerprint is derived from capacity rather than raw settings.
    pub fn fingerprint(&self) -> String {
        format!("c{}l{}", self.chars_per_line(), self.lines_per_page())
    }
}

/// Position of a token inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextPosition {
    /// Block index.
    pub block: usize,
    /// Token index within the block.
    pub token: usize,
}

/// One page of original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Owning book.
    pub book_id: String,
    /// Zero-based page index.
    pub index: usize,
    /// First token on the page (inclusive).
    pub start: TextPosition,
    /// Position just past the last token on the page.
    pub end: TextPosition,
    /// Document-wide index of the first token.
    pub first_token: usize,
    /// Number of tokens on the page.
    pub token_count: usize,
    /// Page text; paragraphs separated by blank lines.
    pub text: String,
}

impl Page {
    /// Blocks touched by this page, inclusive.
    pub fn block_range(&self) -> std::ops::RangeInclusive<usize> {
        let last = if self.end.token == 0 && self.end.block > self.start.block {
            self.end.block - 1
        } else {
            self.end.block
        };
        self.start.block..=last
    }
}

struct PageBuilder<'a> {
    book_id: &'a str,
    chars_per_line: usize,
    lines_per_page: usize,
    pages: Vec<Page>,
    paragraphs: Vec<Vec<&'a str>>,
    start: TextPosition,
    first_token: usize,
    token_count: usize,
    line: usize,
    col: usize,
}

impl<'a> PageBuilder<'a> {
    fn has_tokens(&self) -> bool {
        self.token_count > 0
    }

    fn flush(&mut self, end: TextPosition) {
        let text = self
            .paragraphs
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.join(" "))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.pages.push(Page {
            book_id: self.book_id.to_string(),
            index: self.pages.len(),
            start: self.start,
            end,
            first_token: self.first_token,
            token_count: self.token_count,
            text,
        });

        self.first_token += self.token_count;
        self.token_count = 0;
        self.paragraphs.clear();
        self.start = end;
        self.line = 0;
        self.col = 0;
    }

    fn push(&mut self, token: &'a str) {
        if let Some(p) = self.paragraphs.last_mut() {
            p.push(token);
        } else {
            self.paragraphs.push(vec![token]);
        }
        self.token_count += 1;
    }

    /// Move to a fresh line, starting a new page when the current one is full.
    /// Returns true when a page was emitted.
    fn wrap(&mut self, at: TextPosition) -> bool {
        self.line += 1;
        self.col = 0;
        if self.line >= self.lines_per_page {
            self.flush(at);
            self.paragraphs.push(Vec::new());
            return true;
        }
        false
    }

    fn add_block(&mut self, block_index: usize, block: &'a str) {
        if self.has_tokens() {
            self.wrap(TextPosition {
                block: block_index,
                token: 0,
            });
        }
        if self.paragraphs.last().is_none_or(|p| !p.is_empty()) {
            self.paragraphs.push(Vec::new());
        }

        for (t, token) in block.split(' ').enumerate() {
            let width = token.chars().count();
            let at = TextPosition {
                block: block_index,
                token: t,
            };

            if self.col > 0 {
                if self.col + 1 + width <= self.chars_per_line {
                    self.col += 1 + width;
                    self.push(token);
                    continue;
                }
                self.wrap(at);
            }

            // Fresh line. Tokens wider than a line span several lines and are never split.
            let span = width.div_ceil(self.chars_per_line).max(1);
            if span > 1 && self.line + span > self.lines_per_page && self.has_tokens() {
                self.flush(at);
                self.paragraphs.push(Vec::new());
            }
            self.line += span - 1;
            self.col = if span > 1 { self.chars_per_line } else { width };
            self.push(token);
        }
    }
}

/// Split a document into pages for the given layout.
///
/// Each block starts on a new line; blocks longer than the remaining space
/// continue on the next page, split between tokens. An empty document
/// yields one empty page.
pub fn paginate(book_id: &str, doc: &Document, layout: &LayoutConfig) -> Vec<Page> {
    let mut builder = PageBuilder {
        book_id,
        chars_per_line: layout.chars_per_line(),
        lines_per_page: layout.lines_per_page(),
        pages: Vec::new(),
        paragraphs: Vec::new(),
        start: TextPosition { block: 0, token: 0 },
        first_token: 0,
        token_count: 0,
        line: 0,
        col: 0,
    };

    for (i, block) in doc.blocks.iter().enumerate() {
        builder.add_block(i, block);
    }

    if builder.has_tokens() || builder.pages.is_empty() {
        builder.flush(TextPosition {
            block: doc.blocks.len(),
            token: 0,
        });
    }

    builder.pages
}

/// A paginated book: pages plus the data needed to map positions.
#[derive(Debug, Clone)]
pub struct Pagination {
    pages: Vec<Page>,
    total_tokens: usize,
    fingerprint: String,
}

impl Pagination {
    /// Paginate a document.
    pub fn new(book_id: &str, doc: &Document, layout: &LayoutConfig) -> Self {
        let pages = paginate(book_id, doc, layout);
        let total_tokens = pages.iter().map(|p| p.token_count).sum();
        tracing::debug!(
            book_id,
            pages = pages.len(),
            tokens = total_tokens,
            layout = %layout.fingerprint(),
            "Paginated book"
        );
        Self {
            pages,
            total_tokens,
            fingerprint: layout.fingerprint(),
        }
    }

    /// All pages.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Page by index.
    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    /// Number of pages (always at least one).
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the book has no text at all.
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }

    /// Layout fingerprint these pages were computed for.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Clamp a page index into the valid range.
    pub fn clamp(&self, index: usize) -> usize {
        index.min(self.pages.len().saturating_sub(1))
    }

    /// Fraction of the book preceding the first token of a page.
    pub fn reading_fraction(&self, index: usize) -> f64 {
        if self.total_tokens == 0 {
            return 0.0;
        }
        let page = &self.pages[self.clamp(index)];
        page.first_token as f64 / self.total_tokens as f64
    }

    /// Page containing the token at the given fraction of the book.
    pub fn page_for_fraction(&self, fraction: f64) -> usize {
        if self.total_tokens == 0 || !fraction.is_finite() {
            return 0;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let target = ((fraction * self.total_tokens as f64).round() as usize)
            .min(self.total_tokens - 1);
        self.pages
            .partition_point(|p| p.first_token <= target)
            .saturating_sub(1)
    }

    /// Map a page of another pagination of the same document onto this one.
    pub fn remap_from(&self, old: &Pagination, old_index: usize) -> usize {
        self.page_for_fraction(old.reading_fraction(old_index))
    }
}
