mod epub;
mod mobi;

pub use epub::EpubHandler;
pub use mobi::MobiHandler;

#[cfg(test)]
pub(crate) use mobi::tests::build_mobi;

use crate::error::Result;
use crate::library::book::Book;
use crate::library::document::{self, Document};
use scraper::{ElementRef, Html, Node, Selector};
use std::path::Path;

/// Trait for format-specific book handlers.
pub trait FormatHandler: Send + Sync {
    /// Extract metadata from a book file.
    fn extract_metadata(&self, book: &mut Book) -> Result<()>;

    /// Extract the normalized text of a book.
    fn extract_document(&self, path: &Path) -> Result<Document>;
}

/// Get the appropriate handler for a book format.
pub fn get_handler(format: crate::config::BookFormat) -> Box<dyn FormatHandler> {
    use crate::config::BookFormat;

    match format {
        BookFormat::Epub => Box::new(EpubHandler),
        BookFormat::Mobi => Box::new(MobiHandler),
        BookFormat::Txt => Box::new(TextHandler),
    }
}

/// Plain text handler: paragraphs are separated by blank lines.
struct TextHandler;

impl FormatHandler for TextHandler {
    fn extract_metadata(&self, _book: &mut Book) -> Result<()> {
        Ok(())
    }

    fn extract_document(&self, path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(document::paragraphs_from_text(&text))
    }
}

/// Tags that start a new paragraph.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "dd", "dt", "td",
    "tr", "section", "article", "br", "hr", "mbp:pagebreak",
];

/// Whether an element name is paragraph-level.
pub(crate) fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

/// Lenient HTML to document conversion.
///
/// Used for MOBI text and for EPUB chapters that are not well-formed XML.
/// Only the body is read; script and style content is dropped and block
/// elements end the current paragraph.
pub(crate) fn html_to_document(html: &str) -> Document {
    let html = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| html.select(&selector).next())
        .unwrap_or_else(|| html.root_element());

    let mut doc = Document::default();
    collect_html_blocks(body, &mut doc);
    doc
}

fn has_html_block_descendant(element: ElementRef<'_>) -> bool {
    element
        .descendants()
        .skip(1)
        .filter_map(|n| n.value().as_element())
        .any(|e| is_block_tag(e.name()))
}

fn collect_html_blocks(element: ElementRef<'_>, doc: &mut Document) {
    let mut inline = String::new();

    for child in element.children() {
        if let Node::Text(text) = child.value() {
            inline.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };

        let name = child.value().name();
        if matches!(name, "script" | "style" | "head" | "title") {
            continue;
        }

        let nested = has_html_block_descendant(child);
        if is_block_tag(name) || nested {
            doc.push_paragraph(&inline);
            inline.clear();
            if nested {
                collect_html_blocks(child, doc);
            } else {
                doc.push_paragraph(&child.text().collect::<String>());
            }
        } else {
            inline.extend(child.text());
        }
    }

    doc.push_paragraph(&inline);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_document() {
        let html = "<html><head><style>p { color: red; }</style></head><body>\
                    <h1>Chapter&nbsp;1</h1><p>Alice was <i>beginning</i> to get</p>\
                    <p>very tired &amp; bored.<br/>Next</p><script>var x = '<p>';</script></body></html>";
        let doc = html_to_document(html);
        assert_eq!(
            doc.blocks,
            vec![
                "Chapter 1",
                "Alice was beginning to get",
                "very tired & bored.",
                "Next"
            ]
        );
    }

    #[test]
    fn test_html_named_entities_and_head() {
        let html = "<html><head><title>Chapter One</title></head><body>\
                    <p>She said &mdash; &ldquo;Curiouser&rdquo; &hellip; it&rsquo;s late</p>\
                    <p>caf&eacute; &#233;&#x41;</p></body></html>";
        let doc = html_to_document(html);
        assert_eq!(
            doc.blocks,
            vec![
                "She said \u{2014} \u{201C}Curiouser\u{201D} \u{2026} it\u{2019}s late",
                "café éA"
            ]
        );
    }

    #[test]
    fn test_html_fragment_without_body() {
        // MOBI text records are often bare fragments
        let doc = html_to_document("Loose text<div><p>One</p><p>Two</p></div>tail");
        assert_eq!(doc.blocks, vec!["Loose text", "One", "Two", "tail"]);
    }
}
