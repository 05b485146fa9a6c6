//! EPUB format handler.

use crate::error::{AppError, Result};
use crate::formats::{self, FormatHandler};
use crate::library::book::Book;
use crate::library::document::Document;
use roxmltree::{Document as XmlDocument, Node, ParsingOptions};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// Handler for EPUB files.
pub struct EpubHandler;

/// Parsed OPF package: metadata is applied to the book, spine lists content files.
struct Package {
    title: Option<String>,
    authors: Vec<String>,
    language: Option<String>,
    /// Content document paths in reading order, relative to the OPF directory.
    spine: Vec<String>,
}

impl EpubHandler {
    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String> {
        let mut container = archive.by_name("META-INF/container.xml")?;
        let mut content = String::new();
        container.read_to_string(&mut content)?;

        let doc = XmlDocument::parse(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Parse the OPF file: metadata, manifest and spine.
    fn parse_opf(content: &str) -> Result<Package> {
        let doc = XmlDocument::parse(content)?;
        let mut package = Package {
            title: None,
            authors: Vec::new(),
            language: None,
            spine: Vec::new(),
        };
        let mut manifest: HashMap<&str, &str> = HashMap::new();

        for node in doc.descendants() {
            match node.tag_name().name() {
                "title" if package.title.is_none() => {
                    package.title = node.text().map(|t| t.trim().to_string());
                }
                "creator" => {
                    if let Some(text) = node.text() {
                        package.authors.push(text.trim().to_string());
                    }
                }
                "language" => {
                    package.language = node.text().map(|t| t.trim().to_string());
                }
                "item" => {
                    if let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) {
                        manifest.insert(id, href);
                    }
                }
                _ => {}
            }
        }

        for node in doc.descendants().filter(|n| n.has_tag_name("itemref")) {
            if node.attribute("linear") == Some("no") {
                continue;
            }
            if let Some(href) = node.attribute("idref").and_then(|id| manifest.get(id)) {
                package.spine.push(href.to_string());
            }
        }

        Ok(package)
    }

    fn read_package(archive: &mut ZipArchive<File>) -> Result<(String, Package)> {
        let opf_path = Self::find_opf_path(archive)?;
        let opf_dir = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        let mut opf_content = String::new();
        archive
            .by_name(&opf_path)?
            .read_to_string(&mut opf_content)?;

        Ok((opf_dir, Self::parse_opf(&opf_content)?))
    }

    /// Resolve a manifest href against the OPF directory.
    fn resolve_href(opf_dir: &str, href: &str) -> String {
        let href = href.split('#').next().unwrap_or(href);
        let mut parts: Vec<&str> = if opf_dir.is_empty() {
            Vec::new()
        } else {
            opf_dir.split('/').collect()
        };
        for segment in href.split('/') {
            match segment {
                "." | "" => {}
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }
        parts.join("/")
    }

    /// Append the paragraphs of one XHTML content document.
    fn append_chapter(xhtml: &str, doc: &mut Document) {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };

        match XmlDocument::parse_with_options(xhtml, options) {
            Ok(xml) => {
                let root = xml
                    .descendants()
                    .find(|n| n.has_tag_name("body"))
                    .unwrap_or_else(|| xml.root_element());
                collect_blocks(root, doc);
            }
            Err(e) => {
                // Undeclared entities are common in hand-made EPUBs
                tracing::debug!(error = %e, "Chapter is not well-formed XML, using lenient parser");
                doc.blocks
                    .extend(formats::html_to_document(xhtml).blocks);
            }
        }
    }
}

fn has_block_descendant(node: Node<'_, '_>) -> bool {
    node.descendants()
        .skip(1)
        .any(|n| n.is_element() && formats::is_block_tag(n.tag_name().name()))
}

fn collect_blocks(node: Node<'_, '_>, doc: &mut Document) {
    let mut inline = String::new();

    for child in node.children() {
        if child.is_text() {
            inline.push_str(child.text().unwrap_or(""));
            continue;
        }
        if !child.is_element() {
            continue;
        }

        let name = child.tag_name().name();
        if matches!(name, "script" | "style" | "head") {
            continue;
        }

        if formats::is_block_tag(name) {
            doc.push_paragraph(&inline);
            inline.clear();
            if has_block_descendant(child) {
                collect_blocks(child, doc);
            } else {
                doc.push_paragraph(&text_of(child));
            }
        } else {
            inline.push_str(&text_of(child));
        }
    }

    doc.push_paragraph(&inline);
}

fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

impl FormatHandler for EpubHandler {
    fn extract_metadata(&self, book: &mut Book) -> Result<()> {
        let file = File::open(&book.path)?;
        let mut archive = ZipArchive::new(file)?;
        let (_, package) = Self::read_package(&mut archive)?;

        if let Some(title) = package.title.filter(|t| !t.is_empty()) {
            book.title = title;
        }
        book.authors = package.authors;
        book.language = package.language;

        Ok(())
    }

    fn extract_document(&self, path: &Path) -> Result<Document> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let (opf_dir, package) = Self::read_package(&mut archive)?;

        if package.spine.is_empty() {
            return Err(AppError::Import("EPUB spine is empty".into()));
        }

        let mut doc = Document::default();
        for href in &package.spine {
            let full_path = Self::resolve_href(&opf_dir, href);
            let mut content = String::new();
            match archive.by_name(&full_path) {
                Ok(mut entry) => {
                    entry.read_to_string(&mut content)?;
                }
                Err(e) => {
                    tracing::warn!(path = %full_path, error = %e, "Spine item missing from archive");
                    continue;
                }
            }
            Self::append_chapter(&content, &mut doc);
        }

        Ok(doc)
    }
}
