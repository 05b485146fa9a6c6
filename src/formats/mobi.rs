//! MOBI (Mobipocket / PalmDOC) format handler.

use crate::error::{AppError, Result};
use crate::formats::{self, FormatHandler};
use crate::library::book::Book;
use crate::library::document::{self, Document};
use std::path::Path;

/// Handler for MOBI files.
pub struct MobiHandler;

const PDB_HEADER_LEN: usize = 78;
const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_PALMDOC: u16 = 2;
const COMPRESSION_HUFF: u16 = 17480;
const ENCODING_UTF8: u32 = 65001;

const EXTH_AUTHOR: u32 = 100;
const EXTH_UPDATED_TITLE: u32 = 503;
const EXTH_LANGUAGE: u32 = 524;

/// Parsed MOBI container.
#[derive(Debug, Default)]
struct MobiFile {
    title: String,
    authors: Vec<String>,
    language: Option<String>,
    /// Whether record 0 carries a MOBI header (HTML content) rather than plain PalmDOC.
    is_mobi: bool,
    text: String,
}

fn be_u16(data: &[u8], at: usize) -> Result<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| AppError::Import(format!("MOBI truncated at offset {}", at)))
}

fn be_u32(data: &[u8], at: usize) -> Result<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AppError::Import(format!("MOBI truncated at offset {}", at)))
}

/// Slice of PalmDB record `i`; records run until the next record's offset.
fn record<'a>(data: &'a [u8], offsets: &[usize], i: usize) -> Result<&'a [u8]> {
    let start = *offsets
        .get(i)
        .ok_or_else(|| AppError::Import(format!("Missing record {}", i)))?;
    let end = offsets.get(i + 1).copied().unwrap_or(data.len());
    data.get(start..end)
        .ok_or_else(|| AppError::Import(format!("Record {} out of bounds", i)))
}

impl MobiHandler {
    fn parse(data: &[u8]) -> Result<MobiFile> {
        if data.len() < PDB_HEADER_LEN {
            return Err(AppError::Import("File too small for a PalmDB header".into()));
        }
        let kind = &data[60..68];
        if kind != b"BOOKMOBI" && kind != b"TEXtREAd" {
            return Err(AppError::Import("Not a MOBI/PalmDOC file".into()));
        }

        let num_records = be_u16(data, 76)? as usize;
        let mut offsets = Vec::with_capacity(num_records);
        for i in 0..num_records {
            offsets.push(be_u32(data, PDB_HEADER_LEN + i * 8)? as usize);
        }
        let rec0 = record(data, &offsets, 0)?;
        let compression = be_u16(rec0, 0)?;
        let text_records = be_u16(rec0, 8)? as usize;
        let encryption = be_u16(rec0, 12)?;

        if encryption != 0 {
            return Err(AppError::Import("Encrypted (DRM) MOBI files are not supported".into()));
        }
        if compression == COMPRESSION_HUFF {
            return Err(AppError::Import("HUFF/CDIC compressed MOBI is not supported".into()));
        }
        if compression != COMPRESSION_NONE && compression != COMPRESSION_PALMDOC {
            return Err(AppError::Import(format!("Unknown MOBI compression {}", compression)));
        }

        let pdb_name = String::from_utf8_lossy(&data[..32])
            .trim_end_matches('\0')
            .replace('_', " ");
        let mut book = MobiFile {
            title: pdb_name,
            ..MobiFile::default()
        };

        let mut encoding = 1252;
        let mut trailing_flags = 0u16;
        if rec0.get(16..20) == Some(&b"MOBI"[..]) {
            book.is_mobi = true;
            let header_len = be_u32(rec0, 20)? as usize;
            encoding = be_u32(rec0, 28)?;

            let name_offset = be_u32(rec0, 84)? as usize;
            let name_len = be_u32(rec0, 88)? as usize;
            if let Some(name) = rec0.get(name_offset..name_offset + name_len) {
                book.title = decode_text(name, encoding);
            }

            if header_len >= 0xE4 {
                trailing_flags = be_u16(rec0, 0xF2)?;
            }

            let exth_flags = be_u32(rec0, 0x80).unwrap_or(0);
            if exth_flags & 0x40 != 0 {
                Self::parse_exth(rec0, 16 + header_len, encoding, &mut book);
            }
        }

        let mut raw = Vec::new();
        for i in 1..=text_records {
            let rec = record(data, &offsets, i)?;
            let trailing = trailing_entries_size(rec, trailing_flags);
            let rec = &rec[..rec.len().saturating_sub(trailing)];
            match compression {
                COMPRESSION_PALMDOC => raw.extend(palmdoc_decompress(rec)),
                _ => raw.extend_from_slice(rec),
            }
        }
        book.text = decode_text(&raw, encoding);

        Ok(book)
    }

    /// Read author, title and language records from the EXTH block.
    fn parse_exth(rec0: &[u8], start: usize, encoding: u32, book: &mut MobiFile) {
        if rec0.get(start..start + 4) != Some(&b"EXTH"[..]) {
            return;
        }
        let Ok(count) = be_u32(rec0, start + 8) else {
            return;
        };

        let mut pos = start + 12;
        for _ in 0..count {
            let (Ok(kind), Ok(len)) = (be_u32(rec0, pos), be_u32(rec0, pos + 4)) else {
                return;
            };
            let len = len as usize;
            if len < 8 {
                return;
            }
            let Some(value) = rec0.get(pos + 8..pos + len) else {
                return;
            };
            let value = decode_text(value, encoding).trim().to_string();
            match kind {
                EXTH_AUTHOR => book.authors.push(value),
                EXTH_UPDATED_TITLE => book.title = value,
                EXTH_LANGUAGE => book.language = Some(value),
                _ => {}
            }
            pos += len;
        }
    }
}

/// Decode MOBI text; any encoding other than UTF-8 is read as CP1252.
fn decode_text(bytes: &[u8], encoding: u32) -> String {
    let codec = if encoding == ENCODING_UTF8 {
        encoding_rs::UTF_8
    } else {
        encoding_rs::WINDOWS_1252
    };
    let (text, _, had_errors) = codec.decode(bytes);
    if had_errors {
        tracing::debug!(codec = codec.name(), "Replaced malformed bytes in MOBI text");
    }
    text.into_owned()
}

/// Size of the trailing entries appended to a text record.
fn trailing_entries_size(rec: &[u8], flags: u16) -> usize {
    let mut size = 0;
    let mut bits = flags >> 1;
    while bits != 0 {
        if bits & 1 != 0 {
            size += backward_varint(rec, rec.len().saturating_sub(size));
        }
        bits >>= 1;
    }
    if flags & 1 != 0 && rec.len() > size {
        size += (rec[rec.len() - size - 1] & 0x3) as usize + 1;
    }
    size.min(rec.len())
}

fn backward_varint(rec: &[u8], mut end: usize) -> usize {
    let mut result = 0usize;
    let mut shift = 0;
    while end > 0 {
        let byte = rec[end - 1];
        result |= ((byte & 0x7F) as usize) << shift;
        shift += 7;
        end -= 1;
        if byte & 0x80 != 0 || shift >= 28 {
            break;
        }
    }
    result
}

/// PalmDOC LZ77 decompression.
fn palmdoc_decompress(input: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(input.len() * 2);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;
        match c {
            0x01..=0x08 => {
                let end = (i + c as usize).min(input.len());
                out.extend_from_slice(&input[i..end]);
                i = end;
            }
            0x00 | 0x09..=0x7F => out.push(c),
            0x80..=0xBF => {
                let Some(&next) = input.get(i) else { break };
                i += 1;
                let pair = ((c as usize) << 8) | next as usize;
                let distance = (pair >> 3) & 0x07FF;
                let length = (pair & 0x7) + 3;
                if distance == 0 || distance > out.len() {
                    continue;
                }
                let start = out.len() - distance;
                for k in 0..length {
                    out.push(out[start + k]);
                }
            }
            _ => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
        }
    }

    out
}

impl FormatHandler for MobiHandler {
    fn extract_metadata(&self, book: &mut Book) -> Result<()> {
        let data = std::fs::read(&book.path)?;
        let mobi = Self::parse(&data)?;

        if !mobi.title.is_empty() {
            book.title = mobi.title;
        }
        book.authors = mobi.authors;
        book.language = mobi.language;
        Ok(())
    }

    fn extract_document(&self, path: &Path) -> Result<Document> {
        let data = std::fs::read(path)?;
        let mobi = Self::parse(&data)?;

        if mobi.is_mobi {
            Ok(formats::html_to_document(&mobi.text))
        } else {
            Ok(document::paragraphs_from_text(&mobi.text))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an uncompressed single-text-record MOBI file.
    pub(crate) fn build_mobi(title: &str, author: &str, html: &str) -> Vec<u8> {
        let mut exth = Vec::new();
        exth.extend_from_slice(b"EXTH");
        exth.extend_from_slice(&(12 + 8 + author.len() as u32).to_be_bytes());
        exth.extend_from_slice(&1u32.to_be_bytes());
        exth.extend_from_slice(&EXTH_AUTHOR.to_be_bytes());
        exth.extend_from_slice(&(8 + author.len() as u32).to_be_bytes());
        exth.extend_from_slice(author.as_bytes());

        let header_len = 0xE8u32;
        let mut rec0 = vec![0u8; 16 + header_len as usize];
        rec0[0..2].copy_from_slice(&COMPRESSION_NONE.to_be_bytes());
        rec0[4..8].copy_from_slice(&(html.len() as u32).to_be_bytes());
        rec0[8..10].copy_from_slice(&1u16.to_be_bytes());
        rec0[10..12].copy_from_slice(&4096u16.to_be_bytes());
        rec0[16..20].copy_from_slice(b"MOBI");
        rec0[20..24].copy_from_slice(&header_len.to_be_bytes());
        rec0[28..32].copy_from_slice(&ENCODING_UTF8.to_be_bytes());
        rec0[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());
        rec0.extend_from_slice(&exth);
        let name_offset = rec0.len() as u32;
        rec0[84..88].copy_from_slice(&name_offset.to_be_bytes());
        rec0[88..92].copy_from_slice(&(title.len() as u32).to_be_bytes());
        rec0.extend_from_slice(title.as_bytes());

        let mut data = vec![0u8; PDB_HEADER_LEN];
        data[..4].copy_from_slice(b"test");
        data[60..68].copy_from_slice(b"BOOKMOBI");
        data[76..78].copy_from_slice(&2u16.to_be_bytes());
        let rec0_offset = PDB_HEADER_LEN + 2 * 8;
        let rec1_offset = rec0_offset + rec0.len();
        data.extend_from_slice(&(rec0_offset as u32).to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(rec1_offset as u32).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&rec0);
        data.extend_from_slice(html.as_bytes());
        data
    }

    #[test]
    fn test_parse_uncompressed_mobi() {
        let data = build_mobi(
            "Alice in Wonderland",
            "Lewis Carroll",
            "<html><body><p>Alice was beginning.</p><p>So she was considering.</p></body></html>",
        );
        let mobi = MobiHandler::parse(&data).unwrap();
        assert!(mobi.is_mobi);
        assert_eq!(mobi.title, "Alice in Wonderland");
        assert_eq!(mobi.authors, vec!["Lewis Carroll"]);

        let doc = formats::html_to_document(&mobi.text);
        assert_eq!(
            doc.blocks,
            vec!["Alice was beginning.", "So she was considering."]
        );
    }

    #[test]
    fn test_palmdoc_decompress() {
        // "abcabcabc": literals, then a back-reference of distance 3, length 6
        let pair: u16 = 0x8000 | (3 << 3) | (6 - 3);
        let mut input = b"abc".to_vec();
        input.extend_from_slice(&pair.to_be_bytes());
        assert_eq!(palmdoc_decompress(&input), b"abcabcabc");

        // Space + character encoding
        assert_eq!(palmdoc_decompress(&[b'a', 0xE2]), b"a b");
    }

    #[test]
    fn test_decode_text_cp1252() {
        // Smart quotes and em dash live in the 0x80-0x9F range
        assert_eq!(
            decode_text(&[0x93, b'h', b'i', 0x94, b' ', 0x97], 1252),
            "\u{201C}hi\u{201D} \u{2014}"
        );
        assert_eq!(decode_text(&[0xE9, b't', 0xE9], 1252), "été");
        assert_eq!(decode_text("thé".as_bytes(), ENCODING_UTF8), "thé");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            MobiHandler::parse(&[0u8; 100]),
            Err(AppError::Import(_))
        ));
        assert!(matches!(MobiHandler::parse(b"short"), Err(AppError::Import(_))));
    }
}
