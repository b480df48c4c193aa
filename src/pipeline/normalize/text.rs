//! Plain text decoding and block splitting.

use super::sanitize::sanitize_text;
use super::types::ExtractedLayout;
use crate::models::{BlockSource, NormalizationWarning, TextBlock};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const FORM_FEED: char = '\u{000C}';
const PLAIN_TEXT_CONFIDENCE: f32 = 0.99;

/// Windows-1252 code points for bytes 0x80-0x9F. Unassigned slots map to
/// their Latin-1 control character, which sanitization later strips.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž', '\u{8F}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9D}', 'ž', 'Ÿ',
];

/// Decode a text payload: UTF-8 (BOM stripped) or, failing that, Windows-1252.
/// Returns the text and the legacy encoding used, if any.
pub fn decode_text(bytes: &[u8]) -> (String, Option<&'static str>) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (decode_windows_1252(bytes), Some("windows-1252")),
    }
}

fn decode_windows_1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            // Latin-1 is the identity mapping onto U+0000-U+00FF
            _ => b as char,
        })
        .collect()
}

/// Split plain text into pages (form feed) and blocks (blank lines).
pub fn extract_text_layout(bytes: &[u8]) -> ExtractedLayout {
    let (text, legacy) = decode_text(bytes);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut pages: Vec<&str> = text.split(FORM_FEED).collect();
    // A trailing form feed does not open a new page
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }

    let mut blocks = Vec::new();
    for (page, page_text) in pages.iter().enumerate() {
        let mut index = 0;
        for paragraph in split_paragraphs(page_text) {
            let clean = sanitize_text(&paragraph);
            if clean.is_empty() {
                continue;
            }
            blocks.push(TextBlock {
                page,
                index,
                text: clean,
                bounding_box: None,
                source: BlockSource::PlainText,
                confidence: PLAIN_TEXT_CONFIDENCE,
            });
            index += 1;
        }
    }

    let warnings = legacy
        .map(|encoding| {
            vec![NormalizationWarning::LegacyEncoding {
                encoding: encoding.to_string(),
            }]
        })
        .unwrap_or_default();

    ExtractedLayout {
        blocks,
        page_count: pages.len(),
        warnings,
    }
}

/// Group consecutive non-blank lines into paragraphs.
pub(crate) fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bom_is_stripped() {
        let (text, legacy) = decode_text(b"\xEF\xBB\xBFFactura");
        assert_eq!(text, "Factura");
        assert!(legacy.is_none());
    }

    #[test]
    fn invalid_utf8_falls_back_to_windows_1252() {
        // "Año 2024 – 10€" in cp1252
        let bytes = b"A\xF1o 2024 \x96 10\x80";
        let (text, legacy) = decode_text(bytes);
        assert_eq!(text, "Año 2024 – 10€");
        assert_eq!(legacy, Some("windows-1252"));
    }

    #[test]
    fn blank_lines_separate_blocks() {
        let layout = extract_text_layout(b"Factura 001\nCliente: ACME\n\n\nTotal: 121,00");
        assert_eq!(layout.page_count, 1);
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(layout.blocks[0].text, "Factura 001\nCliente: ACME");
        assert_eq!(layout.blocks[1].index, 1);
        assert!(layout.warnings.is_empty());
    }

    #[test]
    fn form_feed_separates_pages() {
        let layout = extract_text_layout(b"page one\x0cpage two\n\nmore\x0c");
        assert_eq!(layout.page_count, 2);
        let pages: Vec<_> = layout.blocks.iter().map(|b| (b.page, b.index)).collect();
        assert_eq!(pages, vec![(0, 0), (1, 0), (1, 1)]);
    }

    #[test]
    fn crlf_line_endings_handled() {
        let layout = extract_text_layout(b"one\r\n\r\ntwo\r\n");
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(layout.blocks[1].text, "two");
    }

    #[test]
    fn legacy_encoding_is_warned() {
        let layout = extract_text_layout(b"Se\xf1or");
        assert_eq!(
            layout.warnings,
            vec![NormalizationWarning::LegacyEncoding {
                encoding: "windows-1252".into()
            }]
        );
        assert_eq!(layout.blocks[0].text, "Señor");
    }

    #[test]
    fn empty_text_has_no_blocks() {
        let layout = extract_text_layout(b"");
        assert!(layout.blocks.is_empty());
        assert_eq!(layout.page_count, 1);
    }
}
