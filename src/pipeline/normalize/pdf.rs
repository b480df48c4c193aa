//! PDF reading with lopdf: per-page text layer plus, for scanned pages, the
//! largest embedded JPEG / JPEG 2000 image to hand to OCR.

use lopdf::{Dictionary, Document, Object, ObjectId};

use super::sanitize::{non_blank_chars, sanitize_text};
use super::text::split_paragraphs;
use super::types::SCANNED_PAGE_MIN_CHARS;
use super::NormalizeError;
use crate::models::{BlockSource, TextBlock};

/// Confidence assigned to text read from a PDF text layer.
pub const TEXT_LAYER_CONFIDENCE: f32 = 0.95;

/// Max depth when walking the page tree for inherited resources.
const MAX_PARENT_DEPTH: usize = 16;

/// One page as read from the PDF, before OCR.
#[derive(Debug, Clone)]
pub struct PdfPage {
    /// 0-based page index.
    pub index: usize,
    pub text: String,
    /// Encoded page image, only looked up for scanned pages.
    pub image: Option<Vec<u8>>,
}

impl PdfPage {
    pub fn is_scanned(&self) -> bool {
        non_blank_chars(&self.text) < SCANNED_PAGE_MIN_CHARS
    }

    /// Text-layer blocks for this page (paragraphs split on blank lines).
    pub fn text_blocks(&self) -> Vec<TextBlock> {
        split_paragraphs(&self.text)
            .iter()
            .map(|p| sanitize_text(p))
            .filter(|t| !t.is_empty())
            .enumerate()
            .map(|(index, text)| TextBlock {
                page: self.index,
                index,
                text,
                bounding_box: None,
                source: BlockSource::TextLayer,
                confidence: TEXT_LAYER_CONFIDENCE,
            })
            .collect()
    }
}

/// Read every page of a PDF. Blocking; run on the blocking pool.
pub fn read_pdf_pages(bytes: &[u8]) -> Result<Vec<PdfPage>, NormalizeError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| NormalizeError::CorruptDocument(format!("PDF parsing failed: {e}")))?;

    let pages = doc.get_pages();
    let mut result = Vec::with_capacity(pages.len());
    for (index, (&number, &page_id)) in pages.iter().enumerate() {
        let text = match doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(page = index, error = %e, "PDF text layer unreadable, treating page as scanned");
                String::new()
            }
        };
        let mut page = PdfPage {
            index,
            text,
            image: None,
        };
        if page.is_scanned() {
            page.image = largest_page_image(&doc, page_id);
        }
        result.push(page);
    }
    Ok(result)
}

/// Largest DCT/JPX image XObject drawn on the page.
fn largest_page_image(doc: &Document, page_id: ObjectId) -> Option<Vec<u8>> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| resolve(doc, obj)?.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Image")
        })
        .filter(|stream| is_ocr_ready_filter(doc, &stream.dict))
        .max_by_key(|stream| stream.content.len())
        .map(|stream| stream.content.clone())
}

/// Resources dictionary for a page, following `Parent` inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Only images whose stream is already a standalone encoded file.
fn is_ocr_ready_filter(doc: &Document, dict: &Dictionary) -> bool {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return false;
    };
    let last = match filter {
        Object::Array(filters) => filters.last(),
        other => Some(other),
    };
    last.and_then(|f| f.as_name().ok())
        .is_some_and(|name| name == b"DCTDecode" || name == b"JPXDecode")
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}
