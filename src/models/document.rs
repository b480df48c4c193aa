use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::enums::{BlockSource, InputFormat, Language};

/// Namespace for content-derived document ids (UUIDv5 over the SHA-256 digest).
const DOCUMENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_3a52_9b0e_4c27_8f44_2d5e_a7c1_0b93);

/// Immutable input document. Consumed by the normalizer.
#[derive(Debug, Clone)]
pub struct RawDocument {
    bytes: Vec<u8>,
    media_type: String,
    filename: String,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: &str, filename: &str) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.trim().to_lowercase(),
            filename: filename.to_string(),
        }
    }

    /// Read a file from disk, guessing the media type from its extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let media_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream");
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(bytes, media_type, &filename))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// SHA-256 digest of the payload, base64 encoded.
    pub fn content_hash(&self) -> String {
        let hash = Sha256::digest(&self.bytes);
        base64::engine::general_purpose::STANDARD.encode(hash)
    }

    /// Stable identity: identical bytes always map to the same id.
    pub fn document_id(&self) -> Uuid {
        let hash = Sha256::digest(&self.bytes);
        Uuid::new_v5(&DOCUMENT_ID_NAMESPACE, &hash)
    }
}

/// Bounding box of a text block, in source units (pixels for OCR, points for PDF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One unit of text in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    /// 0-based page index.
    pub page: usize,
    /// Position of the block within its page.
    pub index: usize,
    pub text: String,
    pub bounding_box: Option<BoundingBox>,
    pub source: BlockSource,
    pub confidence: f32,
}

/// Degradations recorded while normalizing; never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NormalizationWarning {
    OcrFailed { page: usize, reason: String },
    OcrDisabled { page: usize },
    NoPageImage { page: usize },
    LegacyEncoding { encoding: String },
}

/// Canonical text + layout representation of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub document_id: Uuid,
    pub source_name: String,
    pub format: InputFormat,
    pub blocks: Vec<TextBlock>,
    pub language: Language,
    pub page_count: usize,
    pub warnings: Vec<NormalizationWarning>,
}

impl NormalizedDocument {
    /// Full text with blocks joined in reading order.
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }

    /// Mean block confidence weighted by text length.
    pub fn text_confidence(&self) -> f32 {
        let total: usize = self.blocks.iter().map(|b| b.text.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let weighted: f32 = self
            .blocks
            .iter()
            .map(|b| b.confidence * b.text.len() as f32)
            .sum();
        weighted / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(page: usize, index: usize, text: &str, confidence: f32) -> TextBlock {
        TextBlock {
            page,
            index,
            text: text.into(),
            bounding_box: None,
            source: BlockSource::PlainText,
            confidence,
        }
    }

    #[test]
    fn document_id_is_content_derived() {
        let a = RawDocument::new(b"same bytes".to_vec(), "text/plain", "a.txt");
        let b = RawDocument::new(b"same bytes".to_vec(), "text/plain", "b.txt");
        let c = RawDocument::new(b"other bytes".to_vec(), "text/plain", "a.txt");
        assert_eq!(a.document_id(), b.document_id());
        assert_ne!(a.document_id(), c.document_id());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn media_type_is_normalized() {
        let doc = RawDocument::new(Vec::new(), " Application/PDF ", "x.pdf");
        assert_eq!(doc.media_type(), "application/pdf");
        assert!(doc.is_empty());
    }

    #[test]
    fn from_path_guesses_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factura.txt");
        std::fs::write(&path, "Factura 001").unwrap();
        let doc = RawDocument::from_path(&path).unwrap();
        assert_eq!(doc.media_type(), "text/plain");
        assert_eq!(doc.filename(), "factura.txt");
        assert_eq!(doc.len(), 11);
    }

    #[test]
    fn full_text_skips_empty_blocks() {
        let doc = NormalizedDocument {
            document_id: Uuid::nil(),
            source_name: "x".into(),
            format: InputFormat::Text,
            blocks: vec![block(0, 0, "one", 1.0), block(0, 1, "", 0.0), block(1, 0, "two", 1.0)],
            language: Language::Unknown,
            page_count: 2,
            warnings: vec![],
        };
        assert_eq!(doc.full_text(), "one\ntwo");
        assert_eq!(doc.word_count(), 2);
    }

    #[test]
    fn text_confidence_weights_by_length() {
        let doc = NormalizedDocument {
            document_id: Uuid::nil(),
            source_name: "x".into(),
            format: InputFormat::Pdf,
            blocks: vec![block(0, 0, "aaaaaaaaa", 1.0), block(1, 0, "b", 0.0)],
            language: Language::Unknown,
            page_count: 2,
            warnings: vec![],
        };
        assert!((doc.text_confidence() - 0.9).abs() < 1e-6);
    }
}
