use async_trait::async_trait;

use super::NormalizeError;
use crate::models::{BoundingBox, NormalizationWarning, TextBlock};

/// Non-blank characters below which a PDF page counts as scanned.
pub const SCANNED_PAGE_MIN_CHARS: usize = 20;

/// One recognized line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
}

/// Raw OCR result for one page image.
#[derive(Debug, Clone)]
pub struct OcrPageResult {
    pub text: String,
    /// Mean word confidence, 0.0-1.0.
    pub confidence: f32,
    pub lines: Vec<OcrLine>,
}

/// External OCR capability (allows mocking for tests).
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an encoded page image. `languages` uses Tesseract
    /// syntax (`spa`, `eng`, `spa+eng`).
    async fn recognize(
        &self,
        image_bytes: &[u8],
        languages: &str,
    ) -> Result<OcrPageResult, NormalizeError>;
}

/// Knobs for a single normalization.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub ocr_enabled: bool,
    /// Tesseract language string. None = `spa+eng`.
    pub ocr_languages: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            ocr_languages: None,
        }
    }
}

/// Blocks produced by a format-specific extractor, before language detection.
#[derive(Debug, Clone, Default)]
pub struct ExtractedLayout {
    pub blocks: Vec<TextBlock>,
    pub page_count: usize,
    pub warnings: Vec<NormalizationWarning>,
}
