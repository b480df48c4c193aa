//! Document normalization: PDF / DOCX / TXT bytes into ordered text blocks.
//!
//! Scanned PDF pages are routed through an [`OcrEngine`]. Per-page OCR
//! failures degrade to an empty block plus a warning; only an unreadable
//! container fails the document.

pub mod types;
pub mod format;
pub mod sanitize;
pub mod language;
pub mod text;
pub mod docx;
pub mod pdf;
pub mod ocr;
pub mod normalizer;

pub use types::*;
pub use format::*;
pub use sanitize::*;
pub use language::*;
pub use ocr::*;
pub use normalizer::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Unsupported format: {media_type} ({filename})")]
    UnsupportedFormat { media_type: String, filename: String },

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Normalization cancelled")]
    Cancelled,
}
