use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::docx::extract_docx_layout;
use super::format::resolve_format;
use super::language::detect_language;
use super::pdf::{read_pdf_pages, PdfPage};
use super::sanitize::sanitize_line;
use super::text::extract_text_layout;
use super::types::{ExtractedLayout, NormalizeOptions, OcrEngine};
use super::NormalizeError;
use crate::models::{
    BlockSource, InputFormat, Language, NormalizationWarning, NormalizedDocument, RawDocument,
    TextBlock,
};

/// Converts raw PDF / DOCX / TXT payloads into a `NormalizedDocument`.
#[derive(Clone)]
pub struct DocumentNormalizer {
    ocr: Arc<dyn OcrEngine>,
    ocr_pages: Arc<AtomicUsize>,
}

impl DocumentNormalizer {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            ocr,
            ocr_pages: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Page images handed to the OCR engine so far, shared across clones.
    pub fn ocr_pages(&self) -> usize {
        self.ocr_pages.load(Ordering::Relaxed)
    }

    /// Normalize one document. Consumes the raw payload.
    ///
    /// Fails only for unsupported formats, unreadable containers, or
    /// cancellation. OCR problems degrade to empty blocks plus warnings.
    pub async fn normalize(
        &self,
        raw: RawDocument,
        options: &NormalizeOptions,
        cancel: &CancellationToken,
    ) -> Result<NormalizedDocument, NormalizeError> {
        let format = resolve_format(raw.media_type(), raw.filename(), raw.bytes()).ok_or_else(
            || NormalizeError::UnsupportedFormat {
                media_type: raw.media_type().to_string(),
                filename: raw.filename().to_string(),
            },
        )?;
        let document_id = raw.document_id();
        let source_name = raw.filename().to_string();

        tracing::info!(
            document_id = %document_id,
            format = format.as_str(),
            size_bytes = raw.len(),
            "Normalizing document"
        );

        let bytes = raw.into_bytes();
        let layout = match format {
            InputFormat::Text => extract_text_layout(&bytes),
            InputFormat::Docx => run_blocking(move || extract_docx_layout(&bytes)).await?,
            InputFormat::Pdf => {
                let pages = run_blocking(move || read_pdf_pages(&bytes)).await?;
                self.layout_pdf(pages, options, cancel).await?
            }
        };

        let mut doc = NormalizedDocument {
            document_id,
            source_name,
            format,
            blocks: layout.blocks,
            language: Language::Unknown,
            page_count: layout.page_count,
            warnings: layout.warnings,
        };
        doc.language = detect_language(&doc.full_text());

        tracing::info!(
            document_id = %doc.document_id,
            blocks = doc.blocks.len(),
            pages = doc.page_count,
            language = doc.language.as_str(),
            warnings = doc.warnings.len(),
            "Normalization complete"
        );
        Ok(doc)
    }

    /// Assemble PDF blocks, sending scanned pages through OCR.
    async fn layout_pdf(
        &self,
        pages: Vec<PdfPage>,
        options: &NormalizeOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtractedLayout, NormalizeError> {
        let languages = options.ocr_languages.clone().unwrap_or_else(|| {
            // Hint Tesseract with whatever the text layer already tells us
            let digital: Vec<&str> = pages
                .iter()
                .filter(|p| !p.is_scanned())
                .map(|p| p.text.as_str())
                .collect();
            detect_language(&digital.join("\n")).tesseract_code().to_string()
        });

        let mut layout = ExtractedLayout {
            page_count: pages.len(),
            ..ExtractedLayout::default()
        };

        for page in pages {
            if !page.is_scanned() {
                layout.blocks.extend(page.text_blocks());
                continue;
            }

            let image = match (&page.image, options.ocr_enabled) {
                (_, false) => {
                    layout.warnings.push(NormalizationWarning::OcrDisabled { page: page.index });
                    None
                }
                (None, true) => {
                    tracing::warn!(page = page.index, "Scanned page has no extractable image");
                    layout.warnings.push(NormalizationWarning::NoPageImage { page: page.index });
                    None
                }
                (Some(image), true) => Some(image),
            };

            let Some(image) = image else {
                layout.blocks.extend(fallback_blocks(&page));
                continue;
            };

            self.ocr_pages.fetch_add(1, Ordering::Relaxed);
            let recognized = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NormalizeError::Cancelled),
                result = self.ocr.recognize(image, &languages) => result,
            };

            match recognized {
                Ok(result) => {
                    let blocks = ocr_blocks(page.index, result.lines);
                    tracing::debug!(
                        page = page.index,
                        blocks = blocks.len(),
                        confidence = result.confidence,
                        "OCR page complete"
                    );
                    if blocks.is_empty() {
                        layout.blocks.extend(fallback_blocks(&page));
                    } else {
                        layout.blocks.extend(blocks);
                    }
                }
                Err(e) => {
                    tracing::warn!(page = page.index, error = %e, "OCR failed for page");
                    layout.warnings.push(NormalizationWarning::OcrFailed {
                        page: page.index,
                        reason: e.to_string(),
                    });
                    layout.blocks.extend(fallback_blocks(&page));
                }
            }
        }

        Ok(layout)
    }
}

fn ocr_blocks(page: usize, lines: Vec<super::OcrLine>) -> Vec<TextBlock> {
    lines
        .into_iter()
        .filter_map(|line| {
            let text = sanitize_line(&line.text);
            (!text.is_empty()).then_some((text, line))
        })
        .enumerate()
        .map(|(index, (text, line))| TextBlock {
            page,
            index,
            text,
            bounding_box: line.bounding_box,
            source: BlockSource::Ocr,
            confidence: line.confidence,
        })
        .collect()
}

/// Whatever thin text layer the page has, or a single empty block.
fn fallback_blocks(page: &PdfPage) -> Vec<TextBlock> {
    let blocks = page.text_blocks();
    if !blocks.is_empty() {
        return blocks;
    }
    vec![TextBlock {
        page: page.index,
        index: 0,
        text: String::new(),
        bounding_box: None,
        source: BlockSource::Ocr,
        confidence: 0.0,
    }]
}

async fn run_blocking<T, F>(f: F) -> Result<T, NormalizeError>
where
    F: FnOnce() -> Result<T, NormalizeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| NormalizeError::Io(std::io::Error::other(e)))?
}
