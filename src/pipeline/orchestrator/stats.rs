use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use super::PipelineError;
use crate::models::ExtractionRecord;
use crate::pipeline::agents::InferenceUsage;

/// Lifetime counters for one orchestrator and its clones.
///
/// Batch summaries describe a single batch; these accumulate across every
/// `process`, `submit` and `process_batch` call.
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    review_required: AtomicUsize,
    pages: AtomicUsize,
    extraction_retries: AtomicUsize,
}

impl PipelineStats {
    pub fn record_outcome(&self, outcome: &Result<ExtractionRecord, PipelineError>) {
        match outcome {
            Ok(record) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.pages.fetch_add(record.page_count, Ordering::Relaxed);
                if record.review_required {
                    self.review_required.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) if e.is_cancelled() => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_retry(&self) {
        self.extraction_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy. `ocr_pages` and `inference` come from the normalizer and
    /// the inference pool, which count their own calls.
    pub fn snapshot(&self, ocr_pages: usize, inference: InferenceUsage) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let pages = self.pages.load(Ordering::Relaxed);
        StatsSnapshot {
            documents_processed: processed,
            documents_failed: self.failed.load(Ordering::Relaxed),
            documents_cancelled: self.cancelled.load(Ordering::Relaxed),
            review_required: self.review_required.load(Ordering::Relaxed),
            pages_extracted: pages,
            avg_pages_per_document: if processed == 0 {
                0.0
            } else {
                pages as f64 / processed as f64
            },
            ocr_pages,
            extraction_retries: self.extraction_retries.load(Ordering::Relaxed),
            inference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub documents_cancelled: usize,
    pub review_required: usize,
    pub pages_extracted: usize,
    pub avg_pages_per_document: f64,
    /// Scanned pages sent to the OCR engine.
    pub ocr_pages: usize,
    pub extraction_retries: usize,
    pub inference: InferenceUsage,
}
