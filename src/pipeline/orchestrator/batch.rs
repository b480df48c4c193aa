use std::collections::BTreeMap;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::runner::Orchestrator;
use super::PipelineError;
use crate::config::RunOptions;
use crate::models::{DocumentType, ExtractionRecord, Language, RawDocument};

/// Outcome of one document in a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub source_name: String,
    pub outcome: Result<ExtractionRecord, PipelineError>,
}

/// Aggregate counters over a batch. Breakdowns cover successful runs only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub review_required: usize,
    pub by_type: BTreeMap<DocumentType, usize>,
    pub by_language: BTreeMap<Language, usize>,
    pub total_pages: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Result<ExtractionRecord, PipelineError>) {
        self.total += 1;
        match outcome {
            Ok(record) => {
                self.processed += 1;
                if record.review_required {
                    self.review_required += 1;
                }
                *self.by_type.entry(record.document_type).or_default() += 1;
                *self.by_language.entry(record.language).or_default() += 1;
                self.total_pages += record.page_count;
            }
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// Same order as the input documents.
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

impl Orchestrator {
    /// Process many documents with at most `max_parallel_runs` in flight.
    /// One document failing never affects the others.
    pub async fn process_batch(
        &self,
        documents: Vec<RawDocument>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let parallel = self.config().concurrency.max_parallel_runs.max(1);
        tracing::info!(documents = documents.len(), parallel, "Starting batch");

        let items: Vec<BatchItem> = stream::iter(documents)
            .map(|raw| async move {
                let source_name = raw.filename().to_string();
                let outcome = self.process_with(raw, options, cancel).await;
                BatchItem {
                    source_name,
                    outcome,
                }
            })
            .buffered(parallel)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for item in &items {
            summary.record(&item.outcome);
        }
        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            review_required = summary.review_required,
            total_pages = summary.total_pages,
            "Batch complete"
        );
        BatchReport { items, summary }
    }
}
