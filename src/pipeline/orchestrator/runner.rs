use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::merge::merge_passes;
use super::retry::with_retry;
use super::state::{RunState, RunStatusEvent, RunTracker};
use super::stats::{PipelineStats, StatsSnapshot};
use super::{FailureCause, PipelineError, Stage};
use crate::config::{PipelineConfig, RunOptions};
use crate::models::{
    ClassificationResult, DocumentType, ExtractedField, ExtractionRecord, NormalizedDocument,
    RawDocument, TypeCandidate,
};
use crate::pipeline::agents::{
    AgentContext, AgentError, CloudBackend, ExtractionAgent, InferenceError, InferencePool,
    OllamaBackend,
};
use crate::pipeline::classify::{DocumentClassifier, KeywordClassifier};
use crate::pipeline::normalize::{DocumentNormalizer, NormalizeOptions, TesseractCli};
use crate::pipeline::reconcile::{required_field_confidence, Reconciler};
use crate::pipeline::schema::ExtractionSchema;

/// Runs documents through the pipeline. Cheap to clone; clones share the
/// classifier, the inference pool, the config and the usage counters.
#[derive(Clone)]
pub struct Orchestrator {
    normalizer: DocumentNormalizer,
    classifier: Arc<dyn DocumentClassifier>,
    pool: Arc<InferencePool>,
    config: Arc<PipelineConfig>,
    stats: Arc<PipelineStats>,
}

impl Orchestrator {
    pub fn new(
        normalizer: DocumentNormalizer,
        classifier: Arc<dyn DocumentClassifier>,
        pool: Arc<InferencePool>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            normalizer,
            classifier,
            pool,
            config: Arc::new(config),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Production wiring: Tesseract OCR, keyword classifier, Ollama + cloud backends.
    pub fn from_config(config: PipelineConfig) -> Result<Self, InferenceError> {
        let normalizer = DocumentNormalizer::new(Arc::new(TesseractCli::from_config(&config.ocr)));
        let pool = InferencePool::new(config.concurrency.max_concurrent_inferences)
            .with_backend(Arc::new(OllamaBackend::from_config(&config.backends.local)?))
            .with_backend(Arc::new(CloudBackend::from_config(&config.backends.cloud)?));
        Ok(Self::new(
            normalizer,
            Arc::new(KeywordClassifier::new()),
            Arc::new(pool),
            config,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Usage since this orchestrator was built, across all runs.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.normalizer.ocr_pages(), self.pool.usage())
    }

    /// Process with the config's default run options.
    pub async fn process(&self, raw: RawDocument) -> Result<ExtractionRecord, PipelineError> {
        let options = RunOptions::from_config(&self.config);
        self.process_with(raw, &options, &CancellationToken::new())
            .await
    }

    pub async fn process_with(
        &self,
        raw: RawDocument,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtractionRecord, PipelineError> {
        let tracker = RunTracker::new(Uuid::new_v4(), None);
        self.run(raw, options, cancel, tracker).await
    }

    /// Spawn a run and return a handle to observe, cancel or await it.
    pub fn submit(&self, raw: RawDocument, options: RunOptions) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let tracker = RunTracker::new(run_id, Some(events_tx));
        let state = tracker.subscribe();

        let orchestrator = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            orchestrator.run(raw, &options, &token, tracker).await
        });

        RunHandle {
            run_id,
            events,
            state,
            cancel,
            task,
        }
    }

    async fn run(
        &self,
        raw: RawDocument,
        options: &RunOptions,
        cancel: &CancellationToken,
        mut tracker: RunTracker,
    ) -> Result<ExtractionRecord, PipelineError> {
        let run_id = tracker.run_id();
        let span = tracing::info_span!(
            "pipeline_run",
            run_id = %run_id,
            source = %raw.filename(),
            backend = options.model_backend.as_str(),
        );

        async move {
            let result = self.execute(raw, options, cancel, &mut tracker).await;
            self.stats.record_outcome(&result);
            match &result {
                Ok(record) => tracing::info!(
                    document_id = %record.document_id,
                    document_type = record.document_type.as_str(),
                    overall_confidence = record.overall_confidence,
                    review_required = record.review_required,
                    "Run complete"
                ),
                Err(e) => {
                    tracker.fail(e.stage, e.cause.to_string());
                    if e.is_cancelled() {
                        tracing::info!(stage = e.stage.as_str(), "Run cancelled");
                    } else {
                        tracing::warn!(stage = e.stage.as_str(), error = %e.cause, "Run failed");
                    }
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        raw: RawDocument,
        options: &RunOptions,
        cancel: &CancellationToken,
        tracker: &mut RunTracker,
    ) -> Result<ExtractionRecord, PipelineError> {
        let run_id = tracker.run_id();
        let fail = |stage: Stage, cause: FailureCause| PipelineError::new(run_id, stage, cause);

        // Normalizing
        checkpoint(cancel, run_id, Stage::Normalizing)?;
        let normalize_options = NormalizeOptions {
            ocr_enabled: options.ocr_enabled,
            ocr_languages: self.config.ocr.languages.clone(),
        };
        let doc = self
            .normalizer
            .normalize(raw, &normalize_options, cancel)
            .await
            .map_err(|e| fail(Stage::Normalizing, e.into()))?;
        step(tracker, RunState::Normalized, Stage::Normalizing)?;

        // Classifying
        checkpoint(cancel, run_id, Stage::Classifying)?;
        let classification = match options.document_type_hint {
            Some(document_type) => ClassificationResult::from_hint(document_type),
            None => self.classifier.classify(&doc),
        };
        tracing::info!(
            document_id = %doc.document_id,
            document_type = classification.document_type.as_str(),
            confidence = classification.confidence,
            hinted = options.document_type_hint.is_some(),
            "Document classified"
        );
        step(tracker, RunState::Classified, Stage::Classifying)?;

        // Extracting
        checkpoint(cancel, run_id, Stage::Extracting)?;
        step(tracker, RunState::Extracting, Stage::Extracting)?;
        let (classification, fields) = self
            .extract(&doc, classification, options, cancel)
            .await
            .map_err(|e| fail(Stage::Extracting, e.into()))?;

        // Reconciling
        checkpoint(cancel, run_id, Stage::Reconciling)?;
        let record = Reconciler::new(&self.config.reconcile, options.confidence_threshold)
            .reconcile(&doc, &classification, fields);
        step(tracker, RunState::Reconciled, Stage::Reconciling)?;
        step(tracker, RunState::Done, Stage::Reconciling)?;
        Ok(record)
    }

    /// Choose the extractor(s) and run them. Returns the classification the
    /// record is built from, which changes when the alternate branch wins.
    async fn extract(
        &self,
        doc: &NormalizedDocument,
        classification: ClassificationResult,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<(ClassificationResult, Vec<ExtractedField>), AgentError> {
        let alternate = if options.document_type_hint.is_none()
            && classification.confidence < options.disambiguation_threshold
        {
            disambiguation_candidate(&classification)
        } else {
            None
        };

        let Some(candidate) = alternate else {
            let fields = self
                .run_agent(classification.document_type, doc, options, cancel)
                .await?;
            return Ok((classification, fields));
        };

        tracing::info!(
            document_id = %doc.document_id,
            primary = classification.document_type.as_str(),
            alternate = candidate.document_type.as_str(),
            confidence = classification.confidence,
            "Low classification confidence, running both extractors"
        );
        let (primary, secondary) = tokio::join!(
            self.run_agent(classification.document_type, doc, options, cancel),
            self.run_agent(candidate.document_type, doc, options, cancel),
        );

        match (primary, secondary) {
            (Ok(primary), Ok(secondary)) => {
                let primary_score = required_field_confidence(
                    ExtractionSchema::for_type(classification.document_type),
                    &primary,
                );
                let secondary_score = required_field_confidence(
                    ExtractionSchema::for_type(candidate.document_type),
                    &secondary,
                );
                tracing::info!(
                    primary_score,
                    alternate_score = secondary_score,
                    "Disambiguation scores"
                );
                if secondary_score > primary_score {
                    Ok((classification.promote(&candidate), secondary))
                } else {
                    Ok((classification, primary))
                }
            }
            (Ok(primary), Err(e)) => {
                tracing::warn!(
                    alternate = candidate.document_type.as_str(),
                    error = %e,
                    "Alternate extractor failed, keeping primary"
                );
                Ok((classification, primary))
            }
            (Err(e), Ok(secondary)) => {
                tracing::warn!(
                    primary = classification.document_type.as_str(),
                    error = %e,
                    "Primary extractor failed, using alternate"
                );
                Ok((classification.promote(&candidate), secondary))
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Model pass with retries, merged with the pattern pass.
    /// `Other` has no extractor and yields no fields.
    async fn run_agent(
        &self,
        document_type: DocumentType,
        doc: &NormalizedDocument,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedField>, AgentError> {
        let Some(agent) = ExtractionAgent::for_type(document_type) else {
            tracing::info!(
                document_id = %doc.document_id,
                "No extractor for document type other"
            );
            return Ok(Vec::new());
        };
        let extraction = &self.config.extraction;
        let policy = &options.retry_policy;

        let model_fields = with_retry(policy, cancel, |attempt| {
            if attempt > 1 {
                self.stats.record_retry();
            }
            let ctx = AgentContext {
                pool: &self.pool,
                backend: options.model_backend,
                config: extraction,
                attempt,
                timeout: policy.attempt_timeout(),
                cancel,
            };
            async move { agent.extract(doc, &ctx).await }
        })
        .await?;

        if !extraction.pattern_pass {
            return Ok(model_fields);
        }
        let pattern_fields = agent.pattern_pass(doc, extraction);
        tracing::debug!(
            document_id = %doc.document_id,
            agent = document_type.as_str(),
            model_fields = model_fields.len(),
            pattern_fields = pattern_fields.len(),
            "Merging extraction passes"
        );
        Ok(merge_passes(model_fields, pattern_fields))
    }
}

/// Best alternate that has an extractor and at least one supporting cue.
/// A zero score means the classifier found no evidence for that type.
fn disambiguation_candidate(classification: &ClassificationResult) -> Option<TypeCandidate> {
    classification
        .alternates
        .iter()
        .filter(|c| c.score > 0.0)
        .find(|c| ExtractionAgent::for_type(c.document_type).is_some())
        .cloned()
}

fn checkpoint(cancel: &CancellationToken, run_id: Uuid, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::cancelled(run_id, stage))
    } else {
        Ok(())
    }
}

fn step(tracker: &mut RunTracker, next: RunState, stage: Stage) -> Result<(), PipelineError> {
    let run_id = tracker.run_id();
    tracker
        .advance(next)
        .map_err(|e| PipelineError::new(run_id, stage, FailureCause::Internal(e.to_string())))
}

/// A spawned run.
pub struct RunHandle {
    run_id: Uuid,
    events: mpsc::UnboundedReceiver<RunStatusEvent>,
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExtractionRecord, PipelineError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Status events; the stream ends when the run finishes.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<RunStatusEvent> {
        &mut self.events
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<ExtractionRecord, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let stage = Stage::following(*self.state.borrow());
                tracing::error!(run_id = %self.run_id, error = %e, "Run task aborted");
                Err(PipelineError::new(
                    self.run_id,
                    stage,
                    FailureCause::Internal(e.to_string()),
                ))
            }
        }
    }
}
