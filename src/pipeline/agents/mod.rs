//! Extraction agents: one specialised extractor per document type.
//!
//! Each agent owns a schema, a prompt and a regex pattern pass. Model calls go
//! through the shared [`InferencePool`], which bounds in-flight inference
//! across all runs.

pub mod inference;
pub mod ollama;
pub mod cloud;
pub mod prompt;
pub mod parser;
pub mod values;
mod invoice;
mod contract;
mod cv;

pub use inference::*;
pub use ollama::*;
pub use cloud::*;
pub use parser::*;
pub use values::*;

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ExtractionConfig;
use crate::models::{
    BackendKind, DocumentType, ExtractedField, ExtractionPass, NormalizedDocument, Provenance,
};
use crate::pipeline::schema::{ExtractionSchema, CONTRACT_SCHEMA, CV_SCHEMA, INVOICE_SCHEMA};
use prompt::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Model unavailable: {reason}")]
    ModelUnavailable { reason: String, retryable: bool },

    #[error("Extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    #[error("Malformed model output: {0}")]
    MalformedSchema(String),

    #[error("Extraction cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ModelUnavailable { retryable, .. } => *retryable,
            Self::ExtractionTimeout(_) => true,
            Self::MalformedSchema(_) | Self::Cancelled => false,
        }
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Timeout(after) => Self::ExtractionTimeout(after),
            InferenceError::Cancelled => Self::Cancelled,
            InferenceError::MalformedResponse(detail) => Self::MalformedSchema(detail),
            other => Self::ModelUnavailable {
                retryable: other.is_transient(),
                reason: other.to_string(),
            },
        }
    }
}

/// Everything one model-pass attempt needs besides the document.
pub struct AgentContext<'a> {
    pub pool: &'a InferencePool,
    pub backend: BackendKind,
    pub config: &'a ExtractionConfig,
    /// 1-based attempt number, recorded in field provenance.
    pub attempt: u32,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

/// The closed set of extractors. `Other` has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionAgent {
    Invoice,
    Contract,
    Cv,
}

impl ExtractionAgent {
    pub fn for_type(document_type: DocumentType) -> Option<Self> {
        match document_type {
            DocumentType::Invoice => Some(Self::Invoice),
            DocumentType::Contract => Some(Self::Contract),
            DocumentType::Cv => Some(Self::Cv),
            DocumentType::Other => None,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Invoice => DocumentType::Invoice,
            Self::Contract => DocumentType::Contract,
            Self::Cv => DocumentType::Cv,
        }
    }

    pub fn schema(&self) -> &'static ExtractionSchema {
        match self {
            Self::Invoice => &INVOICE_SCHEMA,
            Self::Contract => &CONTRACT_SCHEMA,
            Self::Cv => &CV_SCHEMA,
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Invoice => invoice::INSTRUCTIONS,
            Self::Contract => contract::INSTRUCTIONS,
            Self::Cv => cv::INSTRUCTIONS,
        }
    }

    /// Model pass: one inference call, parsed into schema fields.
    pub async fn extract(
        &self,
        doc: &NormalizedDocument,
        ctx: &AgentContext<'_>,
    ) -> Result<Vec<ExtractedField>, AgentError> {
        let schema = self.schema();
        let request = InferenceRequest {
            document_type: self.document_type(),
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
            prompt: build_extraction_prompt(
                schema,
                self.instructions(),
                &doc.full_text(),
                ctx.config.prompt_char_budget,
            ),
        };

        let response = ctx
            .pool
            .infer(ctx.backend, &request, ctx.timeout, ctx.cancel)
            .await?;
        let entries = parse_extraction_response(&response.text, schema)?;

        let provenance = Provenance {
            agent: self.document_type(),
            pass: ExtractionPass::Model,
            attempt: ctx.attempt,
            backend: Some(response.backend),
        };
        let fields: Vec<ExtractedField> = entries
            .into_iter()
            .filter_map(|entry| {
                let spec = schema.field(&entry.name)?;
                Some(build_field(
                    spec,
                    &entry.raw_value,
                    entry.confidence,
                    provenance.clone(),
                    ctx.config,
                ))
            })
            .collect();

        tracing::debug!(
            document_id = %doc.document_id,
            agent = self.document_type().as_str(),
            attempt = ctx.attempt,
            model = %response.model,
            fields = fields.len(),
            "Model pass complete"
        );
        Ok(fields)
    }

    /// Deterministic regex pass over the document text.
    pub fn pattern_pass(
        &self,
        doc: &NormalizedDocument,
        config: &ExtractionConfig,
    ) -> Vec<ExtractedField> {
        let text = doc.full_text();
        let candidates = match self {
            Self::Invoice => invoice::pattern_candidates(&text),
            Self::Contract => contract::pattern_candidates(&text),
            Self::Cv => cv::pattern_candidates(&text),
        };
        let schema = self.schema();
        let provenance = Provenance {
            agent: self.document_type(),
            pass: ExtractionPass::Pattern,
            attempt: 1,
            backend: None,
        };
        candidates
            .into_iter()
            .filter_map(|(name, raw)| {
                let spec = schema.field(name)?;
                let mut field = build_field(spec, &raw, None, provenance.clone(), config);
                field.confidence *= heuristics::PATTERN_PASS_SCALE;
                Some(field)
            })
            .collect()
    }
}
