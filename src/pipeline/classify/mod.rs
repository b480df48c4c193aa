//! Document type classification.
//!
//! Classification never fails: a document with no cues is `Other` with a low
//! score. The trait seam lets the orchestrator run against fixed scores.

pub mod keyword;

pub use keyword::*;

use crate::models::{ClassificationResult, DocumentType, NormalizedDocument, TypeCandidate};

/// Assigns a document type with a confidence and ranked alternates.
pub trait DocumentClassifier: Send + Sync {
    fn classify(&self, doc: &NormalizedDocument) -> ClassificationResult;
}

/// Classifier returning fixed scores regardless of input (for tests and replays).
pub struct MockClassifier {
    pub scores: Vec<(DocumentType, f32)>,
}

impl MockClassifier {
    pub fn new(scores: &[(DocumentType, f32)]) -> Self {
        Self {
            scores: scores.to_vec(),
        }
    }
}

impl DocumentClassifier for MockClassifier {
    fn classify(&self, _doc: &NormalizedDocument) -> ClassificationResult {
        ClassificationResult::from_candidates(
            self.scores
                .iter()
                .map(|&(document_type, score)| TypeCandidate {
                    document_type,
                    score,
                })
                .collect(),
        )
    }
}
