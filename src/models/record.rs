use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BackendKind, DocumentType, ExtractionPass, Language, ValidationFlag};

/// A candidate document type with its classifier score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCandidate {
    pub document_type: DocumentType,
    pub score: f32,
}

/// Output of the classifier. `alternates` are the remaining candidates by
/// descending score, and `document_type` carries the maximum score unless
/// `disambiguated` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub document_type: DocumentType,
    pub confidence: f32,
    pub alternates: Vec<TypeCandidate>,
    /// Extraction results overrode the classifier's top pick.
    #[serde(default)]
    pub disambiguated: bool,
}

impl ClassificationResult {
    /// Build from unordered candidates. Ties go to the type declared first.
    pub fn from_candidates(mut candidates: Vec<TypeCandidate>) -> Self {
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_type.cmp(&b.document_type))
        });
        let mut iter = candidates.into_iter();
        match iter.next() {
            Some(top) => Self {
                document_type: top.document_type,
                confidence: top.score,
                alternates: iter.collect(),
                disambiguated: false,
            },
            None => Self {
                document_type: DocumentType::Other,
                confidence: 0.0,
                alternates: vec![],
                disambiguated: false,
            },
        }
    }

    /// Caller-supplied type override: full confidence, no alternates.
    pub fn from_hint(document_type: DocumentType) -> Self {
        Self {
            document_type,
            confidence: 1.0,
            alternates: vec![],
            disambiguated: false,
        }
    }

    /// The same classification with `candidate` promoted to the chosen type.
    ///
    /// The former top pick moves to the head of `alternates` even though it
    /// outscores the promoted type; `disambiguated` marks the result.
    pub fn promote(&self, candidate: &TypeCandidate) -> Self {
        let mut alternates: Vec<TypeCandidate> = self
            .alternates
            .iter()
            .filter(|c| c.document_type != candidate.document_type)
            .cloned()
            .collect();
        alternates.insert(
            0,
            TypeCandidate {
                document_type: self.document_type,
                score: self.confidence,
            },
        );
        Self {
            document_type: candidate.document_type,
            confidence: candidate.score,
            alternates,
            disambiguated: true,
        }
    }
}

/// Normalized typed value of an extracted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Decimal(f64),
    Date(NaiveDate),
    Enumerated(String),
}

impl FieldValue {
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Self::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// Where a field came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub agent: DocumentType,
    pub pass: ExtractionPass,
    /// 1-based attempt number that produced the value.
    pub attempt: u32,
    pub backend: Option<BackendKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub raw_value: String,
    /// None when the raw value could not be parsed into the schema type.
    pub value: Option<FieldValue>,
    pub confidence: f32,
    pub provenance: Provenance,
}

/// The pipeline's sole output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub document_id: Uuid,
    pub source_name: String,
    pub document_type: DocumentType,
    pub classification_confidence: f32,
    pub fields: Vec<ExtractedField>,
    pub overall_confidence: f32,
    pub validation_flags: BTreeSet<ValidationFlag>,
    pub missing_required: Vec<String>,
    pub review_required: bool,
    pub language: Language,
    pub page_count: usize,
    pub processed_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn field(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_flag(&self, flag: ValidationFlag) -> bool {
        self.validation_flags.contains(&flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(document_type: DocumentType, score: f32) -> TypeCandidate {
        TypeCandidate { document_type, score }
    }

    #[test]
    fn top_candidate_has_max_score() {
        let result = ClassificationResult::from_candidates(vec![
            cand(DocumentType::Cv, 0.2),
            cand(DocumentType::Contract, 0.7),
            cand(DocumentType::Invoice, 0.4),
        ]);
        assert_eq!(result.document_type, DocumentType::Contract);
        assert!((result.confidence - 0.7).abs() < f32::EPSILON);
        let alt: Vec<_> = result.alternates.iter().map(|c| c.document_type).collect();
        assert_eq!(alt, vec![DocumentType::Invoice, DocumentType::Cv]);
    }

    #[test]
    fn ties_follow_priority_order() {
        let result = ClassificationResult::from_candidates(vec![
            cand(DocumentType::Other, 0.5),
            cand(DocumentType::Cv, 0.5),
            cand(DocumentType::Contract, 0.5),
        ]);
        assert_eq!(result.document_type, DocumentType::Contract);
        assert_eq!(result.alternates[0].document_type, DocumentType::Cv);
    }

    #[test]
    fn empty_candidates_fall_back_to_other() {
        let result = ClassificationResult::from_candidates(vec![]);
        assert_eq!(result.document_type, DocumentType::Other);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn promote_swaps_chosen_type() {
        let result = ClassificationResult::from_candidates(vec![
            cand(DocumentType::Invoice, 0.55),
            cand(DocumentType::Contract, 0.50),
            cand(DocumentType::Other, 0.1),
        ]);
        let runner_up = result.alternates[0].clone();
        let promoted = result.promote(&runner_up);
        assert_eq!(promoted.document_type, DocumentType::Contract);
        assert_eq!(promoted.alternates[0].document_type, DocumentType::Invoice);
        assert_eq!(promoted.alternates.len(), 2);
        assert!(promoted.disambiguated);
    }

    #[test]
    fn classifier_pick_carries_max_score() {
        let result = ClassificationResult::from_candidates(vec![
            cand(DocumentType::Cv, 0.2),
            cand(DocumentType::Contract, 0.7),
            cand(DocumentType::Invoice, 0.4),
        ]);
        assert!(!result.disambiguated);
        assert!(result.alternates.iter().all(|c| c.score <= result.confidence));
        assert!(!ClassificationResult::from_hint(DocumentType::Cv).disambiguated);
    }

    #[test]
    fn field_value_serializes_tagged() {
        let json = serde_json::to_string(&FieldValue::Decimal(121.0)).unwrap();
        assert_eq!(json, r#"{"kind":"decimal","value":121.0}"#);
    }
}
