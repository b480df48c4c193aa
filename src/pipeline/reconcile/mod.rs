//! Confidence reconciliation.
//!
//! Turns the extracted fields of a run into the final `ExtractionRecord`:
//! schema conformance, type-specific validation flags, the overall confidence
//! and the human-review decision. Reconciliation never fails.

pub mod rules;

pub use rules::*;

use chrono::Utc;

use crate::config::ReconcileConfig;
use crate::models::{ClassificationResult, ExtractedField, ExtractionRecord, NormalizedDocument};
use crate::pipeline::schema::ExtractionSchema;

pub struct Reconciler {
    amount_epsilon: f64,
    review_threshold: f32,
}

impl Reconciler {
    pub fn new(config: &ReconcileConfig, review_threshold: f32) -> Self {
        Self {
            amount_epsilon: config.amount_epsilon,
            review_threshold,
        }
    }

    pub fn reconcile(
        &self,
        doc: &NormalizedDocument,
        classification: &ClassificationResult,
        fields: Vec<ExtractedField>,
    ) -> ExtractionRecord {
        let document_type = classification.document_type;
        let schema = ExtractionSchema::for_type(document_type);
        let fields = conform_to_schema(schema, fields);

        let validation_flags = validate(document_type, &fields, self.amount_epsilon);
        let missing_required = missing_required(schema, &fields);
        let overall_confidence = classification
            .confidence
            .min(required_field_confidence(schema, &fields));

        let review_required = overall_confidence < self.review_threshold
            || !validation_flags.is_empty()
            || !missing_required.is_empty();

        if review_required {
            tracing::info!(
                document_id = %doc.document_id,
                document_type = document_type.as_str(),
                overall_confidence,
                flags = validation_flags.len(),
                missing = missing_required.len(),
                "Record routed to human review"
            );
        }

        ExtractionRecord {
            document_id: doc.document_id,
            source_name: doc.source_name.clone(),
            document_type,
            classification_confidence: classification.confidence,
            fields,
            overall_confidence,
            validation_flags,
            missing_required,
            review_required,
            language: doc.language,
            page_count: doc.page_count,
            processed_at: Utc::now(),
        }
    }
}

/// Keep schema fields only, one per name (highest confidence, earliest on
/// ties), in schema order.
pub fn conform_to_schema(
    schema: &ExtractionSchema,
    fields: Vec<ExtractedField>,
) -> Vec<ExtractedField> {
    let mut kept: Vec<ExtractedField> = Vec::with_capacity(fields.len());
    for field in fields {
        if !schema.contains(&field.name) {
            tracing::warn!(
                field = %field.name,
                document_type = schema.document_type.as_str(),
                "SchemaMismatch: dropping field not in schema"
            );
            continue;
        }
        match kept.iter_mut().find(|k| k.name == field.name) {
            Some(existing) if field.confidence > existing.confidence => *existing = field,
            Some(_) => {}
            None => kept.push(field),
        }
    }
    kept.sort_by_key(|f| schema.position(&f.name));
    kept
}

/// Weighted average confidence over the schema's required fields.
///
/// Missing or unparsed required fields count as 0. A schema without required
/// fields yields 0.
pub fn required_field_confidence(schema: &ExtractionSchema, fields: &[ExtractedField]) -> f32 {
    let mut weighted = 0.0f32;
    let mut total_weight = 0.0f32;
    for spec in schema.required() {
        total_weight += spec.weight;
        let confidence = fields
            .iter()
            .find(|f| f.name == spec.name && f.value.is_some())
            .map(|f| f.confidence.clamp(0.0, 1.0))
            .unwrap_or(0.0);
        weighted += spec.weight * confidence;
    }
    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

/// Required schema fields with no extracted entry, in schema order.
pub fn missing_required(schema: &ExtractionSchema, fields: &[ExtractedField]) -> Vec<String> {
    schema
        .required()
        .filter(|spec| !fields.iter().any(|f| f.name == spec.name))
        .map(|spec| spec.name.to_string())
        .collect()
}
