use crate::models::ExtractedField;

/// Merge the model pass with the pattern pass.
///
/// Per field name the higher confidence wins; the model pass wins ties.
/// Model order is kept, pattern-only fields are appended.
pub fn merge_passes(
    model: Vec<ExtractedField>,
    pattern: Vec<ExtractedField>,
) -> Vec<ExtractedField> {
    let mut merged = model;
    for candidate in pattern {
        match merged.iter_mut().find(|f| f.name == candidate.name) {
            Some(existing) if candidate.confidence > existing.confidence => {
                tracing::debug!(
                    field = %candidate.name,
                    model_confidence = existing.confidence,
                    pattern_confidence = candidate.confidence,
                    "Pattern pass overrides model value"
                );
                *existing = candidate;
            }
            Some(_) => {}
            None => merged.push(candidate),
        }
    }
    merged
}
