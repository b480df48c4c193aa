use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::AgentError;
use crate::pipeline::schema::ExtractionSchema;

/// One field as the model reported it, before typed parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    pub raw_value: String,
    pub confidence: Option<f32>,
}

/// Parse a model response into schema field entries.
///
/// Accepts a fenced ```json block or a bare object, in either the
/// `{"fields": [{"name", "value", "confidence"}]}` form or a flat
/// `{"field": value | {"value", "confidence"}}` object. Unreadable entries
/// and nulls are skipped; names outside the schema are dropped with a
/// warning; the first occurrence of a name wins.
pub fn parse_extraction_response(
    response: &str,
    schema: &ExtractionSchema,
) -> Result<Vec<FieldEntry>, AgentError> {
    let json_str = extract_json_block(response)
        .ok_or_else(|| AgentError::MalformedSchema("No JSON object in model response".into()))?;

    let root: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::MalformedSchema(format!("JSON parsing failed: {e}")))?;
    let Value::Object(object) = root else {
        return Err(AgentError::MalformedSchema(
            "Model response is not a JSON object".into(),
        ));
    };

    let candidates = match object.get("fields") {
        Some(Value::Array(items)) => entries_from_array(items),
        Some(Value::Object(inner)) => entries_from_object(inner),
        _ => entries_from_object(&object),
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(candidates.len());
    for entry in candidates {
        if !schema.contains(&entry.name) {
            tracing::warn!(
                field = %entry.name,
                document_type = schema.document_type.as_str(),
                "SchemaMismatch: dropping field not in schema"
            );
            continue;
        }
        if !seen.insert(entry.name.clone()) {
            tracing::debug!(field = %entry.name, "Duplicate field in model response, keeping first");
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Find the JSON object in a response: fenced block first, then the outermost braces.
fn extract_json_block(response: &str) -> Option<&str> {
    fenced_block(response).or_else(|| {
        let start = response.find('{')?;
        let end = response.rfind('}')?;
        (end > start).then(|| &response[start..=end])
    })
}

fn fenced_block(response: &str) -> Option<&str> {
    let (start, fence_len) = match response.find("```json") {
        Some(i) => (i, 7),
        None => (response.find("```")?, 3),
    };
    let content_start = start + fence_len;
    let end = response[content_start..].find("```")?;
    let block = response[content_start..content_start + end].trim();
    block.starts_with('{').then_some(block)
}

#[derive(Deserialize)]
struct ArrayEntry {
    name: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    confidence: Option<Value>,
}

/// Lenient: items that fail to deserialize are skipped.
fn entries_from_array(items: &[Value]) -> Vec<FieldEntry> {
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<ArrayEntry>(item.clone()).ok())
        .filter_map(|item| {
            Some(FieldEntry {
                raw_value: raw_text(&item.value)?,
                confidence: item.confidence.as_ref().and_then(confidence_value),
                name: item.name.trim().to_string(),
            })
        })
        .collect()
}

fn entries_from_object(object: &Map<String, Value>) -> Vec<FieldEntry> {
    object
        .iter()
        .filter_map(|(name, value)| {
            let (raw_value, confidence) = match value {
                Value::Object(inner) if inner.contains_key("value") => (
                    raw_text(&inner["value"])?,
                    inner.get("confidence").and_then(confidence_value),
                ),
                other => (raw_text(other)?, None),
            };
            Some(FieldEntry {
                name: name.trim().to_string(),
                raw_value,
                confidence,
            })
        })
        .collect()
}

/// Scalar (or list of scalars) as written; `None` for null, empty or nested objects.
fn raw_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(raw_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn confidence_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|c| c as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::{CV_SCHEMA, INVOICE_SCHEMA};

    fn names(entries: &[FieldEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn parses_fields_array_in_fence() {
        let response = r#"Here you go:
```json
{"fields": [
  {"name": "invoice_number", "value": "F-2024-001", "confidence": 0.95},
  {"name": "total", "value": "121,00 €"},
  {"name": "due_date", "value": null}
]}
```"#;
        let entries = parse_extraction_response(response, &INVOICE_SCHEMA).unwrap();
        assert_eq!(names(&entries), vec!["invoice_number", "total"]);
        assert_eq!(entries[0].confidence, Some(0.95));
        assert_eq!(entries[1].raw_value, "121,00 €");
        assert_eq!(entries[1].confidence, None);
    }

    #[test]
    fn parses_flat_object_with_nested_confidence() {
        let response = r#"{"subtotal": 100, "tax_amount": {"value": "21,00", "confidence": "0.8"}, "currency": "EUR"}"#;
        let entries = parse_extraction_response(response, &INVOICE_SCHEMA).unwrap();
        assert_eq!(entries.len(), 3);
        let subtotal = entries.iter().find(|e| e.name == "subtotal").unwrap();
        assert_eq!(subtotal.raw_value, "100");
        let tax = entries.iter().find(|e| e.name == "tax_amount").unwrap();
        assert_eq!(tax.raw_value, "21,00");
        assert_eq!(tax.confidence, Some(0.8));
    }

    #[test]
    fn drops_fields_outside_schema() {
        let response = r#"{"full_name": "Ana García", "favourite_colour": "blue"}"#;
        let entries = parse_extraction_response(response, &CV_SCHEMA).unwrap();
        assert_eq!(names(&entries), vec!["full_name"]);
    }

    #[test]
    fn lists_are_joined() {
        let response = r#"{"skills": ["Rust", "SQL", null, "Docker"]}"#;
        let entries = parse_extraction_response(response, &CV_SCHEMA).unwrap();
        assert_eq!(entries[0].raw_value, "Rust, SQL, Docker");
    }

    #[test]
    fn unreadable_array_items_are_skipped() {
        let response = r#"{"fields": [
            {"value": "no name"},
            "just a string",
            {"name": "email", "value": {"nested": true}},
            {"name": "email", "value": "ana@example.com"},
            {"name": "email", "value": "other@example.com"}
        ]}"#;
        let entries = parse_extraction_response(response, &CV_SCHEMA).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_value, "ana@example.com");
    }

    #[test]
    fn bare_object_surrounded_by_prose() {
        let response = "Sure! {\"full_name\": \"John Smith\"} Hope this helps.";
        let entries = parse_extraction_response(response, &CV_SCHEMA).unwrap();
        assert_eq!(entries[0].raw_value, "John Smith");
    }

    #[test]
    fn no_json_is_malformed() {
        let err = parse_extraction_response("I could not read the document.", &CV_SCHEMA)
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedSchema(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_extraction_response("```json\n{\"full_name\": }\n```", &CV_SCHEMA)
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedSchema(_)));
    }

    #[test]
    fn empty_object_yields_no_entries() {
        let entries = parse_extraction_response("{}", &INVOICE_SCHEMA).unwrap();
        assert!(entries.is_empty());
    }
}
