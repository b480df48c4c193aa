use crate::pipeline::schema::{ExtractionSchema, FieldKind, FieldSpec};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a document data extraction assistant. Your ONLY role is to copy
field values that are explicitly present in a business document into JSON.

RULES:
1. Extract ONLY values explicitly written in the document.
2. NEVER guess, compute or infer a value that is not written.
3. Omit a field, or use null, when it is missing or unreadable.
4. Copy amounts and dates exactly as written (keep separators and currency).
5. Output a single JSON object and nothing else.
"#;

/// Marker appended when the document text exceeds the prompt budget.
const TRUNCATION_MARKER: &str = "\n[... document truncated ...]";

/// Build the extraction prompt for one document type.
pub fn build_extraction_prompt(
    schema: &ExtractionSchema,
    instructions: &str,
    text: &str,
    char_budget: usize,
) -> String {
    let (body, truncated) = truncate_chars(text, char_budget);
    let marker = if truncated { TRUNCATION_MARKER } else { "" };
    let field_list = schema
        .fields
        .iter()
        .map(field_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Document type: {document_type}

{instructions}

<document>
{body}{marker}
</document>

Extract these fields:
{field_list}

Answer with JSON in exactly this shape:
{{"fields": [{{"name": "<field name>", "value": "<value as written>", "confidence": <0.0-1.0>}}]}}"#,
        document_type = schema.document_type.as_str(),
        instructions = instructions.trim(),
    )
}

fn field_line(spec: &FieldSpec) -> String {
    let kind = match spec.kind {
        FieldKind::Enumerated(options) => format!("one of: {}", options.join(", ")),
        other => other.as_str().to_string(),
    };
    let required = if spec.required { ", required" } else { "" };
    format!("- {} ({kind}{required}): {}", spec.name, spec.description)
}

/// First `budget` chars of `text`, and whether anything was cut.
pub fn truncate_chars(text: &str, budget: usize) -> (&str, bool) {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => (&text[..cut], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::{CONTRACT_SCHEMA, INVOICE_SCHEMA};

    #[test]
    fn prompt_lists_every_schema_field() {
        let prompt = build_extraction_prompt(&INVOICE_SCHEMA, "Invoice rules.", "FACTURA 1", 1000);
        for field in INVOICE_SCHEMA.fields {
            assert!(prompt.contains(field.name), "missing {}", field.name);
        }
        assert!(prompt.contains("- total (decimal, required): Total amount including taxes"));
        assert!(prompt.contains("one of: EUR, USD, GBP"));
        assert!(prompt.contains("<document>\nFACTURA 1\n</document>"));
        assert!(prompt.contains("Invoice rules."));
        assert!(!prompt.contains("truncated"));
    }

    #[test]
    fn long_text_is_truncated_to_budget() {
        let text = "cláusula ".repeat(100);
        let prompt = build_extraction_prompt(&CONTRACT_SCHEMA, "", &text, 20);
        assert!(prompt.contains("[... document truncated ...]"));
        assert!(!prompt.contains(&text));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("añoño", 2), ("añ", true));
        assert_eq!(truncate_chars("abc", 3), ("abc", false));
        assert_eq!(truncate_chars("", 0), ("", false));
    }
}
