use std::collections::BTreeSet;

use crate::models::{DocumentType, ExtractedField, FieldValue, ValidationFlag};

/// Type-specific validation. Never fails; produces flag codes only.
pub fn validate(
    document_type: DocumentType,
    fields: &[ExtractedField],
    amount_epsilon: f64,
) -> BTreeSet<ValidationFlag> {
    let mut flags = BTreeSet::new();
    let decimal = |name: &str| field_value(fields, name).and_then(FieldValue::as_decimal);
    let date = |name: &str| field_value(fields, name).and_then(FieldValue::as_date);

    match document_type {
        DocumentType::Invoice => {
            let subtotal = decimal("subtotal");
            let tax = decimal("tax_amount");
            let total = decimal("total");

            if let (Some(subtotal), Some(tax), Some(total)) = (subtotal, tax, total) {
                if (subtotal + tax - total).abs() > amount_epsilon {
                    flags.insert(ValidationFlag::AmountMismatch);
                }
            }
            if [subtotal, tax, total].into_iter().flatten().any(|v| v < 0.0) {
                flags.insert(ValidationFlag::NegativeAmount);
            }
            if decimal("tax_rate").is_some_and(|rate| !(0.0..=100.0).contains(&rate)) {
                flags.insert(ValidationFlag::TaxRateOutOfRange);
            }
            if let (Some(issued), Some(due)) = (date("issue_date"), date("due_date")) {
                if due < issued {
                    flags.insert(ValidationFlag::DueDateBeforeIssueDate);
                }
            }
        }
        DocumentType::Contract => {
            if let (Some(effective), Some(expires)) =
                (date("effective_date"), date("expiration_date"))
            {
                if effective > expires {
                    flags.insert(ValidationFlag::EffectiveAfterExpiration);
                }
            }
            if decimal("contract_value").is_some_and(|v| v < 0.0) {
                flags.insert(ValidationFlag::NegativeAmount);
            }
        }
        DocumentType::Cv => {
            if !has_value(fields, "experience") && !has_value(fields, "education") {
                flags.insert(ValidationFlag::MissingExperienceAndEducation);
            }
        }
        DocumentType::Other => {}
    }

    if fields.iter().any(|f| f.value.is_none()) {
        flags.insert(ValidationFlag::UnparsedValue);
    }
    flags
}

fn field_value<'a>(fields: &'a [ExtractedField], name: &str) -> Option<&'a FieldValue> {
    fields.iter().find(|f| f.name == name)?.value.as_ref()
}

fn has_value(fields: &[ExtractedField], name: &str) -> bool {
    field_value(fields, name).is_some()
}
