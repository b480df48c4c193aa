//! Extraction schemas: the ordered field list each document type yields.

use crate::models::DocumentType;

/// Value kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Decimal,
    Date,
    /// Closed set of accepted options (compared case-insensitively).
    Enumerated(&'static [&'static str]),
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Enumerated(_) => "enumerated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Relative weight in field-level confidence averages.
    pub weight: f32,
    /// Short description placed in the prompt.
    pub description: &'static str,
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    required: bool,
    weight: f32,
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
        weight,
        description,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSchema {
    pub document_type: DocumentType,
    pub fields: &'static [FieldSpec],
}

pub const CURRENCIES: &[&str] = &["EUR", "USD", "GBP"];
pub const PAYMENT_METHODS: &[&str] = &["transfer", "card", "cash", "direct_debit", "check"];
pub const CONTRACT_TYPES: &[&str] = &["services", "employment", "lease", "sale", "nda", "other"];

use FieldKind::{Date, Decimal, Enumerated, Text};

const INVOICE_FIELDS: &[FieldSpec] = &[
    field("invoice_number", Text, true, 1.0, "Invoice number or identifier"),
    field("issue_date", Date, true, 1.0, "Date the invoice was issued"),
    field("issuer_name", Text, false, 0.5, "Company or person issuing the invoice"),
    field("issuer_tax_id", Text, false, 0.5, "Tax id of the issuer (CIF/NIF/VAT number)"),
    field("customer_name", Text, false, 0.5, "Company or person being billed"),
    field("subtotal", Decimal, true, 1.0, "Amount before taxes"),
    field("tax_rate", Decimal, false, 0.5, "Tax rate as a percentage, e.g. 21"),
    field("tax_amount", Decimal, true, 1.0, "Total tax amount (IVA/VAT)"),
    field("total", Decimal, true, 1.5, "Total amount including taxes"),
    field("currency", Enumerated(CURRENCIES), false, 0.3, "Currency code"),
    field("payment_method", Enumerated(PAYMENT_METHODS), false, 0.3, "How the invoice is paid"),
    field("due_date", Date, false, 0.5, "Payment due date"),
];

const CONTRACT_FIELDS: &[FieldSpec] = &[
    field("parties", Text, true, 1.5, "Names of the contracting parties, separated by ';'"),
    field("contract_type", Enumerated(CONTRACT_TYPES), false, 0.5, "Kind of contract"),
    field("effective_date", Date, true, 1.0, "Date the contract takes effect"),
    field("expiration_date", Date, false, 0.5, "Date the contract ends"),
    field("governing_law", Text, false, 0.3, "Governing law or jurisdiction"),
    field("contract_value", Decimal, false, 0.5, "Total monetary value of the contract"),
];

const CV_FIELDS: &[FieldSpec] = &[
    field("full_name", Text, true, 1.5, "Candidate's full name"),
    field("email", Text, false, 0.5, "Contact email"),
    field("phone", Text, false, 0.5, "Contact phone number"),
    field("experience", Text, false, 1.0, "Work experience summary (roles, companies, years)"),
    field("education", Text, false, 1.0, "Education summary (degrees, institutions)"),
    field("skills", Text, false, 0.5, "Key skills, comma separated"),
    field("languages", Text, false, 0.3, "Spoken languages"),
];

pub const INVOICE_SCHEMA: ExtractionSchema = ExtractionSchema {
    document_type: DocumentType::Invoice,
    fields: INVOICE_FIELDS,
};

pub const CONTRACT_SCHEMA: ExtractionSchema = ExtractionSchema {
    document_type: DocumentType::Contract,
    fields: CONTRACT_FIELDS,
};

pub const CV_SCHEMA: ExtractionSchema = ExtractionSchema {
    document_type: DocumentType::Cv,
    fields: CV_FIELDS,
};

/// `Other` has no extractor; its schema is empty.
pub const OTHER_SCHEMA: ExtractionSchema = ExtractionSchema {
    document_type: DocumentType::Other,
    fields: &[],
};

impl ExtractionSchema {
    pub fn for_type(document_type: DocumentType) -> &'static ExtractionSchema {
        match document_type {
            DocumentType::Invoice => &INVOICE_SCHEMA,
            DocumentType::Contract => &CONTRACT_SCHEMA,
            DocumentType::Cv => &CV_SCHEMA,
            DocumentType::Other => &OTHER_SCHEMA,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Position of a field in schema order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn has_required_fields(&self) -> bool {
        self.required().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_type_has_a_schema() {
        for &t in DocumentType::ALL {
            assert_eq!(ExtractionSchema::for_type(t).document_type, t);
        }
    }

    #[test]
    fn field_names_are_unique() {
        for &t in DocumentType::ALL {
            let schema = ExtractionSchema::for_type(t);
            let names: HashSet<_> = schema.fields.iter().map(|f| f.name).collect();
            assert_eq!(names.len(), schema.fields.len(), "duplicate field in {t}");
        }
    }

    #[test]
    fn invoice_required_fields() {
        let required: Vec<_> = INVOICE_SCHEMA.required().map(|f| f.name).collect();
        assert_eq!(
            required,
            vec!["invoice_number", "issue_date", "subtotal", "tax_amount", "total"]
        );
    }

    #[test]
    fn other_schema_is_empty() {
        assert!(OTHER_SCHEMA.fields.is_empty());
        assert!(!OTHER_SCHEMA.has_required_fields());
    }

    #[test]
    fn weights_are_positive() {
        for &t in DocumentType::ALL {
            assert!(ExtractionSchema::for_type(t).fields.iter().all(|f| f.weight > 0.0));
        }
    }

    #[test]
    fn lookup_and_position() {
        assert_eq!(CV_SCHEMA.position("email"), Some(1));
        assert_eq!(CONTRACT_SCHEMA.field("parties").map(|f| f.kind), Some(FieldKind::Text));
        assert!(!INVOICE_SCHEMA.contains("full_name"));
    }
}
