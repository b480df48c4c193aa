use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {field}: {value}")]
pub struct ParseEnumError {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Variant order is significant: derived `Ord` follows declaration order.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ParseEnumError {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

// Declaration order doubles as the classifier tie-break priority.
str_enum!(DocumentType {
    Invoice => "invoice",
    Contract => "contract",
    Cv => "cv",
    Other => "other",
});

str_enum!(InputFormat {
    Pdf => "pdf",
    Docx => "docx",
    Text => "text",
});

str_enum!(Language {
    Spanish => "es",
    English => "en",
    Unknown => "und",
});

str_enum!(BlockSource {
    TextLayer => "text_layer",
    Ocr => "ocr",
    Paragraph => "paragraph",
    TableRow => "table_row",
    PlainText => "plain_text",
});

str_enum!(BackendKind {
    Local => "local",
    Cloud => "cloud",
});

str_enum!(ExtractionPass {
    Model => "model",
    Pattern => "pattern",
});

str_enum!(ValidationFlag {
    AmountMismatch => "amount_mismatch",
    NegativeAmount => "negative_amount",
    TaxRateOutOfRange => "tax_rate_out_of_range",
    DueDateBeforeIssueDate => "due_date_before_issue_date",
    EffectiveAfterExpiration => "effective_after_expiration",
    MissingExperienceAndEducation => "missing_experience_and_education",
    UnparsedValue => "unparsed_value",
});

impl Language {
    /// Tesseract traineddata code for this language.
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Self::Spanish => "spa",
            Self::English => "eng",
            Self::Unknown => "spa+eng",
        }
    }
}
