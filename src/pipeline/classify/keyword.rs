use std::sync::LazyLock;

use regex::Regex;

use super::DocumentClassifier;
use crate::models::{ClassificationResult, DocumentType, NormalizedDocument, TypeCandidate};

/// Scoring constants for the keyword classifier.
pub mod classifier_weights {
    /// raw / (raw + SATURATION): a raw cue sum of 4.0 maps to 0.5.
    pub const SATURATION: f32 = 4.0;

    /// Occurrences of one term counted at most this many times.
    pub const MAX_OCCURRENCES: usize = 3;

    /// Weight of a type cue found in the filename.
    pub const FILENAME_CUE: f32 = 2.5;

    /// Max bonus for invoice-style tabular lines.
    pub const TABLE_DENSITY: f32 = 2.0;
    /// Share of tabular lines that earns the full table bonus.
    pub const TABLE_DENSITY_FULL: f32 = 0.3;

    /// Bonus for long running text (contracts).
    pub const LONG_DOCUMENT: f32 = 2.0;
    pub const LONG_DOCUMENT_WORDS: usize = 800;

    /// Bonus for many short bullet lines (CVs).
    pub const BULLET_LINES: f32 = 2.0;
    pub const BULLET_SHARE: f32 = 0.15;
    pub const BULLET_MIN_LINES: usize = 3;
    pub const BULLET_MAX_CHARS: usize = 80;

    /// Other scores OTHER_BASE * (1 - best typed score), so it stays < 0.3.
    pub const OTHER_BASE: f32 = 0.25;
}

use classifier_weights as w;

const INVOICE_TERMS: &[(&str, f32)] = &[
    ("factura", 3.0),
    ("invoice", 3.0),
    ("iva", 1.5),
    ("vat", 1.5),
    ("subtotal", 2.0),
    ("base imponible", 2.0),
    ("importe", 1.0),
    ("total", 0.5),
    ("fecha de vencimiento", 1.5),
    ("due date", 1.5),
    ("bill to", 1.5),
    ("forma de pago", 1.0),
    ("payment terms", 1.0),
    ("cif", 1.0),
    ("nif", 1.0),
    ("tax", 0.5),
];

const CONTRACT_TERMS: &[(&str, f32)] = &[
    ("contrato", 3.0),
    ("contract", 3.0),
    ("agreement", 2.5),
    ("cláusula", 2.0),
    ("clausula", 2.0),
    ("clause", 2.0),
    ("las partes", 1.5),
    ("parties", 1.5),
    ("en adelante", 1.5),
    ("hereinafter", 1.5),
    ("reunidos", 1.5),
    ("whereas", 1.5),
    ("firma", 1.0),
    ("signature", 1.0),
    ("jurisdicción", 1.0),
    ("governing law", 1.5),
    ("vigencia", 1.0),
    ("arrendamiento", 1.5),
];

const CV_TERMS: &[(&str, f32)] = &[
    ("curriculum", 3.0),
    ("resume", 2.5),
    ("résumé", 2.5),
    ("experiencia laboral", 2.5),
    ("experiencia profesional", 2.5),
    ("work experience", 2.5),
    ("experiencia", 1.0),
    ("experience", 1.0),
    ("formación", 2.0),
    ("formacion", 2.0),
    ("education", 2.0),
    ("educación", 1.5),
    ("habilidades", 2.0),
    ("skills", 2.0),
    ("competencias", 1.5),
    ("idiomas", 1.5),
    ("datos personales", 2.0),
    ("linkedin", 1.5),
];

const INVOICE_FILENAME: &[&str] = &["factura", "invoice", "fra", "fact"];
const CONTRACT_FILENAME: &[&str] = &["contrato", "contract", "agreement", "acuerdo"];
const CV_FILENAME: &[&str] = &["cv", "curriculum", "resume"];

/// An amount-like token: 1.234,56 / 1,234.56 / 121,00 / 100.
static NUMERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:[.,\s]\d{3})*(?:[.,]\d{1,2})?\b").unwrap());

/// Deterministic lexical + structural classifier.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Raw weighted cue sum per typed document class.
    fn raw_scores(&self, doc: &NormalizedDocument) -> [(DocumentType, f32); 3] {
        let text = doc.full_text().to_lowercase();
        let filename = doc.source_name.to_lowercase();
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let mut invoice = term_score(&text, INVOICE_TERMS) + filename_score(&filename, INVOICE_FILENAME);
        let mut contract =
            term_score(&text, CONTRACT_TERMS) + filename_score(&filename, CONTRACT_FILENAME);
        let mut cv = term_score(&text, CV_TERMS) + filename_score(&filename, CV_FILENAME);

        invoice += table_density_bonus(&lines);
        if doc.word_count() >= w::LONG_DOCUMENT_WORDS {
            contract += w::LONG_DOCUMENT;
        }
        cv += bullet_bonus(&lines);

        [
            (DocumentType::Invoice, invoice),
            (DocumentType::Contract, contract),
            (DocumentType::Cv, cv),
        ]
    }
}

impl DocumentClassifier for KeywordClassifier {
    fn classify(&self, doc: &NormalizedDocument) -> ClassificationResult {
        let raw = self.raw_scores(doc);
        let mut candidates: Vec<TypeCandidate> = raw
            .iter()
            .map(|&(document_type, raw)| TypeCandidate {
                document_type,
                score: saturate(raw),
            })
            .collect();
        let best_typed = candidates.iter().map(|c| c.score).fold(0.0_f32, f32::max);
        candidates.push(TypeCandidate {
            document_type: DocumentType::Other,
            score: w::OTHER_BASE * (1.0 - best_typed),
        });

        let result = ClassificationResult::from_candidates(candidates);
        tracing::info!(
            document_id = %doc.document_id,
            document_type = result.document_type.as_str(),
            confidence = result.confidence,
            "Document classified"
        );
        result
    }
}

fn saturate(raw: f32) -> f32 {
    if raw <= 0.0 {
        0.0
    } else {
        raw / (raw + w::SATURATION)
    }
}

fn term_score(text: &str, terms: &[(&str, f32)]) -> f32 {
    terms
        .iter()
        .map(|&(term, weight)| count_term(text, term).min(w::MAX_OCCURRENCES) as f32 * weight)
        .sum()
}

fn filename_score(filename: &str, cues: &[&str]) -> f32 {
    if cues.iter().any(|cue| count_term(filename, cue) > 0) {
        w::FILENAME_CUE
    } else {
        0.0
    }
}

/// Occurrences of `term` not embedded in a longer word.
/// `_` counts as a separator so filenames like `cv_ana.pdf` match.
pub(crate) fn count_term(haystack: &str, term: &str) -> usize {
    let is_word = |c: char| c.is_alphanumeric();
    haystack
        .match_indices(term)
        .filter(|(i, _)| {
            let before = haystack[..*i].chars().next_back();
            let after = haystack[*i + term.len()..].chars().next();
            !before.is_some_and(is_word) && !after.is_some_and(is_word)
        })
        .count()
}

/// Lines with a `|` separator or at least two amount-like columns.
fn table_density_bonus(lines: &[&str]) -> f32 {
    if lines.len() < 3 {
        return 0.0;
    }
    let tabular = lines
        .iter()
        .filter(|l| l.contains('|') || NUMERIC_TOKEN.find_iter(l).count() >= 2)
        .count();
    let density = tabular as f32 / lines.len() as f32;
    w::TABLE_DENSITY * (density / w::TABLE_DENSITY_FULL).min(1.0)
}

fn bullet_bonus(lines: &[&str]) -> f32 {
    let bullets = lines
        .iter()
        .filter(|l| {
            l.chars().count() <= w::BULLET_MAX_CHARS
                && l.starts_with(&['-', '•', '*', '·', '▪'][..])
        })
        .count();
    if bullets >= w::BULLET_MIN_LINES && bullets as f32 / lines.len() as f32 >= w::BULLET_SHARE {
        w::BULLET_LINES
    } else {
        0.0
    }
}
