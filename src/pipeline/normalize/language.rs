//! Lightweight language detection for normalized text.
//!
//! Spanish vs English by function-word frequency plus Spanish-specific
//! diacritics. Anything too short or too close to call is `Unknown`.

use crate::models::Language;

/// Below this many non-blank characters the text is not classified.
const MIN_DETECT_CHARS: usize = 20;

/// Common Spanish words (function words + corporate vocabulary).
const SPANISH_INDICATORS: &[&str] = &[
    "el", "la", "los", "las", "de", "del", "que", "en", "y", "un", "una", "es",
    "se", "por", "para", "con", "al", "su", "sus", "como", "entre", "según",
    "factura", "importe", "fecha", "contrato", "cláusula", "experiencia",
    "formación", "empresa", "nombre", "total", "pago",
];

/// Common English words rarely found in Spanish text.
const ENGLISH_INDICATORS: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "it", "for", "with", "this", "that",
    "be", "by", "on", "are", "was", "from", "shall", "will", "have", "has",
    "invoice", "amount", "date", "agreement", "clause", "experience",
    "education", "company", "name", "payment", "due",
];

/// Detect the primary language of the text.
pub fn detect_language(text: &str) -> Language {
    if super::non_blank_chars(text) < MIN_DETECT_CHARS {
        return Language::Unknown;
    }

    let lower = text.to_lowercase();
    let mut spanish = 0u32;
    let mut english = 0u32;
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        // "total" and friends are shared; count for both
        if SPANISH_INDICATORS.contains(&word) {
            spanish += 1;
        }
        if ENGLISH_INDICATORS.contains(&word) {
            english += 1;
        }
    }
    spanish += count_spanish_diacritics(&lower);

    if spanish == english {
        Language::Unknown
    } else if spanish > english {
        Language::Spanish
    } else {
        Language::English
    }
}

/// Each 2 Spanish diacritics = 1 point; ñ, ¿ and ¡ count double.
fn count_spanish_diacritics(lower_text: &str) -> u32 {
    let mut count = 0u32;
    for ch in lower_text.chars() {
        match ch {
            'ñ' | '¿' | '¡' => count += 2,
            'á' | 'é' | 'í' | 'ó' | 'ú' | 'ü' => count += 1,
            _ => {}
        }
    }
    count / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_spanish_invoice() {
        let text = "Factura número 2024-001\nFecha de emisión: 15/01/2024\nImporte total con IVA: 121,00 €";
        assert_eq!(detect_language(text), Language::Spanish);
    }

    #[test]
    fn detects_english_contract() {
        let text = "This agreement is made between the parties and shall be governed by the laws of England.";
        assert_eq!(detect_language(text), Language::English);
    }

    #[test]
    fn detects_spanish_cv() {
        let text = "Experiencia profesional: ingeniero de software en una empresa de logística. Formación: Grado en Informática.";
        assert_eq!(detect_language(text), Language::Spanish);
    }

    #[test]
    fn short_text_is_unknown() {
        assert_eq!(detect_language("121,00 €"), Language::Unknown);
        assert_eq!(detect_language(""), Language::Unknown);
        assert_eq!(detect_language("     "), Language::Unknown);
    }

    #[test]
    fn no_indicators_is_unknown() {
        assert_eq!(detect_language("XJ-4411 QZ-9983 KK-0012 PP-7781"), Language::Unknown);
    }

    #[test]
    fn words_match_whole_tokens_only() {
        // "theme" and "android" must not count as "the"/"and"
        let text = "theme android thermal bandit lateral";
        assert_eq!(detect_language(text), Language::Unknown);
    }

    #[test]
    fn diacritics_boost_spanish() {
        assert_eq!(count_spanish_diacritics("año"), 1);
        assert_eq!(count_spanish_diacritics("acción más rápida"), 1);
        assert_eq!(count_spanish_diacritics("abc"), 0);
    }
}
