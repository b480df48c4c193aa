//! Typed parsing of raw field values: locale-aware decimals, dates,
//! enumerated options, plus the heuristic confidence used when the model
//! reports none.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::{ExtractionConfig, NumberLocale};
use crate::models::{ExtractedField, FieldValue, Provenance};
use crate::pipeline::schema::{FieldKind, FieldSpec};

/// Heuristic confidences for values the model did not score.
pub mod heuristics {
    /// Currency-like amount or a configured date format.
    pub const PATTERN_MATCH: f32 = 0.85;
    /// Parsed, but the raw text looks unusual.
    pub const LOOSE_MATCH: f32 = 0.7;
    pub const TEXTUAL_DATE: f32 = 0.75;
    pub const EXACT_OPTION: f32 = 0.9;
    pub const SYNONYM_OPTION: f32 = 0.8;
    pub const TEXT: f32 = 0.75;
    pub const SHORT_TEXT: f32 = 0.5;
    /// Texts shorter than this (in chars) count as short.
    pub const SHORT_TEXT_CHARS: usize = 3;
    /// Scale applied to every pattern-pass confidence.
    pub const PATTERN_PASS_SCALE: f32 = 0.9;
}

/// Date as commonly written in documents (numeric or textual), for pattern passes.
pub(crate) const DATE_PATTERN: &str = r"(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{4}|\d{1,2}(?:st|nd|rd|th|º)?\s+(?:de\s+)?[A-Za-záéíóúñ]+\.?\s+(?:del?\s+)?\d{4}|[A-Za-z]+\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4})";

/// Amount with optional currency symbol or code, for pattern passes.
pub(crate) const AMOUNT_PATTERN: &str =
    r"(?:[€$£][^\S\n]*)?-?\d[\d.,]*(?:[^\S\n]*(?:€|EUR|USD|GBP))?";

static CURRENCY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:eur|euros?|usd|gbp|dollars?|d[oó]lares|pounds?|libras)\b|[€$£%]").unwrap()
});

static NUMERIC_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?\s*-?\s*[\d.,' \u{a0}]*\d[\d.,' \u{a0}]*\s*-?\)?$").unwrap());

static CURRENCY_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:[€$£]\s*)?-?(?:\d{1,3}(?:[.,\s]\d{3})+|\d+)(?:[.,]\d{1,2})?(?:\s*(?:€|EUR|USD|GBP|%))?$",
    )
    .unwrap()
});

static TEXTUAL_DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?:st|nd|rd|th|º)?\s+(?:de\s+)?([a-záéíóúñ]+)\.?,?\s+(?:del?\s+)?(\d{4})$")
        .unwrap()
});

static TEXTUAL_MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$").unwrap()
});

const MONTHS: &[(&str, u32)] = &[
    ("enero", 1), ("ene", 1), ("january", 1), ("jan", 1),
    ("febrero", 2), ("feb", 2), ("february", 2),
    ("marzo", 3), ("mar", 3), ("march", 3),
    ("abril", 4), ("abr", 4), ("april", 4), ("apr", 4),
    ("mayo", 5), ("may", 5),
    ("junio", 6), ("jun", 6), ("june", 6),
    ("julio", 7), ("jul", 7), ("july", 7),
    ("agosto", 8), ("ago", 8), ("august", 8), ("aug", 8),
    ("septiembre", 9), ("setiembre", 9), ("september", 9), ("sept", 9), ("sep", 9),
    ("octubre", 10), ("oct", 10), ("october", 10),
    ("noviembre", 11), ("nov", 11), ("november", 11),
    ("diciembre", 12), ("dic", 12), ("december", 12), ("dec", 12),
];

/// Spanish and English spellings mapped onto canonical options.
const OPTION_SYNONYMS: &[(&str, &str)] = &[
    ("€", "EUR"), ("euro", "EUR"), ("euros", "EUR"),
    ("$", "USD"), ("us$", "USD"), ("dollar", "USD"), ("dollars", "USD"), ("dolares", "USD"),
    ("£", "GBP"), ("pound", "GBP"), ("pounds", "GBP"), ("libras", "GBP"),
    ("transferencia", "transfer"), ("bank_transfer", "transfer"), ("wire", "transfer"),
    ("tarjeta", "card"), ("credit_card", "card"), ("debit_card", "card"),
    ("efectivo", "cash"), ("contado", "cash"),
    ("domiciliacion", "direct_debit"), ("domiciliado", "direct_debit"), ("sepa", "direct_debit"),
    ("cheque", "check"), ("cheque_bancario", "check"),
    ("servicios", "services"), ("service", "services"), ("prestacion", "services"),
    ("laboral", "employment"), ("trabajo", "employment"),
    ("arrendamiento", "lease"), ("alquiler", "lease"), ("rental", "lease"),
    ("compraventa", "sale"), ("venta", "sale"), ("purchase", "sale"),
    ("confidencialidad", "nda"), ("non_disclosure", "nda"),
    ("otro", "other"),
];

/// Parse a monetary or plain decimal. Currency symbols and codes, `%`,
/// grouping spaces and a leading sign or accounting parentheses are
/// accepted. A single separator followed by exactly three digits is
/// resolved with `locale`.
pub fn parse_decimal(raw: &str, locale: NumberLocale) -> Option<f64> {
    let stripped = CURRENCY_TOKEN.replace_all(raw.trim(), "");
    let body = stripped.trim();
    if !NUMERIC_BODY.is_match(body) {
        return None;
    }
    let negative = body.contains('-') || (body.starts_with('(') && body.ends_with(')'));
    let digits: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    let decimal_at = decimal_separator_position(&digits, locale)?;
    let mut normalized = String::with_capacity(digits.len() + 1);
    if negative {
        normalized.push('-');
    }
    for (i, c) in digits.char_indices() {
        if c.is_ascii_digit() {
            normalized.push(c);
        } else if Some(i) == decimal_at {
            normalized.push('.');
        }
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Byte index of the decimal separator; `Some(None)` when the number is
/// integral, `None` for inconsistent grouping such as `1,2,3.4.5`.
fn decimal_separator_position(digits: &str, locale: NumberLocale) -> Option<Option<usize>> {
    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');
    match (last_comma, last_dot) {
        (None, None) => Some(None),
        (Some(c), Some(d)) => {
            let (sep, pos) = if c > d { (',', c) } else { ('.', d) };
            (digits.matches(sep).count() == 1).then_some(Some(pos))
        }
        (Some(pos), None) => Some(single_separator(digits, ',', pos, locale)),
        (None, Some(pos)) => Some(single_separator(digits, '.', pos, locale)),
    }
}

fn single_separator(digits: &str, sep: char, pos: usize, locale: NumberLocale) -> Option<usize> {
    if digits.matches(sep).count() > 1 {
        // 1.234.567: grouping only
        return None;
    }
    let before = &digits[..pos];
    let after = &digits[pos + sep.len_utf8()..];
    if after.len() == 3 && !before.is_empty() {
        let locale_decimal = match locale {
            NumberLocale::Es => ',',
            NumberLocale::En => '.',
        };
        return (sep == locale_decimal).then_some(pos);
    }
    Some(pos)
}

/// Parse a date: configured formats first (first match wins), then
/// Spanish / English textual dates.
pub fn parse_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let s = raw.trim().trim_end_matches('.');
    formats
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| parse_textual_date(s))
}

/// "15 de enero de 2024", "15 January 2024", "January 15, 2024", "3 sept. 2023".
pub fn parse_textual_date(s: &str) -> Option<NaiveDate> {
    let (day, month, year) = if let Some(caps) = TEXTUAL_DAY_FIRST.captures(s) {
        (caps[1].parse().ok()?, month_number(&caps[2])?, caps[3].parse().ok()?)
    } else if let Some(caps) = TEXTUAL_MONTH_FIRST.captures(s) {
        (caps[2].parse().ok()?, month_number(&caps[1])?, caps[3].parse().ok()?)
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    MONTHS.iter().find(|(m, _)| *m == name).map(|(_, n)| *n)
}

/// How an enumerated raw value matched its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionMatch {
    Exact(&'static str),
    Synonym(&'static str),
}

impl OptionMatch {
    pub fn value(&self) -> &'static str {
        match self {
            Self::Exact(v) | Self::Synonym(v) => *v,
        }
    }
}

pub fn match_option(raw: &str, options: &'static [&'static str]) -> Option<OptionMatch> {
    let key = option_key(raw);
    if key.is_empty() {
        return None;
    }
    if let Some(option) = options.iter().find(|o| o.to_lowercase() == key) {
        return Some(OptionMatch::Exact(*option));
    }
    let lookup = |word: &str| -> Option<&'static str> {
        let canonical = OPTION_SYNONYMS
            .iter()
            .find(|(synonym, _)| *synonym == word)
            .map(|(_, canonical)| *canonical)?;
        options.iter().find(|o| **o == canonical).copied()
    };
    if let Some(option) = lookup(key.as_str()) {
        return Some(OptionMatch::Synonym(option));
    }
    // "Transferencia 30 días", "EUR (euros)"
    key.split('_').find_map(|word| {
        options
            .iter()
            .find(|o| o.to_lowercase() == word)
            .copied()
            .or_else(|| lookup(word))
            .map(OptionMatch::Synonym)
    })
}

fn option_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            ' ' | '-' => '_',
            other => other,
        })
        .filter(|c| !matches!(c, '(' | ')' | '.' | ',' | ':'))
        .collect::<String>()
        .split('_')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Typed value for `kind`, with the heuristic confidence of the match.
/// `None` when the raw text does not parse.
pub fn parse_typed(
    kind: FieldKind,
    raw: &str,
    config: &ExtractionConfig,
) -> Option<(FieldValue, f32)> {
    let raw = raw.trim();
    match kind {
        FieldKind::Text => {
            if raw.is_empty() {
                return None;
            }
            let confidence = if raw.chars().count() < heuristics::SHORT_TEXT_CHARS {
                heuristics::SHORT_TEXT
            } else {
                heuristics::TEXT
            };
            Some((FieldValue::Text(raw.to_string()), confidence))
        }
        FieldKind::Decimal => {
            let value = parse_decimal(raw, config.number_locale)?;
            let confidence = if CURRENCY_AMOUNT.is_match(raw) {
                heuristics::PATTERN_MATCH
            } else {
                heuristics::LOOSE_MATCH
            };
            Some((FieldValue::Decimal(value), confidence))
        }
        FieldKind::Date => {
            let s = raw.trim_end_matches('.');
            if let Some(date) = config
                .date_formats
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
            {
                return Some((FieldValue::Date(date), heuristics::PATTERN_MATCH));
            }
            parse_textual_date(s).map(|d| (FieldValue::Date(d), heuristics::TEXTUAL_DATE))
        }
        FieldKind::Enumerated(options) => {
            let matched = match_option(raw, options)?;
            let confidence = match matched {
                OptionMatch::Exact(_) => heuristics::EXACT_OPTION,
                OptionMatch::Synonym(_) => heuristics::SYNONYM_OPTION,
            };
            Some((FieldValue::Enumerated(matched.value().to_string()), confidence))
        }
    }
}

/// Build an extracted field. A model-reported confidence (clamped to 0..1)
/// takes precedence over the heuristic; a value that fails typed parsing is
/// kept with no typed value and confidence 0.
pub fn build_field(
    spec: &FieldSpec,
    raw: &str,
    reported: Option<f32>,
    provenance: Provenance,
    config: &ExtractionConfig,
) -> ExtractedField {
    let raw = raw.trim();
    let (value, confidence) = match parse_typed(spec.kind, raw, config) {
        Some((value, heuristic)) => {
            let confidence = reported
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(heuristic);
            (Some(value), confidence)
        }
        None => {
            tracing::debug!(
                field = spec.name,
                kind = spec.kind.as_str(),
                raw_value = raw,
                "Field value did not parse"
            );
            (None, 0.0)
        }
    };
    ExtractedField {
        name: spec.name.to_string(),
        raw_value: raw.to_string(),
        value,
        confidence,
        provenance,
    }
}
