//! Contract agent: prompt instructions and the deterministic pattern pass.

use std::sync::LazyLock;

use regex::Regex;

use super::values::{AMOUNT_PATTERN, DATE_PATTERN};

pub(super) const INSTRUCTIONS: &str = "\
The document is a contract (contrato). parties lists every contracting party \
separated by ';'. effective_date is when the contract takes effect, \
expiration_date when it ends. contract_type is one of the listed options. \
contract_value is the total price or fee if one is stated.";

static PARTIES_BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)\b(?:entre|between)[^\S\n]+(?:de\s+una\s+parte,?\s+)?([^,;\n]+?)[^\S\n]+(?:y|and)[^\S\n]+(?:de\s+otra(?:\s+parte)?,?\s+)?([^,;\n]+?)(?:[,;]|\.(?:\s|$)|$)",
    )
    .unwrap()
});

static PARTY_SIDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)de\s+(?:una|otra)\s+parte,?[^\S\n]+(?:(?:don|doña|d\.|dña\.)[^\S\n]+)?([^,;\n]+?)(?:[,;]|\.(?:\s|$)|$)")
        .unwrap()
});

static EFFECTIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:fecha\s+de\s+(?:inicio|entrada\s+en\s+vigor|efecto|comienzo)|entrar[aá]\s+en\s+vigor|effective\s+(?:date|from|as\s+of)|commenc\w*\s+on|start\s+date|a\s+partir\s+del?)[^\S\n]*:?[^\S\n]*(?:el\s+|d[ií]a\s+|on\s+)?({DATE_PATTERN})"
    ))
    .unwrap()
});

static EXPIRATION_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:fecha\s+de\s+(?:fin(?:alizaci[oó]n)?|vencimiento|expiraci[oó]n|terminaci[oó]n)|hasta\s+el|expir\w*\s+(?:date|on)|termination\s+date|end\s+date|until)[^\S\n]*:?[^\S\n]*(?:el\s+|d[ií]a\s+|on\s+)?({DATE_PATTERN})"
    ))
    .unwrap()
});

static GOVERNING_LAW_ES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:se\s+rige\s+por|se\s+regir[aá]\s+por|sometid[oa]s?\s+a|ley\s+aplicable[^\S\n]*:?)[^\S\n]+(?:la\s+)?((?:legislaci[oó]n|ley(?:es)?)[^\S\n]+[^.,;\n]+)")
        .unwrap()
});

static GOVERNING_LAW_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)governed\s+by\s+(?:and\s+construed\s+in\s+accordance\s+with\s+)?the\s+laws?\s+of\s+(?:the\s+)?([^.,;\n]+)")
        .unwrap()
});

static CONTRACT_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:importe\s+total|precio\s+total|precio|importe|valor\s+del\s+contrato|contract\s+value|total\s+value|fee|price|consideration)\b[^\d\n€$£]{{0,25}}?({AMOUNT_PATTERN})"
    ))
    .unwrap()
});

/// Keyword cues for `contract_type`, mapped to the canonical option.
const TYPE_CUES: &[(&str, &str)] = &[
    ("arrendamiento", "lease"),
    ("alquiler", "lease"),
    ("lease agreement", "lease"),
    ("tenancy", "lease"),
    ("contrato de trabajo", "employment"),
    ("contrato laboral", "employment"),
    ("employment agreement", "employment"),
    ("employment contract", "employment"),
    ("compraventa", "sale"),
    ("purchase agreement", "sale"),
    ("sale agreement", "sale"),
    ("sales agreement", "sale"),
    ("confidencialidad", "nda"),
    ("non-disclosure", "nda"),
    ("prestación de servicios", "services"),
    ("prestacion de servicios", "services"),
    ("services agreement", "services"),
    ("service agreement", "services"),
    ("consultoría", "services"),
];

/// Candidate (field, raw value) pairs found by regex over the contract text.
pub(super) fn pattern_candidates(text: &str) -> Vec<(&'static str, String)> {
    let mut found: Vec<(&'static str, String)> = Vec::new();

    if let Some(parties) = find_parties(text) {
        found.push(("parties", parties));
    }
    if let Some(contract_type) = earliest_type_cue(text) {
        found.push(("contract_type", contract_type.to_string()));
    }
    if let Some(caps) = EFFECTIVE_DATE.captures(text) {
        found.push(("effective_date", caps[1].to_string()));
    }
    if let Some(caps) = EXPIRATION_DATE.captures(text) {
        found.push(("expiration_date", caps[1].to_string()));
    }
    if let Some(caps) = GOVERNING_LAW_ES
        .captures(text)
        .or_else(|| GOVERNING_LAW_EN.captures(text))
    {
        found.push(("governing_law", caps[1].trim().to_string()));
    }
    if let Some(caps) = CONTRACT_VALUE.captures(text) {
        let amount = caps[1].trim().trim_end_matches(['.', ',']);
        found.push(("contract_value", amount.to_string()));
    }
    found
}

fn find_parties(text: &str) -> Option<String> {
    if let Some(caps) = PARTIES_BETWEEN.captures(text) {
        return Some(format!("{}; {}", caps[1].trim(), caps[2].trim()));
    }
    let sides: Vec<String> = PARTY_SIDE
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (sides.len() >= 2).then(|| sides.join("; "))
}

fn earliest_type_cue(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    TYPE_CUES
        .iter()
        .filter_map(|(cue, option)| lower.find(cue).map(|pos| (pos, *option)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, option)| option)
}
