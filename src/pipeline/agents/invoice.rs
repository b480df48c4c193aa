//! Invoice agent: prompt instructions and the deterministic pattern pass.

use std::sync::LazyLock;

use regex::Regex;

use super::values::{AMOUNT_PATTERN, DATE_PATTERN};

pub(super) const INSTRUCTIONS: &str = "\
The document is an invoice (factura). Amounts: subtotal is the taxable base \
(base imponible), tax_amount is the IVA/VAT amount, total includes taxes. \
tax_rate is the percentage number only (21 for 21%). issuer_tax_id is the \
CIF/NIF/VAT number of the issuer, not of the customer. Dates as written.";

static INVOICE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:factura|invoice)\b[^\S\n]*(?:n[º°o]\.?|n[uú]m(?:ero)?\.?|number|no\.|#)?[^\S\n]*[:#]?[^\S\n]*((?:[A-Z]+[\-/]?)?\d[\dA-Z\-/]*)",
    )
    .unwrap()
});

static ISSUE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^[^\S\n]*(?:fecha(?:\s+de)?(?:\s+(?:emisi[oó]n|expedici[oó]n|factura))?|issue\s+date|invoice\s+date|date(?:\s+of\s+issue)?)[^\S\n]*:?[^\S\n]*({DATE_PATTERN})"
    ))
    .unwrap()
});

static DUE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:fecha\s+de\s+vencimiento|vencimiento|fecha\s+l[ií]mite\s+de\s+pago|due\s+date|payment\s+due)[^\S\n]*:?[^\S\n]*({DATE_PATTERN})"
    ))
    .unwrap()
});

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(AMOUNT_PATTERN).unwrap());

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:[.,]\d{1,2})?)[^\S\n]*%").unwrap());

static TAX_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:iva|i\.v\.a|vat|tax|impuestos?)\b").unwrap());

static TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:CIF|NIF|VAT(?:[^\S\n]+(?:ID|number|no\.?))?|tax[^\S\n]+id)[^\S\n]*[:.]?[^\S\n]*([A-Z]{0,2}-?\d{7,8}-?[A-Z]?)\b")
        .unwrap()
});

/// Spanish CIF without a label.
static BARE_CIF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([ABCDEFGHJNPQRSUVW]\d{7}[0-9A-J])\b").unwrap());

static CUSTOMER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[^\S\n]*(?:cliente|customer|bill(?:ed)?\s+to|facturar\s+a|destinatario)[^\S\n]*:[^\S\n]*(\S[^\n]*?)[^\S\n]*$")
        .unwrap()
});

static ISSUER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[^\S\n]*(?:emisor|proveedor|issuer|vendor|seller|from)[^\S\n]*:[^\S\n]*(\S[^\n]*?)[^\S\n]*$")
        .unwrap()
});

static COMPANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-ZÁÉÍÓÚÑ][\w&\-]*(?:[^\S\n]+[\w&\-.]+)*?[^\S\n]+(?:S\.A\.U\.|S\.A\.|S\.L\.U\.|S\.L\.|Ltd\.?|Inc\.?|LLC|GmbH))")
        .unwrap()
});

static PAYMENT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:forma\s+de\s+pago|m[eé]todo\s+de\s+pago|medio\s+de\s+pago|payment\s+method)[^\S\n]*:[^\S\n]*([^\n]+)")
        .unwrap()
});

static PAYMENT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(transferencia(?:\s+bancaria)?|bank\s+transfer|domiciliaci[oó]n|tarjeta|efectivo|cheque)\b")
        .unwrap()
});

const SUBTOTAL_LABELS: &[&str] = &[
    "base imponible",
    "base tributable",
    "subtotal",
    "sub-total",
    "sin iva",
    "net amount",
    "amount before tax",
];

const TOTAL_LABELS: &[&str] = &[
    "total factura",
    "total a pagar",
    "importe total",
    "total con iva",
    "total amount",
    "amount due",
    "grand total",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountLine {
    Subtotal,
    Tax,
    Total,
}

fn amount_line(lower: &str) -> Option<AmountLine> {
    if SUBTOTAL_LABELS.iter().any(|l| lower.contains(l)) {
        Some(AmountLine::Subtotal)
    } else if TOTAL_LABELS.iter().any(|l| lower.contains(l)) {
        Some(AmountLine::Total)
    } else if TAX_LABEL.is_match(lower) {
        Some(AmountLine::Tax)
    } else if lower.trim_start().starts_with("total") {
        Some(AmountLine::Total)
    } else {
        None
    }
}

/// Last amount on the line, ignoring percentages.
fn last_amount(line: &str) -> Option<String> {
    let without_percent = PERCENT.replace_all(line, "");
    AMOUNT
        .find_iter(&without_percent)
        .last()
        .map(|m| m.as_str().trim().trim_end_matches(['.', ',']).to_string())
}

/// Candidate (field, raw value) pairs found by regex over the invoice text.
pub(super) fn pattern_candidates(text: &str) -> Vec<(&'static str, String)> {
    let mut found: Vec<(&'static str, String)> = Vec::new();
    let mut push = |name: &'static str, value: String| {
        if !value.is_empty() && !found.iter().any(|(n, _)| *n == name) {
            found.push((name, value));
        }
    };

    for line in text.lines() {
        let lower = line.to_lowercase();
        if !lower.contains("total") {
            if let Some(caps) = INVOICE_NUMBER.captures(line) {
                push("invoice_number", caps[1].to_string());
            }
        }
        if let Some(caps) = ISSUE_DATE.captures(line) {
            push("issue_date", caps[1].to_string());
        }
        if let Some(caps) = DUE_DATE.captures(line) {
            push("due_date", caps[1].to_string());
        }
        match amount_line(&lower) {
            Some(AmountLine::Subtotal) => {
                if let Some(amount) = last_amount(line) {
                    push("subtotal", amount);
                }
            }
            Some(AmountLine::Tax) => {
                if let Some(caps) = PERCENT.captures(line) {
                    push("tax_rate", caps[1].to_string());
                }
                if let Some(amount) = last_amount(line) {
                    push("tax_amount", amount);
                }
            }
            Some(AmountLine::Total) => {
                if let Some(amount) = last_amount(line) {
                    push("total", amount);
                }
            }
            None => {}
        }
    }

    if let Some(caps) = TAX_ID.captures(text).or_else(|| BARE_CIF.captures(text)) {
        push("issuer_tax_id", caps[1].to_string());
    }
    if let Some(caps) = ISSUER.captures(text) {
        push("issuer_name", caps[1].to_string());
    }
    let customer = CUSTOMER.captures(text).map(|caps| caps[1].to_string());
    if let Some(company) = COMPANY
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .find(|c| customer.as_deref().map_or(true, |cust| !cust.contains(c.as_str())))
    {
        push("issuer_name", company);
    }
    if let Some(customer) = customer {
        push("customer_name", customer);
    }
    if let Some(currency) = dominant_currency(text) {
        push("currency", currency.to_string());
    }
    if let Some(caps) = PAYMENT_LABEL
        .captures(text)
        .or_else(|| PAYMENT_KEYWORD.captures(text))
    {
        push("payment_method", caps[1].trim().to_string());
    }

    found
}

fn dominant_currency(text: &str) -> Option<&'static str> {
    let count = |symbol: char, code: &str| {
        text.matches(symbol).count()
            + text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| *w == code)
                .count()
    };
    [("EUR", count('€', "EUR")), ("USD", count('$', "USD")), ("GBP", count('£', "GBP"))]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(code, _)| code)
}
