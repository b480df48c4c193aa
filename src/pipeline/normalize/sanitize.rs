/// Sanitize extracted text before passing downstream.
/// Strips control characters, collapses runs of whitespace inside lines, trims
/// lines and drops empty ones. Punctuation and currency symbols are kept.
pub fn sanitize_text(raw: &str) -> String {
    raw.lines()
        .map(sanitize_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sanitize a single line: control characters removed, whitespace collapsed.
pub fn sanitize_line(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            // Tabs, NBSP, narrow NBSP all become a single space
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() || is_invisible_format_char(c) {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

fn is_invisible_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' // zero width space
            | '\u{200C}'
            | '\u{200D}'
            | '\u{FEFF}' // stray BOM
            | '\u{00AD}' // soft hyphen
    )
}

/// Count characters that carry content.
pub fn non_blank_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
