//! CV agent: prompt instructions and the deterministic pattern pass
//! (contact details plus section bodies found under known headings).

use std::sync::LazyLock;

use regex::Regex;

pub(super) const INSTRUCTIONS: &str = "\
The document is a CV / résumé (currículum). full_name is the candidate's \
name. experience and education are short summaries (role, organisation, \
years) separated by ';'. skills and languages are comma separated lists.";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});

static PHONE_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:tel[eé]fono|tel\.?|phone|m[oó]vil|mobile|cell)[^\S\n]*:?[^\S\n]*(\+?\d[\d ().\-]{6,}\d)")
        .unwrap()
});

static PHONE_INTERNATIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\+\d{1,3}[ .\-]?\d[\d .\-]{6,}\d)").unwrap());

/// Spanish mobile / landline without a label.
static PHONE_SPANISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([679]\d{2}[ .]?\d{3}[ .]?\d{3})\b").unwrap());

static NAME_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[^\S\n]*(?:nombre(?:\s+completo)?|full\s+name|name)[^\S\n]*:[^\S\n]*(\S[^\n]*?)[^\S\n]*$")
        .unwrap()
});

static NAME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\p{Lu}[\p{L}'\-]+(?:[^\S\n]+\p{Lu}[\p{L}'\-]+){1,3}$").unwrap()
});

/// Lines at the top of the document searched for an unlabelled name.
const NAME_SEARCH_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Experience,
    Education,
    Skills,
    Languages,
    /// Known heading whose body is not extracted.
    Ignored,
}

const HEADINGS: &[(&str, Section)] = &[
    ("experiencia", Section::Experience),
    ("experiencia profesional", Section::Experience),
    ("experiencia laboral", Section::Experience),
    ("experience", Section::Experience),
    ("work experience", Section::Experience),
    ("professional experience", Section::Experience),
    ("employment history", Section::Experience),
    ("formación", Section::Education),
    ("formación académica", Section::Education),
    ("educación", Section::Education),
    ("estudios", Section::Education),
    ("education", Section::Education),
    ("academic background", Section::Education),
    ("habilidades", Section::Skills),
    ("competencias", Section::Skills),
    ("aptitudes", Section::Skills),
    ("skills", Section::Skills),
    ("technical skills", Section::Skills),
    ("idiomas", Section::Languages),
    ("languages", Section::Languages),
    ("perfil", Section::Ignored),
    ("perfil profesional", Section::Ignored),
    ("profile", Section::Ignored),
    ("summary", Section::Ignored),
    ("contacto", Section::Ignored),
    ("contact", Section::Ignored),
    ("datos personales", Section::Ignored),
    ("referencias", Section::Ignored),
    ("references", Section::Ignored),
    ("certificaciones", Section::Ignored),
    ("certifications", Section::Ignored),
    ("proyectos", Section::Ignored),
    ("projects", Section::Ignored),
    ("intereses", Section::Ignored),
    ("interests", Section::Ignored),
];

fn heading(line: &str) -> Option<Section> {
    let key = line.trim().trim_end_matches(':').trim().to_lowercase();
    HEADINGS
        .iter()
        .find(|(h, _)| *h == key)
        .map(|(_, section)| *section)
}

fn strip_bullet(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['-', '•', '*', '·', '–', '▪', '●'])
        .trim()
}

fn flush(current: Option<(Section, Vec<&str>)>, result: &mut Vec<(Section, String)>) {
    if let Some((section, lines)) = current {
        if section != Section::Ignored
            && !lines.is_empty()
            && !result.iter().any(|(s, _)| *s == section)
        {
            result.push((section, lines.join("; ")));
        }
    }
}

/// Section bodies joined with "; ", first occurrence of each section.
fn sections(text: &str) -> Vec<(Section, String)> {
    let mut result: Vec<(Section, String)> = Vec::new();
    let mut current: Option<(Section, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(section) = heading(line) {
            flush(current.take(), &mut result);
            current = Some((section, Vec::new()));
            continue;
        }
        if let Some((_, lines)) = current.as_mut() {
            let body = strip_bullet(line);
            if !body.is_empty() {
                lines.push(body);
            }
        }
    }
    flush(current, &mut result);
    result
}

fn find_name(text: &str) -> Option<String> {
    if let Some(caps) = NAME_LABELLED.captures(text) {
        return Some(caps[1].to_string());
    }
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(NAME_SEARCH_LINES)
        .find(|line| {
            let lower = line.to_lowercase();
            heading(line).is_none()
                && !lower.contains("curriculum")
                && !lower.contains("currículum")
                && !lower.contains("resume")
                && NAME_LINE.is_match(line)
        })
        .map(str::to_string)
}

fn find_phone(text: &str) -> Option<String> {
    PHONE_LABELLED
        .captures(text)
        .or_else(|| PHONE_INTERNATIONAL.captures(text))
        .or_else(|| PHONE_SPANISH.captures(text))
        .map(|caps| caps[1].trim().to_string())
}

/// Candidate (field, raw value) pairs found over the CV text.
pub(super) fn pattern_candidates(text: &str) -> Vec<(&'static str, String)> {
    let mut found: Vec<(&'static str, String)> = Vec::new();

    if let Some(name) = find_name(text) {
        found.push(("full_name", name));
    }
    if let Some(email) = EMAIL.find(text) {
        found.push(("email", email.as_str().to_string()));
    }
    if let Some(phone) = find_phone(text) {
        found.push(("phone", phone));
    }
    for (section, body) in sections(text) {
        let name = match section {
            Section::Experience => "experience",
            Section::Education => "education",
            Section::Skills => "skills",
            Section::Languages => "languages",
            Section::Ignored => continue,
        };
        found.push((name, body));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPANISH_CV: &str = "\
Currículum Vitae
Ana García López
ana.garcia@example.com | Tel: +34 600 123 456

Experiencia profesional:
- Desarrolladora backend, ACME (2019-2024)
- Becaria, Beta (2018)

Formación
• Grado en Ingeniería Informática, UPM (2018)

Habilidades
Rust, SQL, Docker

Idiomas
Español (nativo), Inglés (C1)";

    fn value<'a>(found: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        found.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn spanish_cv_fields() {
        let found = pattern_candidates(SPANISH_CV);
        assert_eq!(value(&found, "full_name"), Some("Ana García López"));
        assert_eq!(value(&found, "email"), Some("ana.garcia@example.com"));
        assert_eq!(value(&found, "phone"), Some("+34 600 123 456"));
        assert_eq!(
            value(&found, "experience"),
            Some("Desarrolladora backend, ACME (2019-2024); Becaria, Beta (2018)")
        );
        assert_eq!(
            value(&found, "education"),
            Some("Grado en Ingeniería Informática, UPM (2018)")
        );
        assert_eq!(value(&found, "skills"), Some("Rust, SQL, Docker"));
        assert_eq!(value(&found, "languages"), Some("Español (nativo), Inglés (C1)"));
    }

    #[test]
    fn labelled_name_and_bare_spanish_phone() {
        let text = "Name: John Smith\nContact: 612345678\n";
        let found = pattern_candidates(text);
        assert_eq!(value(&found, "full_name"), Some("John Smith"));
        assert_eq!(value(&found, "phone"), Some("612345678"));
    }

    #[test]
    fn ignored_sections_end_previous_body() {
        let text = "Skills\nRust\nReferences\nAvailable on request";
        let found = pattern_candidates(text);
        assert_eq!(value(&found, "skills"), Some("Rust"));
        assert!(!found.iter().any(|(_, v)| v.contains("request")));
    }

    #[test]
    fn heading_lines_are_not_names() {
        assert_eq!(find_name("Work Experience\nSenior Engineer at ACME"), None);
    }
}
