//! Per-type sanitization and shape rules.

use std::sync::OnceLock;

use regex::Regex;

use super::FieldType;

fn tag_re() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

fn dangerous_re() -> &'static Regex {
    static DANGEROUS_RE: OnceLock<Regex> = OnceLock::new();
    DANGEROUS_RE.get_or_init(|| {
        Regex::new(r"(?i)javascript\s*:|vbscript\s*:|data\s*:\s*text/html|\bon[a-z]+\s*=")
            .expect("valid regex")
    })
}

fn email_re() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

fn phone_re() -> &'static Regex {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE.get_or_init(|| Regex::new(r"^\+?[\d\s\-()]+$").expect("valid regex"))
}

fn name_re() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new(r"^[\p{L}][\p{L} '.\-]*$").expect("valid regex"))
}

fn number_re() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex"))
}

fn id_re() -> &'static Regex {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid regex"))
}

/// Remove tags, stray angle brackets and script-bearing substrings.
///
/// Brackets go before the pattern pass so `javas<cript:` cannot collapse
/// into a scheme afterwards. Dangerous patterns are removed until none
/// remain, so nested payloads such as `javajavascript:script:` cannot
/// reassemble after one pass either.
#[must_use]
pub fn strip_markup(input: &str) -> String {
    let mut out = tag_re().replace_all(input, "").into_owned();
    out.retain(|c| c != '<' && c != '>');
    loop {
        let next = dangerous_re().replace_all(&out, "").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    out
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitize `input` for `field_type`. Never fails; may return an empty string.
///
/// Enum values outside the allow-list come back empty.
#[must_use]
pub fn sanitize(input: &str, field_type: FieldType) -> String {
    let stripped = strip_markup(input);
    let max = field_type.max_len();

    let cleaned = match field_type {
        FieldType::Name => {
            let kept: String = stripped
                .chars()
                .filter(|c| c.is_alphabetic() || matches!(c, ' ' | '\'' | '-' | '.'))
                .collect();
            collapse_whitespace(&kept)
        }
        FieldType::Email => stripped
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase(),
        FieldType::Phone => stripped
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
            .collect::<String>()
            .trim()
            .to_string(),
        FieldType::Text => collapse_whitespace(&stripped),
        FieldType::Select(field) => {
            let value = collapse_whitespace(&stripped);
            if field.allows(&value) {
                value
            } else {
                String::new()
            }
        }
        FieldType::Multiline => stripped
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        FieldType::Number => stripped
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
            .collect(),
        FieldType::Id => stripped
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            .collect(),
    };

    truncate_chars(&cleaned, max)
}

/// Check the shape of an already-sanitized non-empty value. Returns the
/// failure message.
pub fn check_shape(value: &str, field_type: FieldType) -> Result<(), String> {
    if value.chars().count() > field_type.max_len() {
        return Err(format!("Must be at most {} characters", field_type.max_len()));
    }

    match field_type {
        FieldType::Name => {
            if value.chars().count() < 2 {
                return Err("Name must be at least 2 characters".into());
            }
            if !name_re().is_match(value) {
                return Err("Name contains invalid characters".into());
            }
        }
        FieldType::Email => {
            if !email_re().is_match(value) {
                return Err("Invalid email address".into());
            }
        }
        FieldType::Phone => {
            let digits = value.chars().filter(char::is_ascii_digit).count();
            if !phone_re().is_match(value) || !(7..=15).contains(&digits) {
                return Err("Invalid phone number".into());
            }
        }
        FieldType::Number => {
            if !number_re().is_match(value) {
                return Err("Must be a number".into());
            }
        }
        FieldType::Select(field) => {
            if !field.allows(value) {
                return Err(format!("Invalid {} value", field.as_str()));
            }
        }
        FieldType::Id => {
            if !id_re().is_match(value) {
                return Err("Invalid identifier".into());
            }
        }
        FieldType::Text | FieldType::Multiline => {}
    }
    Ok(())
}
