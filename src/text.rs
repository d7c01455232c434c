use std::sync::LazyLock;

use html_escape::decode_html_entities;
use regex::Regex;

/// Placeholder written for any field that could not be extracted.
pub const SENTINEL: &str = "N/A";

/// Separator between the items of a multi-value field.
pub const JOIN_DELIMITER: &str = " · ";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Normalize raw extracted text: unescape entities, strip tags, collapse whitespace.
///
/// `None` and anything that normalizes to an empty string become [`SENTINEL`].
pub fn clean<S: AsRef<str>>(raw: Option<S>) -> String {
    let Some(raw) = raw else {
        return SENTINEL.to_string();
    };
    let unescaped = decode_html_entities(raw.as_ref());
    let untagged = TAG_RE.replace_all(&unescaped, " ");
    let normalized = normalize_whitespace(&untagged);
    if normalized.is_empty() {
        SENTINEL.to_string()
    } else {
        normalized
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim each part, drop empties, join the rest in order with [`JOIN_DELIMITER`].
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let kept: Vec<String> = parts
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if kept.is_empty() {
        SENTINEL.to_string()
    } else {
        kept.join(JOIN_DELIMITER)
    }
}

/// True when a cell carries a real value rather than the placeholder.
pub fn is_present(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != SENTINEL
}
