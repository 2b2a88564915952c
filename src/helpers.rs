//! Name normalization and company identity helpers.
//!
//! Company IDs are stable slugs derived from the display name. The slug
//! never changes once assigned, even if the display name is later corrected;
//! lookups therefore go through `normalize_name` so spelling variants of the
//! same company collapse onto one row.

use chrono::{DateTime, Utc};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Normalize a company name for fuzzy matching: lowercase, diacritics and
/// punctuation stripped, `&` spelled out, whitespace and hyphens collapsed.
///
/// `normalize_name("Acme & Co.") == normalize_name("acme and co")`.
pub fn normalize_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.nfkd() {
        match c {
            '&' => out.push_str(" and "),
            '-' | '_' | '/' => out.push(' '),
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            c if c.is_whitespace() => out.push(' '),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the canonical company id (slug) from a display name.
pub fn company_slug(name: &str) -> String {
    normalize_name(name).replace(' ', "-")
}

/// Extract a company name from free-text content (typically a recruiter
/// message). Looks for a labelled `Company name:` / `Company:` line.
pub fn extract_company_name(content: &str) -> Option<String> {
    let re = Regex::new(r"(?im)^\s*company(?:\s+name)?\s*[:\-]\s*(.+?)\s*$").ok()?;
    let captures = re.captures(content)?;
    let name = captures
        .get(1)?
        .as_str()
        .trim_matches(|c: char| c == '"' || c == '\'');
    if normalize_name(name).is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// Synthesize a placeholder display name when no usable company name could
/// be extracted. Microsecond resolution keeps concurrent placeholders unique.
pub fn placeholder_name(now: DateTime<Utc>) -> String {
    format!("<UNKNOWN {}>", now.timestamp_micros())
}

/// Whether a display name is a synthesized placeholder.
pub fn is_placeholder_name(name: &str) -> bool {
    name.starts_with("<UNKNOWN ")
}
