//! Author model and author-string parsing.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ANGLE_EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^>]+@[^>]+)>").expect("valid angle email regex"));
static BARE_EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid bare email regex"));

/// Author record keyed by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub email: String,
    /// Best-effort display name; may be empty.
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Author {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Display form, `Name <email>` when both parts are known.
    pub fn display(&self) -> String {
        format_author(&self.name, &self.email)
    }
}

/// Splits an author string into `(name, email)`.
///
/// - `"Name <email@x>"` -> `("Name", "email@x")`
/// - `"email@x"` -> `("", "email@x")`
/// - `"Name"` -> `("Name", "")`
pub fn parse_author(author: &str) -> (String, String) {
    let author = author.trim();

    if let Some(captures) = ANGLE_EMAIL_RE.captures(author) {
        if let (Some(whole), Some(email)) = (captures.get(0), captures.get(1)) {
            let name = author.replacen(whole.as_str(), "", 1);
            return (name.trim().to_string(), email.as_str().trim().to_string());
        }
    }

    if BARE_EMAIL_RE.is_match(author) {
        return (String::new(), author.to_string());
    }

    (author.to_string(), String::new())
}

/// Inverse of [`parse_author`] for display.
pub fn format_author(name: &str, email: &str) -> String {
    match (name.is_empty(), email.is_empty()) {
        (_, true) => name.to_string(),
        (true, false) => email.to_string(),
        (false, false) => format!("{name} <{email}>"),
    }
}

/// Result of normalizing a document's author list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedAuthors {
    /// Identifiers to store on the document, in input order.
    pub identifiers: Vec<String>,
    /// Authors resolved to an email, to be upserted into the author store.
    pub resolved: Vec<Author>,
}

/// Normalizes raw author strings into document identifiers.
///
/// Empty entries are dropped and duplicates keep their first position.
pub fn normalize_authors<S: AsRef<str>>(authors: &[S]) -> NormalizedAuthors {
    let mut normalized = NormalizedAuthors::default();
    for raw in authors {
        let (name, email) = parse_author(raw.as_ref());
        let identifier = if email.is_empty() {
            name.clone()
        } else {
            email.clone()
        };
        if identifier.is_empty() || normalized.identifiers.contains(&identifier) {
            continue;
        }
        normalized.identifiers.push(identifier);
        if !email.is_empty() {
            normalized.resolved.push(Author::new(email, name));
        }
    }
    normalized
}

/// Splits comma-separated author input, dropping blanks.
pub fn split_author_input(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{format_author, normalize_authors, parse_author, split_author_input};

    fn pair(name: &str, email: &str) -> (String, String) {
        (name.to_string(), email.to_string())
    }

    #[test]
    fn parse_author_handles_all_three_forms() {
        assert_eq!(
            parse_author("Jane Doe <jane@example.com>"),
            pair("Jane Doe", "jane@example.com")
        );
        assert_eq!(
            parse_author("  jane@example.com "),
            pair("", "jane@example.com")
        );
        assert_eq!(parse_author("Jane Doe"), pair("Jane Doe", ""));
        assert_eq!(parse_author("<ops@example.com>"), pair("", "ops@example.com"));
    }

    #[test]
    fn format_author_inverts_parse() {
        for raw in ["Jane Doe <jane@example.com>", "jane@example.com", "Jane Doe"] {
            let (name, email) = parse_author(raw);
            assert_eq!(format_author(&name, &email), raw);
        }
    }

    #[test]
    fn normalize_prefers_email_and_keeps_first_occurrence() {
        let normalized = normalize_authors(&[
            "Jane Doe <jane@example.com>",
            "Bob",
            "jane@example.com",
            "  ",
        ]);
        assert_eq!(normalized.identifiers, vec!["jane@example.com", "Bob"]);
        assert_eq!(normalized.resolved.len(), 1);
        assert_eq!(normalized.resolved[0].name, "Jane Doe");
    }

    #[test]
    fn split_author_input_drops_blanks() {
        assert_eq!(
            split_author_input("a@x.io, Bob ,,"),
            vec!["a@x.io".to_string(), "Bob".to_string()]
        );
    }
}
