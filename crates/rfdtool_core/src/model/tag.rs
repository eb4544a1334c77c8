//! Tag model and tag-name normalization.
//!
//! # Invariants
//! - Tag names are lowercase, hyphen-separated, with no leading, trailing or
//!   repeated hyphens.
//! - `rfds` is kept sorted and free of duplicates.
//! - A tag record outlives its last reference; only its id list shrinks.

use crate::model::rfd::RfdId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reverse-index record: one tag and the documents referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub rfds: Vec<RfdId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Tag {
    /// Creates an empty tag record; timestamps are assigned by the store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rfds: Vec::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Adds `id` at its sorted position. Returns `false` when already present.
    pub fn insert_rfd(&mut self, id: RfdId) -> bool {
        match self.rfds.binary_search(&id) {
            Ok(_) => false,
            Err(position) => {
                self.rfds.insert(position, id);
                true
            }
        }
    }

    /// Removes `id`. Returns `false` when it was not referenced.
    pub fn remove_rfd(&mut self, id: RfdId) -> bool {
        let before = self.rfds.len();
        self.rfds.retain(|existing| *existing != id);
        self.rfds.len() != before
    }

    pub fn references(&self, id: RfdId) -> bool {
        self.rfds.contains(&id)
    }
}

/// Normalizes one tag value.
///
/// Returns `None` when nothing meaningful remains.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let mut normalized = String::with_capacity(tag.len());
    for ch in tag.trim().chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_whitespace() || ch == '_' {
            '-'
        } else {
            ch
        };
        if mapped == '-' && (normalized.is_empty() || normalized.ends_with('-')) {
            continue;
        }
        normalized.push(mapped);
    }
    while normalized.ends_with('-') {
        normalized.pop();
    }

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalizes, deduplicates and sorts tag values, dropping empties.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        if let Some(value) = normalize_tag(tag.as_ref()) {
            unique.insert(value);
        }
    }
    unique.into_iter().collect()
}

/// Splits comma-separated user input into tags.
///
/// An empty or blank input yields an empty list.
pub fn split_tag_input(input: &str) -> Vec<String> {
    normalize_tags(&input.split(',').collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::{normalize_tag, normalize_tags, split_tag_input, Tag};
    use crate::model::rfd::RfdId;

    fn id(value: u32) -> RfdId {
        RfdId::new(value).unwrap()
    }

    #[test]
    fn normalize_maps_separators_and_collapses_hyphens() {
        assert_eq!(normalize_tag("Foo Bar").as_deref(), Some("foo-bar"));
        assert_eq!(normalize_tag("  foo__bar  ").as_deref(), Some("foo-bar"));
        assert_eq!(normalize_tag("--Foo - Bar--").as_deref(), Some("foo-bar"));
        assert_eq!(normalize_tag("a\tb").as_deref(), Some("a-b"));
        assert_eq!(normalize_tag(" - _ "), None);
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Foo Bar",
            "__x__y__",
            "ALREADY-normal",
            "  spaced   out  ",
            "mixed_-_Separators",
            "ünïcode Tag",
            "-",
        ];
        for sample in samples {
            let once = normalize_tag(sample);
            let twice = once.as_deref().and_then(normalize_tag);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
            if let Some(value) = once {
                assert_eq!(value, value.to_lowercase());
                assert!(!value.starts_with('-') && !value.ends_with('-'));
                assert!(!value.contains("--"));
                assert!(!value.contains(' '));
            }
        }
    }

    #[test]
    fn normalize_tags_dedups_equivalent_spellings() {
        let tags = normalize_tags(&["Foo Bar", "foo-bar", "", "api"]);
        assert_eq!(tags, vec!["api".to_string(), "foo-bar".to_string()]);
    }

    #[test]
    fn split_tag_input_treats_empty_as_no_tags() {
        assert!(split_tag_input("").is_empty());
        assert!(split_tag_input(" , ").is_empty());
        assert_eq!(split_tag_input("infra, Storage"), vec!["infra", "storage"]);
    }

    #[test]
    fn tag_inserts_sorted_and_ignores_duplicates() {
        let mut tag = Tag::new("infra");
        assert!(tag.insert_rfd(id(12)));
        assert!(tag.insert_rfd(id(3)));
        assert!(!tag.insert_rfd(id(12)));
        assert_eq!(tag.rfds, vec![id(3), id(12)]);
        assert!(tag.remove_rfd(id(3)));
        assert!(!tag.remove_rfd(id(3)));
        assert_eq!(tag.rfds, vec![id(12)]);
    }
}
