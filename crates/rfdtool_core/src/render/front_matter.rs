//! YAML front-matter block of an RFD source file.

use super::{RenderError, RenderResult};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Formatter};

const DELIMITER: &str = "---";

/// Metadata block at the top of an RFD README.
///
/// Unknown keys are kept in `extra` so rewriting a file does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub discussion: Option<String>,
    #[serde(
        default,
        alias = "legacyDiscussion",
        alias = "legacydiscussion",
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_discussion: Option<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl FrontMatter {
    pub fn parse(yaml: &str) -> RenderResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> RenderResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Source split into its front-matter YAML and markdown body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitDocument<'a> {
    pub yaml: &'a str,
    pub body: &'a str,
}

/// Splits `source` at the `---` delimited block on its first line.
///
/// Accepts `\n` and `\r\n` line endings and a leading byte-order mark.
pub fn split_document(source: &str) -> RenderResult<SplitDocument<'_>> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    let mut lines = source.split_inclusive('\n');
    let first = lines.next().ok_or(RenderError::MissingFrontMatter)?;
    if first.trim_end() != DELIMITER {
        return Err(RenderError::MissingFrontMatter);
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == DELIMITER {
            return Ok(SplitDocument {
                yaml: &source[yaml_start..offset],
                body: &source[offset + line.len()..],
            });
        }
        offset += line.len();
    }
    Err(RenderError::UnterminatedFrontMatter)
}

/// Reassembles a source file from front-matter and body.
pub fn join_document(front_matter: &FrontMatter, body: &str) -> RenderResult<String> {
    let yaml = front_matter.to_yaml()?;
    let mut output = String::with_capacity(yaml.len() + body.len() + 8);
    output.push_str(DELIMITER);
    output.push('\n');
    output.push_str(&yaml);
    if !yaml.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(DELIMITER);
    output.push('\n');
    output.push_str(body);
    Ok(output)
}

/// A YAML scalar read as text, so `2024` and `"2024"` agree.
struct Text(String);

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TextVisitor;

        impl<'de> Visitor<'de> for TextVisitor {
            type Value = String;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str("a string or number")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(value.to_string())
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
                Ok(value)
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                Ok(value.to_string())
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(value.to_string())
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
                Ok(value.to_string())
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
                Ok(value.to_string())
            }
        }

        deserializer.deserialize_any(TextVisitor).map(Text)
    }
}

fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Text>::deserialize(deserializer)?.map(|text| text.0))
}

/// Accepts `null`, a comma-separated string, a lone number or a sequence of
/// strings and numbers.
fn list_or_csv<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    struct ListOrCsv;

    impl<'de> Visitor<'de> for ListOrCsv {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str("a list of strings or a comma-separated string")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<Option<Text>>()? {
                if let Some(Text(item)) = item.filter(|item| !item.0.trim().is_empty()) {
                    items.push(item);
                }
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(ListOrCsv)
}

#[cfg(test)]
mod tests {
    use super::{join_document, split_document, FrontMatter};
    use crate::render::RenderError;

    #[test]
    fn split_handles_crlf_and_bom() {
        let source = "\u{feff}---\r\ntitle: X\r\n---\r\nbody\r\n";
        let split = split_document(source).unwrap();
        assert_eq!(split.yaml, "title: X\r\n");
        assert_eq!(split.body, "body\r\n");
    }

    #[test]
    fn split_rejects_missing_and_unterminated_blocks() {
        assert!(matches!(
            split_document("# no front matter"),
            Err(RenderError::MissingFrontMatter)
        ));
        assert!(matches!(
            split_document("---\ntitle: X\n"),
            Err(RenderError::UnterminatedFrontMatter)
        ));
    }

    #[test]
    fn authors_and_tags_accept_lists_or_comma_strings() {
        let parsed = FrontMatter::parse(
            "title: T\nauthors: Ann <ann@example.com>, Bob\ntags: [a, '', b]\ndiscussion:\n",
        )
        .unwrap();
        assert_eq!(parsed.authors, vec!["Ann <ann@example.com>", "Bob"]);
        assert_eq!(parsed.tags, vec!["a", "b"]);
        assert_eq!(parsed.discussion, None);

        let empty = FrontMatter::parse("title: T\ntags: ''\n").unwrap();
        assert!(empty.tags.is_empty());
    }

    #[test]
    fn numeric_scalars_read_as_text() {
        let parsed =
            FrontMatter::parse("title: 2024
authors: [ann@example.com, 42]
tags: [2024, 3.5, api]
")
                .unwrap();
        assert_eq!(parsed.title.as_deref(), Some("2024"));
        assert_eq!(parsed.authors, vec!["ann@example.com", "42"]);
        assert_eq!(parsed.tags, vec!["2024", "3.5", "api"]);

        let lone = FrontMatter::parse("title: T
tags: 7
").unwrap();
        assert_eq!(lone.tags, vec!["7"]);
        let quoted = FrontMatter::parse("title: '2024'
").unwrap();
        assert_eq!(quoted.title, parsed.title);
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let source = "---\ntitle: T\nstate: ideation\nreviewers: [carol]\n---\n\nBody\n";
        let split = split_document(source).unwrap();
        let mut front = FrontMatter::parse(split.yaml).unwrap();
        front.discussion = Some("https://example.com/d/1".to_string());

        let rewritten = join_document(&front, split.body).unwrap();
        let reparsed = FrontMatter::parse(split_document(&rewritten).unwrap().yaml).unwrap();
        assert_eq!(reparsed.discussion.as_deref(), Some("https://example.com/d/1"));
        assert!(reparsed.extra.contains_key("reviewers"));
        assert!(rewritten.ends_with("---\n\nBody\n"));
    }
}
