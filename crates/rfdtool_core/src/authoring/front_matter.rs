//! Template materialization and front-matter rewrites for RFD files.

use crate::model::author::split_author_input;
use crate::model::rfd::RfdState;
use crate::model::tag::split_tag_input;
use crate::render::front_matter::{join_document, split_document, FrontMatter};
use crate::render::RenderResult;

/// Caller-supplied values overlaid on the template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOverlay {
    pub title: String,
    /// Comma-separated author strings.
    pub authors: String,
    /// Comma-separated tags; blank means no tags.
    pub tags: String,
}

/// Builds a new RFD source from `template`.
///
/// The template's front-matter is replaced field by field, the state is
/// forced to `ideation`, any discussion link is cleared and the body is
/// kept as-is.
pub fn materialize(template: &str, overlay: &TemplateOverlay) -> RenderResult<String> {
    let split = split_document(template)?;
    let mut front = FrontMatter::parse(split.yaml)?;

    front.title = Some(overlay.title.trim().to_string());
    front.authors = split_author_input(&overlay.authors);
    front.tags = split_tag_input(&overlay.tags);
    front.state = Some(RfdState::Ideation.as_str().to_string());
    front.discussion = Some(String::new());

    join_document(&front, split.body)
}

/// Sets the discussion link in `source`.
///
/// Returns `None` when the file already carries `url`.
pub fn set_discussion(source: &str, url: &str) -> RenderResult<Option<String>> {
    let split = split_document(source)?;
    let mut front = FrontMatter::parse(split.yaml)?;
    if front.discussion.as_deref() == Some(url) {
        return Ok(None);
    }
    front.discussion = Some(url.to_string());
    join_document(&front, split.body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::{materialize, set_discussion, TemplateOverlay};
    use crate::model::rfd::{RfdId, RfdState};
    use crate::render::{MarkdownRenderer, Renderer};

    const TEMPLATE: &str = "---
title: Replace me
authors: Your Name <you@example.com>
state: prediscussion
discussion:
---

# Summary

Write here.
";

    #[test]
    fn materialize_overlays_fields_and_keeps_body() {
        let overlay = TemplateOverlay {
            title: " Storage engine ".to_string(),
            authors: "Ann <ann@example.com>, bob@example.com".to_string(),
            tags: "".to_string(),
        };
        let source = materialize(TEMPLATE, &overlay).unwrap();
        let rfd = MarkdownRenderer.render(RfdId::new(4).unwrap(), &source).unwrap();

        assert_eq!(rfd.title, "Storage engine");
        assert_eq!(rfd.state, RfdState::Ideation);
        assert_eq!(rfd.authors, vec!["Ann <ann@example.com>", "bob@example.com"]);
        assert!(rfd.tags.is_empty());
        assert!(rfd.discussion.is_empty());
        assert!(source.ends_with("---\n\n# Summary\n\nWrite here.\n"));
    }

    #[test]
    fn set_discussion_is_idempotent() {
        let url = "https://chat.example.com/d/4";
        let updated = set_discussion(TEMPLATE, url).unwrap().unwrap();
        let rfd = MarkdownRenderer.render(RfdId::FIRST, &updated).unwrap();
        assert_eq!(rfd.discussion, url);
        assert_eq!(set_discussion(&updated, url).unwrap(), None);
    }
}
