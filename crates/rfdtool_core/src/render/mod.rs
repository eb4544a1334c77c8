//! Source-file rendering into canonical documents.
//!
//! # Responsibility
//! - Parse the front-matter block into document metadata.
//! - Convert the markdown body into HTML content.
//!
//! # Invariants
//! - Rendering is pure: no store or network access.
//! - A missing title or an unknown state fails rendering; nothing is
//!   coerced.
//!
//! # See also
//! - `authoring::front_matter` for template and discussion-link rewrites.

pub mod front_matter;
pub mod markdown;

use crate::model::rfd::{Rfd, RfdId, RfdState, RfdValidationError};
use front_matter::{split_document, FrontMatter};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug)]
pub enum RenderError {
    /// The source does not start with a `---` line.
    MissingFrontMatter,
    /// The opening `---` has no closing line.
    UnterminatedFrontMatter,
    Yaml(serde_yaml::Error),
    Validation(RfdValidationError),
    Io(std::io::Error),
}

impl Display for RenderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFrontMatter => write!(f, "document has no front-matter block"),
            Self::UnterminatedFrontMatter => write!(f, "front-matter block is not terminated"),
            Self::Yaml(err) => write!(f, "malformed front-matter: {err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RenderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Yaml(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for RenderError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

impl From<RfdValidationError> for RenderError {
    fn from(value: RfdValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<std::io::Error> for RenderError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Turns raw source into a canonical document stamped with `id`.
pub trait Renderer: Send + Sync {
    fn render(&self, id: RfdId, source: &str) -> RenderResult<Rfd>;

    fn render_reader(&self, id: RfdId, reader: &mut dyn Read) -> RenderResult<Rfd> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.render(id, &source)
    }
}

/// Front-matter plus CommonMark renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, id: RfdId, source: &str) -> RenderResult<Rfd> {
        let split = split_document(source)?;
        let front = FrontMatter::parse(split.yaml)?;

        let title = front
            .title
            .filter(|title| !title.trim().is_empty())
            .ok_or(RfdValidationError::MissingField("title"))?;
        let state = match front.state.as_deref() {
            Some(raw) if !raw.trim().is_empty() => RfdState::parse(raw)?,
            _ => return Err(RfdValidationError::MissingField("state").into()),
        };

        let mut rfd = Rfd::new(id, title.trim(), state);
        rfd.authors = front.authors;
        rfd.tags = front.tags;
        rfd.discussion = front.discussion.unwrap_or_default();
        rfd.legacy_discussion = front.legacy_discussion.unwrap_or_default();
        rfd.content = markdown::to_html(split.body);
        rfd.content_md = split.body.to_string();
        Ok(rfd)
    }
}
