//! Git-backed authoring flows.
//!
//! # Responsibility
//! - Create new RFDs in the source repository and ingest them locally.
//! - Write discussion links back into existing RFD files.
//!
//! # Invariants
//! - Each invocation works in its own temporary clone.
//! - Remote failures are fatal to the invocation and never retried here.
//! - A create that ingested but failed to push keeps the local record; the
//!   store is then ahead of the remote until the next successful push.

pub mod discussion;
pub mod front_matter;
pub mod git;
pub mod pipeline;

use crate::model::rfd::{RfdId, RfdValidationError};
use crate::render::RenderError;
use crate::repo::StoreError;
use git::{CommitIdentity, GitError, GitRemote};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub use discussion::{DiscussionWriteOutcome, DiscussionWriter, GitDiscussionWriter};
pub use front_matter::TemplateOverlay;
pub use pipeline::{AuthoringPipeline, PipelineFailure, PipelineOutcome, PipelineState};

pub type AuthoringResult<T> = Result<T, AuthoringError>;

#[derive(Debug)]
pub enum AuthoringError {
    Validation(RfdValidationError),
    Remote(GitError),
    Render(RenderError),
    Store(StoreError),
    Io(std::io::Error),
}

impl Display for AuthoringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Remote(err) => write!(f, "remote failure: {err}"),
            Self::Render(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AuthoringError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Remote(err) => Some(err),
            Self::Render(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<RfdValidationError> for AuthoringError {
    fn from(value: RfdValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<GitError> for AuthoringError {
    fn from(value: GitError) -> Self {
        Self::Remote(value)
    }
}

impl From<git2::Error> for AuthoringError {
    fn from(value: git2::Error) -> Self {
        Self::Remote(GitError::Git(value))
    }
}

impl From<RenderError> for AuthoringError {
    fn from(value: RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<StoreError> for AuthoringError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<std::io::Error> for AuthoringError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Repository layout and identity shared by the authoring flows.
#[derive(Debug, Clone)]
pub struct AuthoringSettings {
    pub remote: GitRemote,
    /// Folder holding one sub-folder per RFD.
    pub folder: String,
    /// Template path relative to the repository root.
    pub template_file: String,
    pub commit_author: CommitIdentity,
}

impl AuthoringSettings {
    /// Path of an RFD's source file relative to the repository root.
    pub fn document_path(&self, id: RfdId) -> PathBuf {
        let mut path = PathBuf::new();
        let folder = self.folder.trim_matches('/');
        if !folder.is_empty() {
            path.push(folder);
        }
        path.push(id.to_string());
        path.push("README.md");
        path
    }
}
