//! Discussion-link write-back into the source repository.

use super::front_matter::set_discussion;
use super::git::{commit_paths, workdir};
use super::{AuthoringResult, AuthoringSettings};
use crate::model::rfd::RfdId;
use log::{error, info};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscussionWriteOutcome {
    /// A commit carrying the link was pushed to `branch`.
    Pushed { branch: String },
    /// The file already carried the link; nothing was committed.
    Unchanged { branch: String },
}

impl DiscussionWriteOutcome {
    pub fn branch(&self) -> &str {
        match self {
            Self::Pushed { branch } | Self::Unchanged { branch } => branch,
        }
    }

    pub fn pushed(&self) -> bool {
        matches!(self, Self::Pushed { .. })
    }
}

/// Patches the discussion link of an existing RFD at its source.
pub trait DiscussionWriter: Send + Sync {
    fn write_discussion(&self, id: RfdId, url: &str) -> AuthoringResult<DiscussionWriteOutcome>;
}

/// Writes discussion links through a fresh clone of the remote.
///
/// Targets the RFD's own branch while it exists on the remote and the main
/// branch once it has been merged or deleted.
pub struct GitDiscussionWriter {
    settings: AuthoringSettings,
}

impl GitDiscussionWriter {
    pub fn new(settings: AuthoringSettings) -> Self {
        Self { settings }
    }

    fn write(&self, id: RfdId, url: &str) -> AuthoringResult<DiscussionWriteOutcome> {
        let remote = &self.settings.remote;
        let rfd_branch = id.to_string();
        let branch = if remote.branch_exists(&rfd_branch)? {
            rfd_branch
        } else {
            remote.main_branch.clone()
        };

        let checkout = tempfile::tempdir()?;
        let repo = remote.clone_branch(&branch, checkout.path())?;
        let relative = self.settings.document_path(id);
        let absolute = workdir(&repo)?.join(&relative);

        let source = std::fs::read_to_string(&absolute)?;
        let Some(updated) = set_discussion(&source, url)? else {
            return Ok(DiscussionWriteOutcome::Unchanged { branch });
        };
        std::fs::write(&absolute, updated)?;

        let message = format!("Adding discussion link to RFD {id}");
        commit_paths(
            &repo,
            &[relative.as_path()],
            &message,
            &self.settings.commit_author,
        )?;
        remote.push_branch(&repo, &branch)?;
        Ok(DiscussionWriteOutcome::Pushed { branch })
    }
}

impl DiscussionWriter for GitDiscussionWriter {
    fn write_discussion(&self, id: RfdId, url: &str) -> AuthoringResult<DiscussionWriteOutcome> {
        let started_at = Instant::now();
        info!("event=discussion_writeback module=authoring status=start id={}", id);
        let result = self.write(id, url);
        match &result {
            Ok(outcome) => info!(
                "event=discussion_writeback module=authoring status=ok id={} branch={} pushed={} duration_ms={}",
                id,
                outcome.branch(),
                outcome.pushed(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=discussion_writeback module=authoring status=error id={} duration_ms={} error={}",
                id,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}
