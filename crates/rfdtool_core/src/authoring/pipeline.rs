//! RFD creation state machine.
//!
//! `Init -> Cloned -> BranchCreated -> TemplateRead -> FileWritten ->
//! Committed -> Ingested -> Pushed -> Done`, with `Failed` reachable from
//! every state. Ingestion happens before the push, so a push failure leaves
//! the local record in place.

use super::front_matter::{materialize, TemplateOverlay};
use super::git::{commit_paths, create_branch, workdir, GitError};
use super::{AuthoringError, AuthoringSettings};
use crate::model::rfd::{Rfd, RfdId, RfdValidationError};
use crate::render::Renderer;
use crate::repo::DocumentStore;
use crate::service::index_service::{CreateMode, IndexService};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Cloned,
    BranchCreated,
    TemplateRead,
    FileWritten,
    Committed,
    Ingested,
    Pushed,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Cloned => "cloned",
            Self::BranchCreated => "branch_created",
            Self::TemplateRead => "template_read",
            Self::FileWritten => "file_written",
            Self::Committed => "committed",
            Self::Ingested => "ingested",
            Self::Pushed => "pushed",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed creation and the last state it reached.
#[derive(Debug)]
pub struct PipelineFailure {
    pub state: PipelineState,
    /// Id the run was working on, when one had been allocated.
    pub id: Option<RfdId>,
    pub error: AuthoringError,
}

impl PipelineFailure {
    /// Whether the document reached the local store before failing.
    pub fn ingested(&self) -> bool {
        self.state == PipelineState::Ingested
    }
}

impl Display for PipelineFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "creating rfd {id} failed after {}: {}", self.state, self.error),
            None => write!(f, "creating rfd failed after {}: {}", self.state, self.error),
        }
    }
}

impl Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub rfd: Rfd,
    /// States visited, `Init` first and `Done` last.
    pub trail: Vec<PipelineState>,
}

struct Tracker {
    run_id: Uuid,
    id: Option<RfdId>,
    state: PipelineState,
    trail: Vec<PipelineState>,
    started_at: Instant,
}

impl Tracker {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            id: None,
            state: PipelineState::Init,
            trail: vec![PipelineState::Init],
            started_at: Instant::now(),
        }
    }

    fn id_label(&self) -> String {
        self.id.map_or_else(|| "none".to_string(), |id| id.to_string())
    }

    fn advance(&mut self, next: PipelineState) {
        info!(
            "event=pipeline_transition module=authoring run_id={} id={} from={} to={} elapsed_ms={}",
            self.run_id,
            self.id_label(),
            self.state,
            next,
            self.started_at.elapsed().as_millis()
        );
        self.state = next;
        self.trail.push(next);
    }

    fn fail(&self, error: impl Into<AuthoringError>) -> PipelineFailure {
        let error = error.into();
        error!(
            "event=pipeline_transition module=authoring status=error run_id={} id={} from={} to={} elapsed_ms={} error={}",
            self.run_id,
            self.id_label(),
            self.state,
            PipelineState::Failed,
            self.started_at.elapsed().as_millis(),
            error
        );
        PipelineFailure {
            state: self.state,
            id: self.id,
            error,
        }
    }
}

/// Creates RFDs in the source repository and ingests them.
pub struct AuthoringPipeline {
    settings: AuthoringSettings,
    store: Arc<dyn DocumentStore>,
    index: IndexService,
    renderer: Arc<dyn Renderer>,
}

impl AuthoringPipeline {
    pub fn new(
        settings: AuthoringSettings,
        store: Arc<dyn DocumentStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let index = IndexService::new(store.clone());
        Self {
            settings,
            store,
            index,
            renderer,
        }
    }

    pub fn settings(&self) -> &AuthoringSettings {
        &self.settings
    }

    /// Runs one creation from clone to push.
    ///
    /// The id is the allocator's next id at the start of the run; a
    /// concurrent run that wins the id makes this one fail at ingestion
    /// with an identifier conflict, before anything is pushed.
    pub fn create(&self, overlay: &TemplateOverlay) -> Result<PipelineOutcome, PipelineFailure> {
        let mut tracker = Tracker::new();
        info!(
            "event=rfd_create module=authoring status=start run_id={}",
            tracker.run_id
        );

        if overlay.title.trim().is_empty() {
            return Err(tracker.fail(RfdValidationError::MissingTitle));
        }
        if overlay.authors.trim().is_empty() {
            return Err(tracker.fail(RfdValidationError::MissingField("authors")));
        }

        let id = self.store.next_rfd_id().map_err(|err| tracker.fail(err))?;
        tracker.id = Some(id);
        let branch = id.to_string();
        let remote = &self.settings.remote;

        let checkout = tempfile::tempdir().map_err(|err| tracker.fail(err))?;
        let repo = remote
            .clone_branch(&remote.main_branch, checkout.path())
            .map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::Cloned);

        let taken = remote
            .branch_exists(&branch)
            .map_err(|err| tracker.fail(err))?;
        if taken {
            return Err(tracker.fail(GitError::BranchExists(branch)));
        }
        create_branch(&repo, &branch).map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::BranchCreated);

        let root = workdir(&repo).map_err(|err| tracker.fail(err))?.to_path_buf();
        let template = std::fs::read_to_string(root.join(&self.settings.template_file))
            .map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::TemplateRead);

        let source = materialize(&template, overlay).map_err(|err| tracker.fail(err))?;
        let relative = self.settings.document_path(id);
        let absolute = root.join(&relative);
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent).map_err(|err| tracker.fail(err))?;
        }
        std::fs::write(&absolute, source).map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::FileWritten);

        let message = format!("Creating RFD {id}");
        commit_paths(
            &repo,
            &[relative.as_path()],
            &message,
            &self.settings.commit_author,
        )
        .map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::Committed);

        let written = std::fs::read_to_string(&absolute).map_err(|err| tracker.fail(err))?;
        let rendered = self
            .renderer
            .render(id, &written)
            .map_err(|err| tracker.fail(err))?;
        let outcome = self
            .index
            .create_or_update(&rendered, CreateMode::Sequential)
            .map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::Ingested);

        remote
            .push_branch(&repo, &branch)
            .map_err(|err| tracker.fail(err))?;
        tracker.advance(PipelineState::Pushed);
        tracker.advance(PipelineState::Done);

        info!(
            "event=rfd_create module=authoring status=ok run_id={} id={} duration_ms={}",
            tracker.run_id,
            id,
            tracker.started_at.elapsed().as_millis()
        );
        Ok(PipelineOutcome {
            rfd: outcome.rfd,
            trail: tracker.trail,
        })
    }
}
