//! RFD use-case service.
//!
//! # Responsibility
//! - Own the process-wide components (store, index, renderer, authoring
//!   pipeline, webhook client, write-back queue) as one explicit context.
//! - Run the create and create-or-update flows including discussion
//!   provisioning.
//!
//! # Invariants
//! - Webhook failures are logged and never fail a create or update; the
//!   document is already persisted when the webhook fires.
//! - A discussion URL returned by the webhook is stored before its git
//!   write-back is queued.
//! - Without a repo section the service is store-only and `create_rfd`
//!   fails with [`ServiceError::AuthoringDisabled`].

use crate::authoring::front_matter::TemplateOverlay;
use crate::authoring::{
    AuthoringPipeline, AuthoringSettings, DiscussionWriter, GitDiscussionWriter, PipelineFailure,
};
use crate::config::Config;
use crate::model::author::Author;
use crate::model::rfd::{Rfd, RfdId, RfdValidationError};
use crate::model::tag::{normalize_tag, Tag};
use crate::render::{MarkdownRenderer, RenderError, Renderer};
use crate::repo::{open_store, DocumentStore, StoreError};
use crate::service::index_service::{CreateMode, IndexService, TagIndexReport};
use crate::webhook::{WebhookClient, WebhookError, WebhookResponse, WebhookResult};
use crate::writeback::{JobId, WritebackQueue};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub enum ServiceError {
    Validation(RfdValidationError),
    Store(StoreError),
    Render(RenderError),
    /// The authoring pipeline failed; carries the state it reached.
    Pipeline(PipelineFailure),
    /// `create_rfd` was called without a configured source repository.
    AuthoringDisabled,
    Webhook(WebhookError),
    Io(std::io::Error),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "{err}"),
            Self::Pipeline(err) => write!(f, "{err}"),
            Self::AuthoringDisabled => {
                write!(f, "authoring is disabled: no source repository is configured")
            }
            Self::Webhook(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Render(err) => Some(err),
            Self::Pipeline(err) => Some(err),
            Self::Webhook(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::AuthoringDisabled => None,
        }
    }
}

impl From<RfdValidationError> for ServiceError {
    fn from(value: RfdValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RenderError> for ServiceError {
    fn from(value: RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<PipelineFailure> for ServiceError {
    fn from(value: PipelineFailure) -> Self {
        Self::Pipeline(value)
    }
}

impl From<WebhookError> for ServiceError {
    fn from(value: WebhookError) -> Self {
        Self::Webhook(value)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Result of [`RfdService::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Allocator value after repair.
    pub next_rfd: RfdId,
    pub tags: TagIndexReport,
}

/// Result of [`RfdService::create_or_update_rfd`].
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Document as finally stored, including a provisioned discussion link.
    pub rfd: Rfd,
    pub created: bool,
    /// Write-back job queued for a newly provisioned discussion link.
    pub writeback_job: Option<JobId>,
}

/// Assembles an [`RfdService`] from explicit parts.
pub struct RfdServiceBuilder {
    store: Arc<dyn DocumentStore>,
    renderer: Arc<dyn Renderer>,
    authoring: Option<AuthoringSettings>,
    webhook: Option<WebhookClient>,
    discussion_writer: Option<Arc<dyn DiscussionWriter>>,
}

impl RfdServiceBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Enables `create_rfd` and, unless a writer is set, git write-back.
    pub fn authoring(mut self, settings: AuthoringSettings) -> Self {
        self.authoring = Some(settings);
        self
    }

    pub fn webhook(mut self, client: WebhookClient) -> Self {
        self.webhook = Some(client);
        self
    }

    /// Overrides the writer used by the write-back queue.
    pub fn discussion_writer(mut self, writer: Arc<dyn DiscussionWriter>) -> Self {
        self.discussion_writer = Some(writer);
        self
    }

    /// Starts the write-back worker when a writer is available.
    pub fn build(self) -> ServiceResult<RfdService> {
        let writer = self.discussion_writer.or_else(|| {
            self.authoring.clone().map(|settings| {
                Arc::new(GitDiscussionWriter::new(settings)) as Arc<dyn DiscussionWriter>
            })
        });
        let writeback = writer.map(WritebackQueue::start).transpose()?;
        let pipeline = self.authoring.map(|settings| {
            AuthoringPipeline::new(settings, self.store.clone(), self.renderer.clone())
        });

        Ok(RfdService {
            index: IndexService::new(self.store.clone()),
            store: self.store,
            renderer: self.renderer,
            pipeline,
            webhook: self.webhook,
            writeback,
        })
    }
}

/// Process-wide RFD context.
pub struct RfdService {
    store: Arc<dyn DocumentStore>,
    index: IndexService,
    renderer: Arc<dyn Renderer>,
    pipeline: Option<AuthoringPipeline>,
    webhook: Option<WebhookClient>,
    writeback: Option<WritebackQueue>,
}

impl RfdService {
    pub fn builder(store: Arc<dyn DocumentStore>) -> RfdServiceBuilder {
        RfdServiceBuilder {
            store,
            renderer: Arc::new(MarkdownRenderer),
            authoring: None,
            webhook: None,
            discussion_writer: None,
        }
    }

    /// Opens the configured store, repairs its allocator and wires every
    /// configured component.
    pub fn from_config(config: &Config) -> ServiceResult<Self> {
        let started_at = Instant::now();
        info!(
            "event=service_open module=service status=start data_path={}",
            config.data_path.display()
        );

        let store = open_store(config.backend, &config.data_path).map_err(|err| {
            error!(
                "event=service_open module=service status=error stage=store error={}",
                err
            );
            err
        })?;
        store.check()?;
        let next = store.ensure_allocator_consistency()?;

        let mut builder = Self::builder(store);
        if let Some(settings) = config.authoring_settings() {
            builder = builder.authoring(settings);
        }
        if let Some(settings) = config.webhook_settings() {
            builder = builder.webhook(WebhookClient::new(settings, config.site.url.clone())?);
        }
        let service = builder.build()?;

        info!(
            "event=service_open module=service status=ok backend={} next_rfd={} authoring={} webhook={} duration_ms={}",
            service.store.backend(),
            next,
            service.pipeline.is_some(),
            service.webhook.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(service)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn writeback(&self) -> Option<&WritebackQueue> {
        self.writeback.as_ref()
    }

    pub fn authoring_enabled(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Authors a new RFD in the source repository, ingests it and provisions
    /// its discussion.
    pub fn create_rfd(&self, overlay: &TemplateOverlay) -> ServiceResult<SubmitOutcome> {
        let pipeline = self.pipeline.as_ref().ok_or(ServiceError::AuthoringDisabled)?;
        let outcome = pipeline.create(overlay)?;

        let response = self
            .webhook
            .as_ref()
            .map(|client| client.send_created(&outcome.rfd));
        let (rfd, writeback_job) = self.apply_webhook_response(outcome.rfd, response)?;
        Ok(SubmitOutcome {
            rfd,
            created: true,
            writeback_job,
        })
    }

    /// Ingests a rendered document under its own id.
    ///
    /// New ids take the import path; existing ids are updated in place and
    /// only announced when a tracked field changed.
    pub fn create_or_update_rfd(&self, rfd: &Rfd) -> ServiceResult<SubmitOutcome> {
        let started_at = Instant::now();
        rfd.validate()?;
        let outcome = self.index.create_or_update(rfd, CreateMode::Import)?;
        let created = outcome.created();

        let response = self.webhook.as_ref().and_then(|client| {
            if created {
                Some(client.send_created(&outcome.rfd))
            } else {
                let previous = outcome.previous.as_ref()?;
                client.send_updated(previous, &outcome.rfd).transpose()
            }
        });
        let (stored, writeback_job) = self.apply_webhook_response(outcome.rfd, response)?;

        info!(
            "event=rfd_submit module=service status=ok id={} created={} writeback={} duration_ms={}",
            stored.id,
            created,
            writeback_job.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(SubmitOutcome {
            rfd: stored,
            created,
            writeback_job,
        })
    }

    /// Renders `source` as RFD `id` and submits it.
    pub fn ingest_source(&self, id: RfdId, source: &mut dyn Read) -> ServiceResult<SubmitOutcome> {
        let rfd = self.renderer.render_reader(id, source)?;
        self.create_or_update_rfd(&rfd)
    }

    pub fn get_rfds(&self) -> ServiceResult<Vec<Rfd>> {
        Ok(self.store.get_rfds()?)
    }

    pub fn get_rfd(&self, id: RfdId) -> ServiceResult<Option<Rfd>> {
        Ok(self.store.get_rfd(id)?)
    }

    pub fn get_rfds_by_author(&self, author: &str) -> ServiceResult<Vec<Rfd>> {
        Ok(self.store.get_rfds_by_author(author)?)
    }

    /// Documents referenced by `tag`, in the tag's id order.
    ///
    /// Ids whose document no longer exists are skipped.
    pub fn get_rfds_by_tag(&self, tag: &str) -> ServiceResult<Vec<Rfd>> {
        let Some(name) = normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        let Some(tag) = self.store.get_tag(&name)? else {
            return Ok(Vec::new());
        };

        let mut rfds = Vec::with_capacity(tag.rfds.len());
        for id in tag.rfds {
            match self.store.get_rfd(id)? {
                Some(rfd) => rfds.push(rfd),
                None => warn!(
                    "event=tag_lookup module=service status=dangling tag={} id={}",
                    name, id
                ),
            }
        }
        Ok(rfds)
    }

    pub fn get_tags(&self) -> ServiceResult<Vec<Tag>> {
        Ok(self.store.get_tags()?)
    }

    pub fn get_tag(&self, name: &str) -> ServiceResult<Option<Tag>> {
        match normalize_tag(name) {
            Some(name) => Ok(self.store.get_tag(&name)?),
            None => Ok(None),
        }
    }

    pub fn get_authors(&self) -> ServiceResult<Vec<Author>> {
        Ok(self.store.get_authors()?)
    }

    pub fn get_author(&self, email: &str) -> ServiceResult<Option<Author>> {
        Ok(self.store.get_author(email.trim())?)
    }

    pub fn next_rfd_id(&self) -> ServiceResult<RfdId> {
        Ok(self.store.next_rfd_id()?)
    }

    /// Repairs allocator drift, then rebuilds the tag index from documents.
    pub fn reconcile(&self) -> ServiceResult<ReconcileReport> {
        let started_at = Instant::now();
        info!("event=reconcile module=service status=start");
        let next_rfd = self.store.ensure_allocator_consistency()?;
        let tags = self.index.rebuild_tag_index()?;
        info!(
            "event=reconcile module=service status=ok next_rfd={} tags_created={} tags_updated={} duration_ms={}",
            next_rfd,
            tags.tags_created,
            tags.tags_updated,
            started_at.elapsed().as_millis()
        );
        Ok(ReconcileReport { next_rfd, tags })
    }

    /// Drains pending write-backs and stops the worker.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.writeback {
            queue.shutdown();
        }
    }

    /// Stores a newly provisioned discussion URL and queues its write-back.
    ///
    /// Delivery errors were logged by the client and are dropped here.
    fn apply_webhook_response(
        &self,
        mut rfd: Rfd,
        response: Option<WebhookResult<WebhookResponse>>,
    ) -> ServiceResult<(Rfd, Option<JobId>)> {
        let url = match response {
            Some(Ok(response)) => response.discussion_url().map(str::to_string),
            Some(Err(err)) => {
                warn!(
                    "event=discussion_provision module=service status=skipped id={} reason=webhook_failed error={}",
                    rfd.id, err
                );
                None
            }
            None => None,
        };
        let Some(url) = url else {
            return Ok((rfd, None));
        };
        if url == rfd.discussion {
            return Ok((rfd, None));
        }

        rfd.discussion = url;
        let stored = self.store.update_rfd(&rfd)?;
        info!(
            "event=discussion_provision module=service status=ok id={}",
            stored.id
        );

        let job = match &self.writeback {
            Some(queue) => match queue.enqueue(stored.id, &stored.discussion) {
                Ok(job) => Some(job),
                Err(err) => {
                    error!(
                        "event=writeback_enqueue module=service status=error id={} error={}",
                        stored.id, err
                    );
                    None
                }
            },
            None => {
                warn!(
                    "event=writeback_enqueue module=service status=skipped id={} reason=no_repository",
                    stored.id
                );
                None
            }
        };
        Ok((stored, job))
    }
}

#[cfg(test)]
mod tests {
    use super::{RfdService, ServiceError};
    use crate::authoring::TemplateOverlay;
    use crate::model::rfd::{Rfd, RfdId, RfdState};
    use crate::model::tag::Tag;
    use crate::repo::{DocumentStore, KvDocumentStore};
    use std::sync::Arc;

    fn service() -> RfdService {
        let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
        RfdService::builder(store).build().unwrap()
    }

    fn rfd(id: u32, tags: &[&str]) -> Rfd {
        let mut rfd = Rfd::new(RfdId::new(id).unwrap(), format!("RFD {id}"), RfdState::Ideation);
        rfd.tags = tags.iter().map(|tag| tag.to_string()).collect();
        rfd
    }

    #[test]
    fn store_only_service_rejects_authoring() {
        let service = service();
        assert!(!service.authoring_enabled());
        assert!(service.writeback().is_none());
        let err = service.create_rfd(&TemplateOverlay::default()).unwrap_err();
        assert!(matches!(err, ServiceError::AuthoringDisabled));
    }

    #[test]
    fn submit_creates_then_updates() {
        let service = service();
        let first = service.create_or_update_rfd(&rfd(7, &["API"])).unwrap();
        assert!(first.created);
        assert_eq!(service.next_rfd_id().unwrap(), RfdId::new(8).unwrap());

        let mut changed = rfd(7, &["storage"]);
        changed.title = "Renamed".to_string();
        let second = service.create_or_update_rfd(&changed).unwrap();
        assert!(!second.created);
        assert_eq!(second.rfd.title, "Renamed");
        assert!(service.get_rfds_by_tag("api").unwrap().is_empty());
        assert_eq!(service.get_rfds_by_tag(" Storage ").unwrap().len(), 1);
    }

    #[test]
    fn tag_lookup_skips_dangling_ids() {
        let service = service();
        service.create_or_update_rfd(&rfd(1, &["db"])).unwrap();
        let mut tag = service.get_tag("db").unwrap().unwrap();
        tag.insert_rfd(RfdId::new(42).unwrap());
        service.store().update_tag(&tag).unwrap();

        let ids: Vec<RfdId> = service
            .get_rfds_by_tag("db")
            .unwrap()
            .into_iter()
            .map(|rfd| rfd.id)
            .collect();
        assert_eq!(ids, vec![RfdId::new(1).unwrap()]);

        let report = service.reconcile().unwrap();
        assert_eq!(report.tags.references_removed, 1);
        assert_eq!(
            service.get_tag("db").unwrap().map(|tag: Tag| tag.rfds),
            Some(vec![RfdId::new(1).unwrap()])
        );
    }
}
