//! Core domain logic for rfdtool.
//! This crate is the single source of truth for RFD store, index, allocator
//! and authoring invariants.

pub mod allocator;
pub mod authoring;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod render;
pub mod repo;
pub mod service;
pub mod webhook;
pub mod writeback;

pub use authoring::{AuthoringPipeline, AuthoringSettings, PipelineFailure, TemplateOverlay};
pub use config::{Config, ConfigError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::author::{format_author, parse_author, Author};
pub use model::rfd::{Rfd, RfdId, RfdState, RfdValidationError};
pub use model::tag::{normalize_tag, Tag};
pub use render::{MarkdownRenderer, RenderError, RenderResult, Renderer};
pub use repo::{
    open_store, BackendKind, DocumentStore, KvDocumentStore, SqliteDocumentStore, StoreError,
    StoreResult,
};
pub use service::index_service::{CreateMode, IndexService, TagIndexReport};
pub use service::rfd_service::{
    ReconcileReport, RfdService, ServiceError, ServiceResult, SubmitOutcome,
};
pub use webhook::{WebhookClient, WebhookError, WebhookSettings};
pub use writeback::{JobStatus, WritebackQueue};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
