//! Document store contract and its persistence implementations.
//!
//! # Responsibility
//! - Define the storage contract shared by the sled and relational
//!   backends.
//! - Keep engine details (buckets, SQL) behind that contract.
//!
//! # Invariants
//! - Every operation runs in its own short-lived transaction.
//! - Sequential create checks the id, writes the document and advances the
//!   allocator atomically.
//! - Lookup misses are `Ok(None)`, never errors.
//! - Documents are never deleted.

pub mod kv_store;
pub mod sqlite_store;

use crate::model::author::Author;
use crate::model::rfd::{Rfd, RfdId, RfdValidationError};
use crate::model::tag::Tag;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

pub use kv_store::KvDocumentStore;
pub use sqlite_store::SqliteDocumentStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store error for document, tag, author and allocator operations.
#[derive(Debug)]
pub enum StoreError {
    Validation(RfdValidationError),
    /// Sequential create used an id other than the allocator's next id.
    IdentifierConflict { expected: RfdId, actual: RfdId },
    /// Import targeted an id that is already stored.
    AlreadyExists(RfdId),
    /// Update targeted an id that is not stored.
    NotFound(RfdId),
    /// Create targeted a tag name that is already stored.
    TagExists(String),
    /// Update targeted a tag name that is not stored.
    TagNotFound(String),
    Kv(sled::Error),
    Sqlite(rusqlite::Error),
    /// The relational store was written by a newer schema than this build
    /// knows.
    SchemaTooNew { found: u32, supported: u32 },
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::IdentifierConflict { expected, actual } => write!(
                f,
                "invalid rfd id {actual}; use next available id {expected}"
            ),
            Self::AlreadyExists(id) => write!(f, "rfd already exists: {id}"),
            Self::NotFound(id) => write!(f, "rfd not found: {id}"),
            Self::TagExists(name) => write!(f, "tag already exists: {name}"),
            Self::TagNotFound(name) => write!(f, "tag not found: {name}"),
            Self::Kv(err) => write!(f, "{err}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "rfd database schema {found} is newer than this build supports ({supported})"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Kv(err) => Some(err),
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RfdValidationError> for StoreError {
    fn from(value: RfdValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<sled::Error> for StoreError {
    fn from(value: sled::Error) -> Self {
        Self::Kv(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Storage contract implemented identically by every backend.
pub trait DocumentStore: Send + Sync {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    /// Verifies the underlying engine is usable.
    fn check(&self) -> StoreResult<()>;

    /// Returns all documents by ascending id.
    fn get_rfds(&self) -> StoreResult<Vec<Rfd>>;
    fn get_rfd(&self, id: RfdId) -> StoreResult<Option<Rfd>>;
    /// Returns documents whose `authors` contain exactly `author`.
    fn get_rfds_by_author(&self, author: &str) -> StoreResult<Vec<Rfd>>;
    /// Sequential create: `rfd.id` must equal the allocator's next id.
    fn create_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd>;
    /// Import create: any unused id; the allocator is raised past it.
    fn import_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd>;
    /// Overwrites a stored document and refreshes `modified_at`.
    fn update_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd>;

    fn next_rfd_id(&self) -> StoreResult<RfdId>;
    /// Raises the allocator past the highest stored id when it has drifted.
    ///
    /// Returns the effective next id.
    fn ensure_allocator_consistency(&self) -> StoreResult<RfdId>;

    /// Returns all tags sorted by name.
    fn get_tags(&self) -> StoreResult<Vec<Tag>>;
    fn get_tag(&self, name: &str) -> StoreResult<Option<Tag>>;
    /// Fails with [`StoreError::TagExists`] when the name is taken.
    fn create_tag(&self, tag: &Tag) -> StoreResult<Tag>;
    fn update_tag(&self, tag: &Tag) -> StoreResult<Tag>;

    fn get_authors(&self) -> StoreResult<Vec<Author>>;
    fn get_author(&self, email: &str) -> StoreResult<Option<Author>>;
    /// Inserts or merges an author, keeping a known name over an empty one.
    fn upsert_author(&self, author: &Author) -> StoreResult<Author>;
}

/// Available storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded `sled` engine.
    #[default]
    Kv,
    /// Relational SQLite engine.
    Sqlite,
}

impl BackendKind {
    /// Store file or directory name inside the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Kv => "rfd.sled",
            Self::Sqlite => "rfd.db",
        }
    }
}

/// Opens the configured backend under `data_path`.
pub fn open_store(kind: BackendKind, data_path: &Path) -> StoreResult<Arc<dyn DocumentStore>> {
    let path = data_path.join(kind.file_name());
    let store: Arc<dyn DocumentStore> = match kind {
        BackendKind::Kv => Arc::new(KvDocumentStore::open(path)?),
        BackendKind::Sqlite => Arc::new(SqliteDocumentStore::open(path)?),
    };
    Ok(store)
}

/// Keeps only documents listing `author` exactly.
pub(crate) fn filter_exact_author(rfds: Vec<Rfd>, author: &str) -> Vec<Rfd> {
    rfds.into_iter()
        .filter(|rfd| rfd.authors.iter().any(|candidate| candidate == author))
        .collect()
}
