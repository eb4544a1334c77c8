//! Secondary index maintenance for tags and authors.
//!
//! # Responsibility
//! - Normalize document tags and authors before persistence.
//! - Keep tag back-references in step with document mutations.
//! - Rebuild the tag index from documents on demand.
//!
//! # Invariants
//! - The document is written first; tag and author writes follow in their
//!   own transactions, so a crash can only leave a document missing from a
//!   tag it lists.
//! - Tag records are never deleted; removing the last reference prunes the
//!   id list only.

use crate::model::author::normalize_authors;
use crate::model::rfd::{Rfd, RfdId};
use crate::model::tag::{normalize_tags, Tag};
use crate::repo::{DocumentStore, StoreError, StoreResult};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// How a document that does not exist yet is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// The id must be the allocator's next id.
    Sequential,
    /// The id comes from an external numbering; the allocator catches up.
    Import,
}

/// Result of [`IndexService::create_or_update`].
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// Document as persisted.
    pub rfd: Rfd,
    /// Stored version before this call, `None` for a create.
    pub previous: Option<Rfd>,
}

impl IndexOutcome {
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }
}

/// Counts produced by [`IndexService::rebuild_tag_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndexReport {
    pub tags_created: usize,
    pub tags_updated: usize,
    pub references_added: usize,
    pub references_removed: usize,
}

#[derive(Clone)]
pub struct IndexService {
    store: Arc<dyn DocumentStore>,
}

impl IndexService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Writes `rfd` and brings tag and author indices in line with it.
    ///
    /// In `Import` mode existing ids are updated in place. A `Sequential`
    /// call on a stored id fails with `IdentifierConflict`.
    pub fn create_or_update(&self, rfd: &Rfd, mode: CreateMode) -> StoreResult<IndexOutcome> {
        let started_at = Instant::now();
        let mut normalized = rfd.clone();
        normalized.tags = normalize_tags(&rfd.tags);
        let authors = normalize_authors(&rfd.authors);
        normalized.authors = authors.identifiers;

        let previous = self.store.get_rfd(normalized.id)?;
        let stored = match (&previous, mode) {
            // A sequential create never lands on a stored id; another writer
            // claimed it first.
            (Some(_), CreateMode::Sequential) => {
                return Err(StoreError::IdentifierConflict {
                    expected: self.store.next_rfd_id()?,
                    actual: normalized.id,
                })
            }
            (Some(_), CreateMode::Import) => self.store.update_rfd(&normalized)?,
            (None, CreateMode::Sequential) => self.store.create_rfd(&normalized)?,
            (None, CreateMode::Import) => self.store.import_rfd(&normalized)?,
        };

        for author in &authors.resolved {
            self.store.upsert_author(author)?;
        }

        let old_tags: BTreeSet<String> = previous
            .as_ref()
            .map(|old| normalize_tags(&old.tags).into_iter().collect())
            .unwrap_or_default();
        let new_tags: BTreeSet<String> = stored.tags.iter().cloned().collect();

        let mut removed = 0;
        for name in old_tags.difference(&new_tags) {
            if self.remove_reference(name, stored.id)? {
                removed += 1;
            }
        }
        let mut added = 0;
        for name in new_tags.difference(&old_tags) {
            if self.add_reference(name, stored.id)? {
                added += 1;
            }
        }

        info!(
            "event=index_update module=index status=ok id={} created={} tags_added={} tags_removed={} duration_ms={}",
            stored.id,
            previous.is_none(),
            added,
            removed,
            started_at.elapsed().as_millis()
        );
        Ok(IndexOutcome {
            rfd: stored,
            previous,
        })
    }

    /// Recomputes every tag's id list from the stored documents.
    ///
    /// Adds missing back-references, creates tags that were never written
    /// and prunes ids of documents that no longer list the tag or no longer
    /// exist.
    pub fn rebuild_tag_index(&self) -> StoreResult<TagIndexReport> {
        let started_at = Instant::now();
        info!("event=tag_index_rebuild module=index status=start");

        let mut expected: BTreeMap<String, BTreeSet<RfdId>> = BTreeMap::new();
        for rfd in self.store.get_rfds()? {
            for name in normalize_tags(&rfd.tags) {
                expected.entry(name).or_default().insert(rfd.id);
            }
        }

        let mut report = TagIndexReport::default();
        for mut tag in self.store.get_tags()? {
            let wanted = expected.remove(&tag.name).unwrap_or_default();
            let current: BTreeSet<RfdId> = tag.rfds.iter().copied().collect();
            if current == wanted {
                continue;
            }
            report.references_added += wanted.difference(&current).count();
            report.references_removed += current.difference(&wanted).count();
            tag.rfds = wanted.into_iter().collect();
            self.store.update_tag(&tag)?;
            report.tags_updated += 1;
        }

        for (name, ids) in expected {
            let mut tag = Tag::new(name);
            report.references_added += ids.len();
            tag.rfds = ids.into_iter().collect();
            self.store.create_tag(&tag)?;
            report.tags_created += 1;
        }

        info!(
            "event=tag_index_rebuild module=index status=ok created={} updated={} added={} removed={} duration_ms={}",
            report.tags_created,
            report.tags_updated,
            report.references_added,
            report.references_removed,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn add_reference(&self, name: &str, id: RfdId) -> StoreResult<bool> {
        if let Some(mut tag) = self.store.get_tag(name)? {
            if !tag.insert_rfd(id) {
                return Ok(false);
            }
            self.store.update_tag(&tag)?;
            return Ok(true);
        }

        let mut tag = Tag::new(name);
        tag.insert_rfd(id);
        match self.store.create_tag(&tag) {
            Ok(_) => Ok(true),
            Err(StoreError::TagExists(_)) => {
                // Lost a creation race; merge into the winner's record.
                warn!(
                    "event=tag_create module=index status=retry tag={} id={}",
                    name, id
                );
                let mut existing = self
                    .store
                    .get_tag(name)?
                    .ok_or_else(|| StoreError::TagNotFound(name.to_string()))?;
                if existing.insert_rfd(id) {
                    self.store.update_tag(&existing)?;
                }
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    fn remove_reference(&self, name: &str, id: RfdId) -> StoreResult<bool> {
        let Some(mut tag) = self.store.get_tag(name)? else {
            return Ok(false);
        };
        if !tag.remove_rfd(id) {
            return Ok(false);
        }
        self.store.update_tag(&tag)?;
        Ok(true)
    }
}
