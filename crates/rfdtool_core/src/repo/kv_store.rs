//! Document store on `sled`.
//!
//! # Responsibility
//! - Map documents, tags, authors and the allocator counter onto trees.
//! - Enforce the store contract inside sled transactions.
//!
//! # Invariants
//! - Document keys are the big-endian id, so tree order is numeric order.
//! - The allocator lives under `meta/nextRFD`; it only moves in the same
//!   transaction as the document write that moves it, or upward on repair.
//! - Every mutation is flushed before it returns.

use crate::allocator::{
    check_sequential, initial_next, reconcile_after_import, reconcile_after_scan, SequentialCheck,
};
use crate::model::author::Author;
use crate::model::rfd::{Rfd, RfdId};
use crate::model::tag::Tag;
use crate::repo::{filter_exact_author, DocumentStore, StoreError, StoreResult};
use chrono::Utc;
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use ConflictableTransactionError::Abort;
use std::path::Path;
use std::time::Instant;

const META_TREE: &str = "meta";
const RFD_TREE: &str = "rfds";
const TAG_TREE: &str = "tags";
const AUTHOR_TREE: &str = "authors";
const NEXT_RFD_KEY: &[u8] = b"nextRFD";

/// Sled backed document store.
pub struct KvDocumentStore {
    db: Db,
    meta: Tree,
    rfds: Tree,
    tags: Tree,
    authors: Tree,
}

impl KvDocumentStore {
    /// Opens or creates the store directory at `path`.
    ///
    /// Fails while another process holds the same store open.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let started_at = Instant::now();
        info!(
            "event=kv_open module=repo backend=kv status=start path={}",
            path.display()
        );
        let result = sled::Config::new()
            .path(path)
            .open()
            .map_err(StoreError::from)
            .and_then(Self::with_db);
        match &result {
            Ok(_) => info!(
                "event=kv_open module=repo backend=kv status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=kv_open module=repo backend=kv status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    /// Opens a throwaway store removed when dropped.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_db(sled::Config::new().temporary(true).open()?)
    }

    fn with_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            meta: db.open_tree(META_TREE)?,
            rfds: db.open_tree(RFD_TREE)?,
            tags: db.open_tree(TAG_TREE)?,
            authors: db.open_tree(AUTHOR_TREE)?,
            db,
        })
    }

    fn insert_new(&self, rfd: &Rfd, sequential: bool) -> StoreResult<Rfd> {
        rfd.validate()?;
        let key = rfd_key(rfd.id);
        let stored = settle((&self.rfds, &self.meta).transaction(|(rfds, meta)| {
            let next = read_next(meta)?;
            let advance_to = if sequential {
                match check_sequential(next, rfd.id) {
                    SequentialCheck::Accept { advance_to } => Some(advance_to),
                    SequentialCheck::Conflict { expected } => {
                        return abort(StoreError::IdentifierConflict {
                            expected,
                            actual: rfd.id,
                        });
                    }
                }
            } else {
                reconcile_after_import(next, rfd.id)
            };

            if rfds.get(key)?.is_some() {
                return abort(StoreError::AlreadyExists(rfd.id));
            }

            let now = Utc::now();
            let mut stored = rfd.clone();
            stored.created_at = now;
            stored.modified_at = now;
            rfds.insert(&key[..], encode(&stored).map_err(Abort)?)?;

            if let Some(advance_to) = advance_to {
                meta.insert(NEXT_RFD_KEY, encode(&advance_to.value()).map_err(Abort)?)?;
            }
            Ok(stored)
        }))?;
        self.db.flush()?;
        Ok(stored)
    }
}

impl DocumentStore for KvDocumentStore {
    fn backend(&self) -> &'static str {
        "kv"
    }

    fn check(&self) -> StoreResult<()> {
        self.db.checksum()?;
        Ok(())
    }

    fn get_rfds(&self) -> StoreResult<Vec<Rfd>> {
        values(&self.rfds)
    }

    fn get_rfd(&self, id: RfdId) -> StoreResult<Option<Rfd>> {
        self.rfds
            .get(rfd_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn get_rfds_by_author(&self, author: &str) -> StoreResult<Vec<Rfd>> {
        Ok(filter_exact_author(self.get_rfds()?, author))
    }

    fn create_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        self.insert_new(rfd, true)
    }

    fn import_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        self.insert_new(rfd, false)
    }

    fn update_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        rfd.validate()?;
        let key = rfd_key(rfd.id);
        let stored = settle(self.rfds.transaction(|rfds| {
            let Some(bytes) = rfds.get(key)? else {
                return abort(StoreError::NotFound(rfd.id));
            };
            let existing: Rfd = decode(&bytes).map_err(Abort)?;

            let mut stored = rfd.clone();
            stored.created_at = existing.created_at;
            stored.modified_at = Utc::now();
            rfds.insert(&key[..], encode(&stored).map_err(Abort)?)?;
            Ok(stored)
        }))?;
        self.db.flush()?;
        Ok(stored)
    }

    fn next_rfd_id(&self) -> StoreResult<RfdId> {
        match self.meta.get(NEXT_RFD_KEY)? {
            Some(bytes) => counter(&bytes),
            None => Ok(initial_next()),
        }
    }

    fn ensure_allocator_consistency(&self) -> StoreResult<RfdId> {
        let highest = match self.rfds.last()? {
            Some((key, _)) => Some(id_from_key(&key)?),
            None => None,
        };
        let (from, effective) = settle(self.meta.transaction(|meta| {
            let next = read_next(meta)?;
            match reconcile_after_scan(next, highest) {
                Some(repaired) => {
                    meta.insert(NEXT_RFD_KEY, encode(&repaired.value()).map_err(Abort)?)?;
                    Ok((next, repaired))
                }
                None => Ok((next, next)),
            }
        }))?;
        if from != effective {
            self.db.flush()?;
            info!(
                "event=allocator_repair module=repo backend=kv status=ok from={} to={}",
                from, effective
            );
        }
        Ok(effective)
    }

    fn get_tags(&self) -> StoreResult<Vec<Tag>> {
        values(&self.tags)
    }

    fn get_tag(&self, name: &str) -> StoreResult<Option<Tag>> {
        self.tags
            .get(name.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn create_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let stored = settle(self.tags.transaction(|tags| {
            if tags.get(tag.name.as_bytes())?.is_some() {
                return abort(StoreError::TagExists(tag.name.clone()));
            }
            let now = Utc::now();
            let mut stored = canonical_tag(tag);
            stored.created_at = now;
            stored.modified_at = now;
            tags.insert(stored.name.as_bytes(), encode(&stored).map_err(Abort)?)?;
            Ok(stored)
        }))?;
        self.db.flush()?;
        Ok(stored)
    }

    fn update_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let stored = settle(self.tags.transaction(|tags| {
            let Some(bytes) = tags.get(tag.name.as_bytes())? else {
                return abort(StoreError::TagNotFound(tag.name.clone()));
            };
            let existing: Tag = decode(&bytes).map_err(Abort)?;
            let mut stored = canonical_tag(tag);
            stored.created_at = existing.created_at;
            stored.modified_at = Utc::now();
            tags.insert(stored.name.as_bytes(), encode(&stored).map_err(Abort)?)?;
            Ok(stored)
        }))?;
        self.db.flush()?;
        Ok(stored)
    }

    fn get_authors(&self) -> StoreResult<Vec<Author>> {
        values(&self.authors)
    }

    fn get_author(&self, email: &str) -> StoreResult<Option<Author>> {
        self.authors
            .get(email.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn upsert_author(&self, author: &Author) -> StoreResult<Author> {
        if author.email.trim().is_empty() {
            return Err(StoreError::InvalidData(
                "author email must not be empty".to_string(),
            ));
        }
        let stored = settle(self.authors.transaction(|authors| {
            let now = Utc::now();
            let mut stored = author.clone();
            match authors.get(author.email.as_bytes())? {
                Some(bytes) => {
                    let existing: Author = decode(&bytes).map_err(Abort)?;
                    stored.created_at = existing.created_at;
                    if stored.name.is_empty() {
                        stored.name = existing.name;
                    }
                }
                None => stored.created_at = now,
            }
            stored.modified_at = now;
            authors.insert(stored.email.as_bytes(), encode(&stored).map_err(Abort)?)?;
            Ok(stored)
        }))?;
        self.db.flush()?;
        Ok(stored)
    }
}

fn abort<T>(err: StoreError) -> ConflictableTransactionResult<T, StoreError> {
    Err(Abort(err))
}

fn settle<T>(result: TransactionResult<T, StoreError>) -> StoreResult<T> {
    result.map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StoreError::Kv(err),
    })
}

fn read_next(meta: &TransactionalTree) -> ConflictableTransactionResult<RfdId, StoreError> {
    match meta.get(NEXT_RFD_KEY)? {
        Some(bytes) => counter(&bytes).map_err(Abort),
        None => Ok(initial_next()),
    }
}

fn counter(bytes: &[u8]) -> StoreResult<RfdId> {
    let value: u32 = decode(bytes)?;
    RfdId::new(value).map_err(|_| {
        StoreError::InvalidData(format!("invalid allocator value `{value}` in meta/nextRFD"))
    })
}

fn rfd_key(id: RfdId) -> [u8; 4] {
    id.value().to_be_bytes()
}

fn id_from_key(key: &[u8]) -> StoreResult<RfdId> {
    let raw: [u8; 4] = key
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("rfd key of {} bytes", key.len())))?;
    let value = u32::from_be_bytes(raw);
    RfdId::new(value).map_err(|_| StoreError::InvalidData(format!("invalid rfd key `{value}`")))
}

fn values<T: DeserializeOwned>(tree: &Tree) -> StoreResult<Vec<T>> {
    tree.iter()
        .values()
        .map(|bytes| decode(&bytes?))
        .collect()
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn canonical_tag(tag: &Tag) -> Tag {
    let mut canonical = tag.clone();
    canonical.rfds.sort();
    canonical.rfds.dedup();
    canonical
}
