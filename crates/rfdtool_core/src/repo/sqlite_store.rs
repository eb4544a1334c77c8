//! Document store on SQLite.
//!
//! # Responsibility
//! - Map documents, tags, authors and the allocator onto relational tables.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Writes that touch more than one row run in one `IMMEDIATE` transaction.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Timestamps are stored as epoch milliseconds.

use crate::allocator::{
    check_sequential, initial_next, reconcile_after_import, reconcile_after_scan, SequentialCheck,
};
use crate::db::{open_db, open_db_in_memory};
use crate::model::author::Author;
use crate::model::rfd::{Rfd, RfdId, RfdState};
use crate::model::tag::Tag;
use crate::repo::{filter_exact_author, DocumentStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const RFD_SELECT_SQL: &str = "SELECT
    id,
    title,
    authors,
    state,
    discussion,
    legacy_discussion,
    tags,
    content,
    content_md,
    created_at,
    modified_at
FROM rfds";

const NEXT_RFD_KEY: &str = "nextRFD";

/// SQLite-backed document store.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens the database file at `path`, applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps an already-migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::InvalidData("connection lock poisoned".to_string()))
    }

    fn insert_new(&self, rfd: &Rfd, sequential: bool) -> StoreResult<Rfd> {
        rfd.validate()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next = read_next(&tx)?;
        let advance_to = if sequential {
            match check_sequential(next, rfd.id) {
                SequentialCheck::Accept { advance_to } => Some(advance_to),
                SequentialCheck::Conflict { expected } => {
                    return Err(StoreError::IdentifierConflict {
                        expected,
                        actual: rfd.id,
                    });
                }
            }
        } else {
            reconcile_after_import(next, rfd.id)
        };

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM rfds WHERE id = ?1;",
                params![rfd.id.value()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(rfd.id));
        }

        let now = now_millis();
        tx.execute(
            "INSERT INTO rfds (
                id,
                title,
                authors,
                state,
                discussion,
                legacy_discussion,
                tags,
                content,
                content_md,
                created_at,
                modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10);",
            params![
                rfd.id.value(),
                rfd.title.as_str(),
                encode_list(&rfd.authors)?,
                rfd.state.as_str(),
                rfd.discussion.as_str(),
                rfd.legacy_discussion.as_str(),
                encode_list(&rfd.tags)?,
                rfd.content.as_str(),
                rfd.content_md.as_str(),
                now,
            ],
        )?;

        if let Some(advance_to) = advance_to {
            write_next(&tx, advance_to)?;
        }

        let stored = fetch_rfd(&tx, rfd.id)?
            .ok_or_else(|| StoreError::InvalidData(format!("rfd {} vanished after insert", rfd.id)))?;
        tx.commit()?;
        Ok(stored)
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn check(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1;", [], |_| Ok(()))?;
        Ok(())
    }

    fn get_rfds(&self) -> StoreResult<Vec<Rfd>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{RFD_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut rfds = Vec::new();
        while let Some(row) = rows.next()? {
            rfds.push(parse_rfd_row(row)?);
        }
        Ok(rfds)
    }

    fn get_rfd(&self, id: RfdId) -> StoreResult<Option<Rfd>> {
        let conn = self.lock()?;
        fetch_rfd(&conn, id)
    }

    fn get_rfds_by_author(&self, author: &str) -> StoreResult<Vec<Rfd>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{RFD_SELECT_SQL} WHERE authors LIKE ?1 ESCAPE '\\' ORDER BY id ASC;"
        ))?;
        let pattern = format!("%{}%", escape_like(author));
        let mut rows = stmt.query(params![pattern])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(parse_rfd_row(row)?);
        }
        // LIKE narrows the scan; exact membership is decided on the decoded list.
        Ok(filter_exact_author(candidates, author))
    }

    fn create_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        self.insert_new(rfd, true)
    }

    fn import_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        self.insert_new(rfd, false)
    }

    fn update_rfd(&self, rfd: &Rfd) -> StoreResult<Rfd> {
        rfd.validate()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE rfds
             SET
                title = ?1,
                authors = ?2,
                state = ?3,
                discussion = ?4,
                legacy_discussion = ?5,
                tags = ?6,
                content = ?7,
                content_md = ?8,
                modified_at = ?9
             WHERE id = ?10;",
            params![
                rfd.title.as_str(),
                encode_list(&rfd.authors)?,
                rfd.state.as_str(),
                rfd.discussion.as_str(),
                rfd.legacy_discussion.as_str(),
                encode_list(&rfd.tags)?,
                rfd.content.as_str(),
                rfd.content_md.as_str(),
                now_millis(),
                rfd.id.value(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(rfd.id));
        }

        let stored = fetch_rfd(&tx, rfd.id)?.ok_or(StoreError::NotFound(rfd.id))?;
        tx.commit()?;
        Ok(stored)
    }

    fn next_rfd_id(&self) -> StoreResult<RfdId> {
        let conn = self.lock()?;
        read_next(&conn)
    }

    fn ensure_allocator_consistency(&self) -> StoreResult<RfdId> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next = read_next(&tx)?;
        let highest: Option<u32> = tx.query_row("SELECT MAX(id) FROM rfds;", [], |row| row.get(0))?;
        let highest = highest.map(RfdId::new).transpose()?;

        let effective = match reconcile_after_scan(next, highest) {
            Some(repaired) => {
                write_next(&tx, repaired)?;
                info!(
                    "event=allocator_repair module=repo backend=sqlite status=ok from={} to={}",
                    next, repaired
                );
                repaired
            }
            None => next,
        };
        tx.commit()?;
        Ok(effective)
    }

    fn get_tags(&self) -> StoreResult<Vec<Tag>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, t.created_at, t.modified_at, tr.rfd_id
             FROM tags t
             LEFT JOIN tag_rfds tr ON tr.tag_name = t.name
             ORDER BY t.name ASC, tr.rfd_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut tags: Vec<Tag> = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let rfd_id: Option<u32> = row.get(3)?;
            let is_new = tags.last().map_or(true, |last| last.name != name);
            if is_new {
                tags.push(Tag {
                    name,
                    rfds: Vec::new(),
                    created_at: from_millis(row.get(1)?)?,
                    modified_at: from_millis(row.get(2)?)?,
                });
            }
            if let (Some(tag), Some(rfd_id)) = (tags.last_mut(), rfd_id) {
                tag.rfds.push(RfdId::new(rfd_id)?);
            }
        }
        Ok(tags)
    }

    fn get_tag(&self, name: &str) -> StoreResult<Option<Tag>> {
        let conn = self.lock()?;
        fetch_tag(&conn, name)
    }

    fn create_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = now_millis();
        let inserted = tx.execute(
            "INSERT INTO tags (name, created_at, modified_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(name) DO NOTHING;",
            params![tag.name.as_str(), now],
        )?;
        if inserted == 0 {
            return Err(StoreError::TagExists(tag.name.clone()));
        }
        write_tag_refs(&tx, tag)?;

        let stored = fetch_tag(&tx, &tag.name)?
            .ok_or_else(|| StoreError::TagNotFound(tag.name.clone()))?;
        tx.commit()?;
        Ok(stored)
    }

    fn update_tag(&self, tag: &Tag) -> StoreResult<Tag> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE tags SET modified_at = ?1 WHERE name = ?2;",
            params![now_millis(), tag.name.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::TagNotFound(tag.name.clone()));
        }
        tx.execute(
            "DELETE FROM tag_rfds WHERE tag_name = ?1;",
            params![tag.name.as_str()],
        )?;
        write_tag_refs(&tx, tag)?;

        let stored = fetch_tag(&tx, &tag.name)?
            .ok_or_else(|| StoreError::TagNotFound(tag.name.clone()))?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_authors(&self) -> StoreResult<Vec<Author>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT email, name, created_at, modified_at FROM authors ORDER BY email ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut authors = Vec::new();
        while let Some(row) = rows.next()? {
            authors.push(parse_author_row(row)?);
        }
        Ok(authors)
    }

    fn get_author(&self, email: &str) -> StoreResult<Option<Author>> {
        let conn = self.lock()?;
        fetch_author(&conn, email)
    }

    fn upsert_author(&self, author: &Author) -> StoreResult<Author> {
        if author.email.trim().is_empty() {
            return Err(StoreError::InvalidData(
                "author email must not be empty".to_string(),
            ));
        }
        let conn = self.lock()?;
        let now = now_millis();
        conn.execute(
            "INSERT INTO authors (email, name, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(email) DO UPDATE SET
                name = CASE WHEN excluded.name = '' THEN authors.name ELSE excluded.name END,
                modified_at = excluded.modified_at;",
            params![author.email.as_str(), author.name.as_str(), now],
        )?;
        fetch_author(&conn, &author.email)?
            .ok_or_else(|| StoreError::InvalidData(format!("author {} vanished after upsert", author.email)))
    }
}

fn read_next(conn: &Connection) -> StoreResult<RfdId> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1;",
            params![NEXT_RFD_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .and_then(|value| RfdId::new(value).ok())
            .ok_or_else(|| StoreError::InvalidData(format!("invalid allocator value `{raw}`"))),
        None => Ok(initial_next()),
    }
}

fn write_next(tx: &Transaction<'_>, next: RfdId) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![NEXT_RFD_KEY, next.value().to_string()],
    )?;
    Ok(())
}

fn write_tag_refs(tx: &Transaction<'_>, tag: &Tag) -> StoreResult<()> {
    let mut stmt =
        tx.prepare("INSERT OR IGNORE INTO tag_rfds (tag_name, rfd_id) VALUES (?1, ?2);")?;
    for id in &tag.rfds {
        stmt.execute(params![tag.name.as_str(), id.value()])?;
    }
    Ok(())
}

fn fetch_rfd(conn: &Connection, id: RfdId) -> StoreResult<Option<Rfd>> {
    let mut stmt = conn.prepare(&format!("{RFD_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query(params![id.value()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_rfd_row(row)?));
    }
    Ok(None)
}

fn fetch_tag(conn: &Connection, name: &str) -> StoreResult<Option<Tag>> {
    let header = conn
        .query_row(
            "SELECT created_at, modified_at FROM tags WHERE name = ?1;",
            params![name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let Some((created_at, modified_at)) = header else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT rfd_id FROM tag_rfds WHERE tag_name = ?1 ORDER BY rfd_id ASC;")?;
    let mut rows = stmt.query(params![name])?;
    let mut rfds = Vec::new();
    while let Some(row) = rows.next()? {
        rfds.push(RfdId::new(row.get(0)?)?);
    }

    Ok(Some(Tag {
        name: name.to_string(),
        rfds,
        created_at: from_millis(created_at)?,
        modified_at: from_millis(modified_at)?,
    }))
}

fn fetch_author(conn: &Connection, email: &str) -> StoreResult<Option<Author>> {
    let mut stmt = conn.prepare(
        "SELECT email, name, created_at, modified_at FROM authors WHERE email = ?1;",
    )?;
    let mut rows = stmt.query(params![email])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_author_row(row)?));
    }
    Ok(None)
}

fn parse_rfd_row(row: &Row<'_>) -> StoreResult<Rfd> {
    let raw_id: u32 = row.get(0)?;
    let raw_state: String = row.get(3)?;
    let raw_authors: String = row.get(2)?;
    let raw_tags: String = row.get(6)?;

    Ok(Rfd {
        id: RfdId::new(raw_id)?,
        title: row.get(1)?,
        authors: decode_list(&raw_authors, "authors")?,
        state: RfdState::parse(&raw_state)?,
        discussion: row.get(4)?,
        legacy_discussion: row.get(5)?,
        tags: decode_list(&raw_tags, "tags")?,
        content: row.get(7)?,
        content_md: row.get(8)?,
        created_at: from_millis(row.get(9)?)?,
        modified_at: from_millis(row.get(10)?)?,
    })
}

fn parse_author_row(row: &Row<'_>) -> StoreResult<Author> {
    Ok(Author {
        email: row.get(0)?,
        name: row.get(1)?,
        created_at: from_millis(row.get(2)?)?,
        modified_at: from_millis(row.get(3)?)?,
    })
}

fn encode_list(values: &[String]) -> StoreResult<String> {
    serde_json::to_string(values)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode list: {err}")))
}

fn decode_list(raw: &str, column: &str) -> StoreResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|err| StoreError::InvalidData(format!("invalid {column} column `{raw}`: {err}")))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid timestamp `{value}`")))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
