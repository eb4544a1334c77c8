//! Relational engine behind [`crate::repo::SqliteDocumentStore`].
//!
//! # Responsibility
//! - Open SQLite connections with the pragmas the store relies on.
//! - Keep the `rfds`, `meta`, `tags`, `tag_rfds` and `authors` schema current.
//!
//! # Invariants
//! - The schema version lives in `PRAGMA user_version`.
//! - A database written by a newer build is refused with
//!   [`crate::repo::StoreError::SchemaTooNew`], never downgraded.
//! - Failures surface as [`crate::repo::StoreError`]; this layer has no error
//!   type of its own.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
