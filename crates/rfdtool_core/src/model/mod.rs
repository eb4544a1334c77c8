//! Domain model for RFD documents and their secondary-index records.
//!
//! # Responsibility
//! - Define canonical data structures shared by stores and services.
//! - Own normalization rules for identifiers, tags and authors.
//!
//! # Invariants
//! - Documents are never deleted; tags and authors are created lazily.
//! - Every normalization function here is pure and idempotent.

pub mod author;
pub mod rfd;
pub mod tag;
