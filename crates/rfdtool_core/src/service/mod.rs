//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate store, index, authoring and webhook calls into use-case
//!   level APIs.
//! - Keep the CLI decoupled from storage and transport details.

pub mod index_service;
pub mod rfd_service;
