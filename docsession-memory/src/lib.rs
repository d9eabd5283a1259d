//! In-memory document server for docsession.
//!
//! This crate provides [`InMemoryServer`], a thread-safe implementation of the
//! `RequestExecutor` trait that answers session commands without any network. It uses an
//! async-aware read-write lock for concurrent access and is meant for development and
//! testing.
//!
//! # Features
//!
//! - **Change vectors** - Every write gets a fresh `A:{etag}-{database}` change vector
//! - **Atomic batches** - All commands of a batch apply, or none do
//! - **Patches** - Simple `this.Field = args.value;` scripts, with `PatchIfMissing`
//! - **Queries** - The RQL subset produced by the query builder, with paging
//! - **Fault injection** - Failing requests and stale query results on demand
//!
//! # Quick Start
//!
//! ```ignore
//! use docsession::{Document, DocumentStore, memory::InMemoryServer};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     fn collection_name() -> &'static str { "Users" }
//! }
//!
//! let store = DocumentStore::new(InMemoryServer::new());
//! let mut session = store.open_session();
//!
//! session.store_with_id(User { name: "Alice".to_string() }, "users/1")?;
//! session.save_changes().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsession_memory;

mod evaluator;
mod patch;
pub mod rql;
pub mod server;

pub use server::{InMemoryServer, InMemoryServerBuilder};
