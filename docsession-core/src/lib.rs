//! A unit-of-work document session for HTTP document databases.
//!
//! This crate is the core of the docsession project and provides:
//!
//! - **Document traits** ([`document`]) - Core traits for defining and serializing entities
//! - **Command data** ([`commands`]) - PUT/DELETE/PATCH commands and the wire shapes around them
//! - **Transport abstraction** ([`transport`]) - The request executor seam to the server
//! - **Query construction** ([`query`]) - Query tokens, filter expressions and the query builder
//! - **Change tracking** ([`tracking`]) - The identity map and change sets
//! - **Batching** ([`batch`]) - Ordering changes into one atomic batch and applying its result
//! - **Lazy operations** ([`lazy`]) - Deferred reads multiplexed into one round trip
//! - **Includes** ([`include`]) - Referenced documents loaded alongside the requested ones
//! - **Sessions** ([`session`]) - The unit of work tying all of the above together
//! - **Configuration** ([`conventions`]) - Store conventions and session options
//! - **Document store** ([`store`]) - Owns the executor and opens sessions
//! - **Error handling** ([`error`]) - The session error type
//!
//! # Example
//!
//! ```ignore
//! use docsession::{Document, DocumentStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Product {
//!     pub name: String,
//!     pub units_in_stock: u32,
//! }
//!
//! impl Document for Product {
//!     fn collection_name() -> &'static str {
//!         "Products"
//!     }
//! }
//!
//! let store = DocumentStore::new(executor);
//! let mut session = store.open_session();
//!
//! let handle = session.store(Product { name: "Chai".into(), units_in_stock: 39 })?;
//! session.save_changes().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsession_core;

pub mod batch;
pub mod commands;
pub mod conventions;
pub mod document;
pub mod error;
pub mod include;
pub mod lazy;
mod load;
pub mod query;
pub mod session;
pub mod store;
pub mod tracking;
pub mod transport;
