//! Main docsession crate providing a unit-of-work session over an HTTP document database.
//!
//! This crate is the primary entry point for users of docsession. It re-exports the core
//! types from `docsession-core` and gives access to the in-memory server.
//!
//! # Features
//!
//! - **Identity map** - One in-memory entity per document id, per session
//! - **Change tracking** - Modified entities are found by comparing against a snapshot
//! - **Atomic flushes** - `save_changes` sends every change as one ordered batch
//! - **Lazy reads** - Loads and queries queued and sent together in one round trip
//! - **Query builder** - Filters, ordering, projections and paging rendered as RQL
//!
//! # Quick Start
//!
//! ```ignore
//! use docsession::{prelude::*, memory::InMemoryServer};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Product {
//!     pub name: String,
//!     pub units_in_stock: u32,
//! }
//!
//! impl Document for Product {
//!     fn collection_name() -> &'static str { "Products" }
//! }
//!
//! let store = DocumentStore::new(InMemoryServer::builder().build().await?);
//! let mut session = store.open_session();
//!
//! // Track a new entity and flush it
//! let chai = session.store_with_id(Product { name: "Chai".into(), units_in_stock: 39 }, "products/1")?;
//! session.save_changes().await?;
//!
//! // Modify it: the change is detected on the next flush
//! session.get_mut::<Product>(chai)?.units_in_stock -= 1;
//! session.save_changes().await?;
//! ```
//!
//! # Lazy Operations
//!
//! Lazy reads are queued on the session and sent in a single multi-get the first time
//! any of their values is needed.
//!
//! ```ignore
//! let first = session.lazily().load::<Product>("products/1")?;
//! let second = session.lazily().load::<Product>("products/2")?;
//! let cheap = session.lazily().count(&DocumentQuery::for_document::<Product>().filter(Filter::lt("Price", 10)))?;
//!
//! // One round trip answers all three.
//! let first = session.lazy_value(&first).await?;
//! let cheap = session.lazy_value(&cheap).await?;
//! ```
//!
//! # Includes
//!
//! A load can bring in the documents its results reference. Later loads of those ids are
//! answered without a request.
//!
//! ```ignore
//! let order = session.include("Company").load::<Order>("orders/1").await?;
//! let company = session.load::<Company>("companies/1").await?;
//! assert_eq!(session.number_of_requests(), 1);
//! ```
//!
//! # Executors
//!
//! - [`memory`] - In-memory server for development and testing
//!
//! Any other server is reached by implementing [`transport::RequestExecutor`].

pub mod prelude;

pub use docsession_core::{
    batch, commands, conventions, document, error, include, lazy, query, session, store, tracking, transport,
};

pub use docsession_core::{
    document::Document,
    error::{SessionError, SessionResult},
    session::DocumentSession,
    store::DocumentStore,
};

// Re-export serde_json so callers can build patch values and raw documents
pub use serde_json;

/// In-memory server implementation.
pub mod memory {
    pub use docsession_memory::{InMemoryServer, InMemoryServerBuilder};
}
