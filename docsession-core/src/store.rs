//! Entry point that owns the request executor and hands out sessions.
//!
//! # Example
//!
//! ```ignore
//! use docsession::store::DocumentStore;
//!
//! let store = DocumentStore::builder().database("Northwind").build(executor);
//! let mut session = store.open_session();
//! ```

use crate::{
    conventions::{DocumentConventions, SessionOptions},
    session::DocumentSession,
    transport::RequestExecutor,
};

/// A document store bound to a specific request executor.
///
/// # Type Parameters
///
/// * `E` - The request executor implementation type
#[derive(Debug)]
pub struct DocumentStore<E: RequestExecutor> {
    executor: E,
    conventions: DocumentConventions,
    database: Option<String>,
}

impl<E: RequestExecutor> DocumentStore<E> {
    /// Creates a store with default conventions.
    pub fn new(executor: E) -> Self {
        Self { executor, conventions: DocumentConventions::default(), database: None }
    }

    pub fn builder() -> DocumentStoreBuilder {
        DocumentStoreBuilder::default()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn conventions(&self) -> &DocumentConventions {
        &self.conventions
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Opens a session on the store's default database.
    pub fn open_session(&self) -> DocumentSession<'_, E> {
        self.open_session_with(SessionOptions::default())
    }

    /// Opens a session with explicit options. A database set in `options` wins over the
    /// store's default.
    pub fn open_session_with(&self, options: SessionOptions) -> DocumentSession<'_, E> {
        let options = options.or_database(self.database.as_deref());
        DocumentSession::new(&self.executor, &self.conventions, options)
    }

    /// Consumes the store and returns its executor.
    pub fn into_executor(self) -> E {
        self.executor
    }
}

/// Builder for [`DocumentStore`].
#[derive(Debug, Default)]
pub struct DocumentStoreBuilder {
    conventions: Option<DocumentConventions>,
    database: Option<String>,
}

impl DocumentStoreBuilder {
    pub fn conventions(mut self, conventions: DocumentConventions) -> Self {
        self.conventions = Some(conventions);
        self
    }

    /// Sets the database sessions use unless their options name another.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn build<E: RequestExecutor>(self, executor: E) -> DocumentStore<E> {
        DocumentStore {
            executor,
            conventions: self.conventions.unwrap_or_default(),
            database: self.database,
        }
    }
}
