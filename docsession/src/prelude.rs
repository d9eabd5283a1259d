//! Convenient re-exports of commonly used types from docsession.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docsession::prelude::*;
//! ```

pub use docsession_core::{
    commands::{CommandData, PatchRequest},
    conventions::{DocumentConventions, SessionOptions},
    document::{Document, DocumentExt, DocumentMetadata},
    error::{SessionError, SessionResult},
    lazy::{Lazy, ResponseTimeInformation},
    query::{DocumentQuery, Expr, FieldOp, Filter, OrderingType, QueryVisitor, RawQuery},
    session::{DocumentSession, IncludeLoader, LazyIncludeLoader, SessionInfo},
    store::DocumentStore,
    tracking::EntityHandle,
    transport::{RequestExecutor, RequestExecutorBuilder},
};
