//! Query construction: the token AST, filter expressions and the fluent builder.
//!
//! - [`tokens`] - immutable query fragments that render themselves as RQL text
//! - [`filter`] - the [`Filter`]/[`Expr`] API and the [`QueryVisitor`] that walks it
//! - [`builder`] - [`DocumentQuery`], which assembles tokens into an [`IndexQuery`]
//! - [`raw`] - [`RawQuery`], RQL text written by hand

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod builder;
pub mod filter;
pub mod raw;
pub mod tokens;

pub use builder::DocumentQuery;
pub use filter::{Expr, FieldOp, Filter, QueryVisitor};
pub use raw::RawQuery;
pub use tokens::{OrderingType, QueryToken};

/// The query text and parameters sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexQuery {
    pub query: String,
    #[serde(default)]
    pub query_parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub wait_for_non_stale_results: bool,
}

/// The result of a query as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResult {
    /// Matching documents, each with its `@metadata`.
    #[serde(default)]
    pub results: Vec<Value>,
    /// Number of matches before paging.
    #[serde(default)]
    pub total_results: usize,
    #[serde(default)]
    pub skipped_results: usize,
    /// Whether the index had not caught up with the latest writes.
    #[serde(default)]
    pub is_stale: bool,
    #[serde(default)]
    pub index_name: String,
}
