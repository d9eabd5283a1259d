//! Queries written directly as RQL text.

use serde_json::{Map, Value};

use crate::{
    error::{SessionError, SessionResult},
    query::IndexQuery,
};

/// RQL text with its parameters, sent as is.
///
/// # Example
///
/// ```ignore
/// use docsession::query::RawQuery;
///
/// let query = RawQuery::new("from Products where UnitsInStock > $min order by Name")
///     .add_parameter("min", 20)
///     .take(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuery {
    query: String,
    parameters: Map<String, Value>,
    start: Option<usize>,
    page_size: Option<usize>,
    wait_for_non_stale_results: bool,
}

impl RawQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Binds `$name`. A leading `$` in `name` is ignored.
    pub fn add_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let name = name.strip_prefix('$').map(str::to_string).unwrap_or(name);
        self.parameters.insert(name, value.into());
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.start = Some(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.page_size = Some(count);
        self
    }

    /// Asks the server to wait for the index to catch up; a stale answer is retried.
    pub fn wait_for_non_stale_results(mut self) -> Self {
        self.wait_for_non_stale_results = true;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn to_index_query(&self) -> SessionResult<IndexQuery> {
        if self.query.trim().is_empty() {
            return Err(SessionError::InvalidArgument("Query cannot be null or empty".to_string()));
        }

        Ok(IndexQuery {
            query: self.query.clone(),
            query_parameters: self.parameters.clone(),
            start: self.start,
            page_size: self.page_size,
            wait_for_non_stale_results: self.wait_for_non_stale_results,
        })
    }
}

impl From<&str> for RawQuery {
    fn from(query: &str) -> Self {
        RawQuery::new(query)
    }
}
