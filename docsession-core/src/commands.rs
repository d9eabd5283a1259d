//! Command data and wire shapes exchanged with the request executor.
//!
//! A session never builds raw HTTP. It hands fully built [`Command`] values to the
//! [`RequestExecutor`](crate::transport::RequestExecutor) and receives a [`CommandResponse`].
//!
//! - [`CommandData`] - one server-side mutation inside a batch (PUT, DELETE, PATCH)
//! - [`BatchResult`] - the per-command results of an applied batch, in request order
//! - [`GetRequest`] / [`GetResponse`] - the sub-requests of a multiplexed multi-get
//! - [`GetDocumentsResult`] - documents returned by a load

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, time::Duration};

use crate::{
    error::{SessionError, SessionResult},
    query::{IndexQuery, QueryResult},
};

/// Header carrying the server-side duration of a request, in milliseconds.
pub const REQUEST_TIME_HEADER: &str = "Request-Time";

/// The kind of a batch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    /// Store a whole document.
    Put,
    /// Delete a document.
    Delete,
    /// Apply a patch script to a document.
    Patch,
}

/// A server-side patch: a script plus the named arguments it reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    /// The patch script. Arguments are referenced as `args.<name>`.
    #[serde(rename = "Script")]
    pub script: String,
    /// Named arguments for the script.
    #[serde(rename = "Values", default)]
    pub values: Map<String, Value>,
}

impl PatchRequest {
    /// Creates a patch request with no arguments.
    pub fn new(script: impl Into<String>) -> Self {
        Self { script: script.into(), values: Map::new() }
    }

    /// Adds a named argument.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

/// Stores `document` under `id`. The document includes its `@metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct PutCommandData {
    pub id: String,
    pub change_vector: Option<String>,
    pub document: Value,
}

/// Deletes the document `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommandData {
    pub id: String,
    pub change_vector: Option<String>,
}

/// Patches the document `id`, or runs `patch_if_missing` against an empty document
/// when it does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchCommandData {
    pub id: String,
    pub change_vector: Option<String>,
    pub patch: PatchRequest,
    pub patch_if_missing: Option<PatchRequest>,
}

/// A single mutation inside a batch.
///
/// A `None` change vector means no concurrency check; a `Some` change vector is an
/// optimistic-concurrency precondition the server enforces for the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandData {
    Put(PutCommandData),
    Delete(DeleteCommandData),
    Patch(PatchCommandData),
}

fn validate_id(id: &str) -> SessionResult<()> {
    if id.trim().is_empty() {
        return Err(SessionError::InvalidArgument("Id cannot be null or empty".to_string()));
    }
    Ok(())
}

impl CommandData {
    /// Creates a PUT command.
    pub fn put(
        id: impl Into<String>,
        change_vector: Option<String>,
        document: Value,
    ) -> SessionResult<Self> {
        let id = id.into();
        validate_id(&id)?;

        Ok(CommandData::Put(PutCommandData { id, change_vector, document }))
    }

    /// Creates a DELETE command.
    pub fn delete(id: impl Into<String>, change_vector: Option<String>) -> SessionResult<Self> {
        let id = id.into();
        validate_id(&id)?;

        Ok(CommandData::Delete(DeleteCommandData { id, change_vector }))
    }

    /// Creates a PATCH command.
    ///
    /// Fails when `id` is empty or when `patch` has an empty script.
    pub fn patch(
        id: impl Into<String>,
        change_vector: Option<String>,
        patch: PatchRequest,
        patch_if_missing: Option<PatchRequest>,
    ) -> SessionResult<Self> {
        let id = id.into();
        validate_id(&id)?;

        if patch.script.trim().is_empty() {
            return Err(SessionError::InvalidArgument("Patch cannot be null".to_string()));
        }

        Ok(CommandData::Patch(PatchCommandData { id, change_vector, patch, patch_if_missing }))
    }

    /// Returns the document id this command targets.
    pub fn id(&self) -> &str {
        match self {
            CommandData::Put(cmd) => &cmd.id,
            CommandData::Delete(cmd) => &cmd.id,
            CommandData::Patch(cmd) => &cmd.id,
        }
    }

    /// Returns the change vector precondition, if any.
    pub fn change_vector(&self) -> Option<&str> {
        match self {
            CommandData::Put(cmd) => cmd.change_vector.as_deref(),
            CommandData::Delete(cmd) => cmd.change_vector.as_deref(),
            CommandData::Patch(cmd) => cmd.change_vector.as_deref(),
        }
    }

    /// Returns the command type.
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandData::Put(_) => CommandType::Put,
            CommandData::Delete(_) => CommandType::Delete,
            CommandData::Patch(_) => CommandType::Patch,
        }
    }
}

impl Serialize for CommandData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Id", self.id())?;
        map.serialize_entry("ChangeVector", &self.change_vector())?;

        match self {
            CommandData::Put(cmd) => {
                map.serialize_entry("Document", &cmd.document)?;
                map.serialize_entry("Type", &CommandType::Put)?;
            }
            CommandData::Delete(_) => {
                map.serialize_entry("Type", &CommandType::Delete)?;
            }
            CommandData::Patch(cmd) => {
                map.serialize_entry("Patch", &cmd.patch)?;
                map.serialize_entry("Type", &CommandType::Patch)?;
                if let Some(patch_if_missing) = &cmd.patch_if_missing {
                    map.serialize_entry("PatchIfMissing", patch_if_missing)?;
                }
            }
        }

        map.end()
    }
}

/// Result of one command inside an applied batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultItem {
    #[serde(rename = "Type")]
    pub command_type: CommandType,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@change-vector", alias = "ChangeVector", default)]
    pub change_vector: Option<String>,
    #[serde(rename = "@collection", default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(rename = "@last-modified", alias = "LastModified", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Patch status as reported by the server (`Patched`, `Created`, `DocumentDoesNotExist`, ...).
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// The document after a patch was applied, when the server returns it.
    #[serde(rename = "ModifiedDocument", default, skip_serializing_if = "Option::is_none")]
    pub modified_document: Option<Value>,
    /// Whether a delete removed anything.
    #[serde(rename = "Deleted", default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

/// The results of an applied batch, ordered 1:1 with the submitted commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    #[serde(rename = "Results")]
    pub results: Vec<BatchResultItem>,
}

/// Documents returned by a load, one slot per requested id (`None` when missing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDocumentsResult {
    #[serde(rename = "Results")]
    pub results: Vec<Option<Value>>,
    /// Documents referenced through the requested include paths, keyed by id.
    #[serde(rename = "Includes", default, skip_serializing_if = "Map::is_empty")]
    pub includes: Map<String, Value>,
}

/// One sub-request of a multiplexed multi-get.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRequest {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl GetRequest {
    /// Creates a GET request for `url` with no query string.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Sets the query string. A leading `?` is optional.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the HTTP method used for this sub-request (GET when unset).
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the request body.
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    /// Returns the url joined with the query string.
    ///
    /// A query that already starts with `?` is appended as is; otherwise a `?` is inserted.
    pub fn url_and_query(&self) -> String {
        match &self.query {
            None => self.url.clone(),
            Some(query) if query.starts_with('?') => format!("{}{}", self.url, query),
            Some(query) => format!("{}?{}", self.url, query),
        }
    }
}

/// The response to one sub-request of a multi-get.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
}

impl GetResponse {
    /// Creates a 200 response carrying `result`.
    pub fn ok(result: Value) -> Self {
        Self { result: Some(result), headers: BTreeMap::new(), status_code: 200 }
    }

    /// Returns `true` unless the status is one a lazy operation knows how to handle.
    pub fn request_has_errors(&self) -> bool {
        !matches!(self.status_code, 200 | 201 | 203 | 204 | 304 | 404)
    }

    /// Server-side duration reported through the `Request-Time` header.
    pub fn request_time(&self) -> Option<Duration> {
        self.headers
            .get(REQUEST_TIME_HEADER)
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
    }
}

/// A fully built request handed to the request executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Apply all commands atomically, in order.
    Batch(Vec<CommandData>),
    /// Load documents by id, along with the documents their include paths reference.
    GetDocuments { ids: Vec<String>, includes: Vec<String> },
    /// Check whether a document exists without loading it.
    HeadDocument(String),
    /// Run a query.
    Query(IndexQuery),
    /// Run several reads in one round trip.
    MultiGet(Vec<GetRequest>),
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Batch(_) => "batch",
            Command::GetDocuments { .. } => "get_documents",
            Command::HeadDocument(_) => "head_document",
            Command::Query(_) => "query",
            Command::MultiGet(_) => "multi_get",
        }
    }
}

/// The response to a [`Command`], one variant per command kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Batch(BatchResult),
    Documents(GetDocumentsResult),
    /// The change vector of the document, or `None` when it does not exist.
    Head(Option<String>),
    Query(QueryResult),
    MultiGet(Vec<GetResponse>),
}

fn unexpected(expected: &str, actual: &CommandResponse) -> SessionError {
    SessionError::UnexpectedResponse(format!("expected a {expected} response, got {actual:?}"))
}

impl CommandResponse {
    pub fn into_batch(self) -> SessionResult<BatchResult> {
        match self {
            CommandResponse::Batch(result) => Ok(result),
            other => Err(unexpected("batch", &other)),
        }
    }

    pub fn into_documents(self) -> SessionResult<GetDocumentsResult> {
        match self {
            CommandResponse::Documents(result) => Ok(result),
            other => Err(unexpected("documents", &other)),
        }
    }

    pub fn into_head(self) -> SessionResult<Option<String>> {
        match self {
            CommandResponse::Head(result) => Ok(result),
            other => Err(unexpected("head", &other)),
        }
    }

    pub fn into_query(self) -> SessionResult<QueryResult> {
        match self {
            CommandResponse::Query(result) => Ok(result),
            other => Err(unexpected("query", &other)),
        }
    }

    pub fn into_multi_get(self) -> SessionResult<Vec<GetResponse>> {
        match self {
            CommandResponse::MultiGet(result) => Ok(result),
            other => Err(unexpected("multi-get", &other)),
        }
    }
}
