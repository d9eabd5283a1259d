//! In-memory document server.
//!
//! [`InMemoryServer`] answers every [`Command`] a session sends, keeping documents as JSON
//! in a map guarded by an async-aware read-write lock. It behaves like a small document
//! database: change vectors are assigned on every write, batches are all-or-nothing, and
//! queries written by the query builder are parsed and evaluated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mea::rwlock::RwLock;
use serde_json::{Map, Value, from_value, json, to_value};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Instant,
};
use uuid::Uuid;

use docsession_core::{
    commands::{
        BatchResult, BatchResultItem, Command, CommandData, CommandResponse, CommandType, GetDocumentsResult,
        GetRequest, GetResponse, REQUEST_TIME_HEADER,
    },
    document::{DocumentMetadata, METADATA_KEY},
    error::{SessionError, SessionResult},
    include::referenced_ids,
    query::{IndexQuery, QueryResult},
    session::SessionInfo,
    transport::{RequestExecutor, RequestExecutorBuilder},
};

use crate::{
    evaluator::{DocumentEvaluator, compare_field, lookup},
    patch,
    rql::{self, Projection, QuerySource},
};

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    id: String,
    collection: Option<String>,
    body: Map<String, Value>,
    change_vector: String,
    last_modified: DateTime<Utc>,
}

impl StoredDocument {
    fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            id: self.id.clone(),
            collection: self.collection.clone(),
            change_vector: Some(self.change_vector.clone()),
            last_modified: Some(self.last_modified),
        }
    }

    /// The document as sent over the wire, with its `@metadata`.
    fn to_wire(&self) -> SessionResult<Value> {
        let mut document = self.body.clone();
        document.insert(METADATA_KEY.to_string(), to_value(self.metadata())?);
        Ok(Value::Object(document))
    }

    fn in_collection(&self, collection: &str) -> bool {
        self.collection
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(collection))
    }
}

/// Documents keyed by lowercased id.
type DocumentMap = BTreeMap<String, StoredDocument>;

#[derive(Debug, Default)]
struct ServerState {
    documents: DocumentMap,
    last_etag: u64,
    stale_queries: u32,
    failures: VecDeque<String>,
    request_count: u64,
}

impl ServerState {
    fn next_query_is_stale(&mut self) -> bool {
        if self.stale_queries == 0 {
            return false;
        }
        self.stale_queries -= 1;
        true
    }
}

fn key(id: &str) -> String {
    id.to_lowercase()
}

fn invalid(message: impl Into<String>) -> SessionError {
    SessionError::Server { status: 400, message: message.into() }
}

/// Thread-safe in-memory document server.
///
/// Clones share the same documents, so a test can keep one clone to inspect or tamper
/// with the data while a store owns another.
///
/// # Example
///
/// ```ignore
/// use docsession::{DocumentStore, memory::InMemoryServer};
///
/// let server = InMemoryServer::new();
/// let store = DocumentStore::new(server.clone());
///
/// let mut session = store.open_session();
/// session.store_with_id(product, "products/1")?;
/// session.save_changes().await?;
///
/// assert_eq!(server.request_count().await, 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryServer {
    state: Arc<RwLock<ServerState>>,
    database_id: Arc<str>,
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServer {
    /// Creates an empty server with a random database id.
    pub fn new() -> Self {
        Self::from_builder(InMemoryServerBuilder::default())
    }

    pub fn builder() -> InMemoryServerBuilder {
        InMemoryServerBuilder::default()
    }

    fn from_builder(builder: InMemoryServerBuilder) -> Self {
        let database_id = builder
            .database_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let state = ServerState { stale_queries: builder.stale_queries, ..ServerState::default() };

        Self { state: Arc::new(RwLock::new(state)), database_id: database_id.into() }
    }

    /// The id written into every change vector this server hands out.
    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Number of requests received, including failed ones.
    pub async fn request_count(&self) -> u64 {
        self.state.read().await.request_count
    }

    /// Makes the next request fail with a transport error carrying `message`.
    ///
    /// Calls queue up: each one fails one more request.
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state.write().await.failures.push_back(message.into());
    }

    /// Makes the next `count` query evaluations report stale results.
    pub async fn mark_next_queries_stale(&self, count: u32) {
        self.state.write().await.stale_queries = count;
    }

    /// Writes a document directly, bypassing sessions and the request counter.
    ///
    /// Returns the new change vector.
    pub async fn put_document(&self, id: &str, collection: Option<&str>, body: Value) -> SessionResult<String> {
        let Value::Object(body) = body else {
            return Err(SessionError::InvalidArgument(format!("document {id} must be a JSON object")));
        };

        let mut state = self.state.write().await;
        let state = &mut *state;

        state.last_etag += 1;
        let document = StoredDocument {
            id: id.to_string(),
            collection: collection.map(str::to_string),
            body,
            change_vector: self.change_vector(state.last_etag),
            last_modified: Utc::now(),
        };
        let change_vector = document.change_vector.clone();
        state.documents.insert(key(id), document);

        Ok(change_vector)
    }

    /// Returns a stored document with its `@metadata`, or `None` when it does not exist.
    pub async fn document(&self, id: &str) -> SessionResult<Option<Value>> {
        self.state
            .read()
            .await
            .documents
            .get(&key(id))
            .map(StoredDocument::to_wire)
            .transpose()
    }

    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    fn change_vector(&self, etag: u64) -> String {
        format!("A:{etag}-{}", self.database_id)
    }

    fn write_document(
        &self,
        documents: &mut DocumentMap,
        etag: &mut u64,
        id: String,
        collection: Option<String>,
        body: Map<String, Value>,
    ) -> StoredDocument {
        *etag += 1;
        let document = StoredDocument {
            id,
            collection,
            body,
            change_vector: self.change_vector(*etag),
            last_modified: Utc::now(),
        };
        documents.insert(key(&document.id), document.clone());
        document
    }

    /// Applies a batch to a copy of the documents and commits only when every command
    /// succeeded.
    fn apply_batch(&self, state: &mut ServerState, commands: Vec<CommandData>) -> SessionResult<BatchResult> {
        let mut documents = state.documents.clone();
        let mut etag = state.last_etag;
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let existing = documents.get(&key(command.id())).cloned();
            check_change_vector(command.id(), command.change_vector(), existing.as_ref())?;

            let item = match command {
                CommandData::Put(put) => {
                    let Value::Object(mut body) = put.document else {
                        return Err(invalid(format!("document {} must be a JSON object", put.id)));
                    };
                    let metadata: DocumentMetadata = match body.remove(METADATA_KEY) {
                        Some(raw) => from_value(raw)?,
                        None => DocumentMetadata::default(),
                    };

                    let id = existing.as_ref().map_or(put.id, |document| document.id.clone());
                    let collection = metadata
                        .collection
                        .or_else(|| existing.and_then(|document| document.collection));

                    let document = self.write_document(&mut documents, &mut etag, id, collection, body);
                    written(CommandType::Put, &document)
                }
                CommandData::Delete(delete) => {
                    let removed = documents.remove(&key(&delete.id));
                    BatchResultItem {
                        command_type: CommandType::Delete,
                        id: delete.id,
                        change_vector: None,
                        collection: None,
                        last_modified: None,
                        status: None,
                        modified_document: None,
                        deleted: Some(removed.is_some()),
                    }
                }
                CommandData::Patch(command) => match existing {
                    Some(document) => {
                        let mut body = document.body.clone();
                        patch::apply(&command.patch, &mut body)?;

                        if body == document.body {
                            patched(&document, "NotModified")?
                        } else {
                            let document = self.write_document(
                                &mut documents,
                                &mut etag,
                                document.id,
                                document.collection,
                                body,
                            );
                            patched(&document, "Patched")?
                        }
                    }
                    None => match &command.patch_if_missing {
                        Some(patch_if_missing) => {
                            let mut body = Map::new();
                            patch::apply(patch_if_missing, &mut body)?;

                            let document = self.write_document(&mut documents, &mut etag, command.id, None, body);
                            patched(&document, "Created")?
                        }
                        None => BatchResultItem {
                            command_type: CommandType::Patch,
                            id: command.id,
                            change_vector: None,
                            collection: None,
                            last_modified: None,
                            status: Some("DocumentDoesNotExist".to_string()),
                            modified_document: None,
                            deleted: None,
                        },
                    },
                },
            };

            results.push(item);
        }

        tracing::debug!(commands = results.len(), etag, "Batch applied");
        state.documents = documents;
        state.last_etag = etag;

        Ok(BatchResult { results })
    }

    fn run_query(&self, state: &mut ServerState, query: &IndexQuery) -> SessionResult<QueryResult> {
        let parsed = rql::parse(&query.query, &query.query_parameters)?;
        let is_stale = state.next_query_is_stale();

        let (collection, index_name) = match &parsed.source {
            QuerySource::Collection(name) => (Some(name.clone()), format!("Auto/{name}")),
            // Indexes are not modeled: an index scans the collection its name starts with.
            QuerySource::Index(name) => {
                let collection = name.split('/').next().unwrap_or(name.as_str()).to_string();
                (Some(collection), name.clone())
            }
            QuerySource::AllDocs => (None, "AllDocs".to_string()),
        };

        let candidates: Vec<&StoredDocument> = state
            .documents
            .values()
            .filter(|document| {
                collection
                    .as_deref()
                    .is_none_or(|collection| document.in_collection(collection))
            })
            .collect();

        let mut matched = match &parsed.filter {
            Some(filter) => DocumentEvaluator::filter_documents(candidates, |document| &document.body, filter)?,
            None => candidates,
        };

        if !parsed.order_by.is_empty() {
            matched.sort_by(|left, right| {
                parsed
                    .order_by
                    .iter()
                    .map(|order| {
                        let ordering = compare_field(&left.body, &right.body, &order.field, order.ordering);
                        if order.descending { ordering.reverse() } else { ordering }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let mut results = Vec::with_capacity(matched.len());
        for document in matched {
            let result = match &parsed.projection {
                Some(projection) if !projection.fields.is_empty() => project(document, projection),
                _ => document.to_wire()?,
            };

            let distinct = parsed.projection.as_ref().is_some_and(|projection| projection.distinct);
            if distinct && results.contains(&result) {
                continue;
            }
            results.push(result);
        }

        let total_results = results.len();
        let results = results
            .into_iter()
            .skip(query.start.unwrap_or(0))
            .take(query.page_size.unwrap_or(usize::MAX))
            .collect();

        tracing::debug!(query = %query.query, total_results, is_stale, "Query evaluated");

        Ok(QueryResult { results, total_results, skipped_results: 0, is_stale, index_name })
    }

    fn handle_get(&self, state: &mut ServerState, request: GetRequest) -> GetResponse {
        let started = Instant::now();
        let method = request.method.as_deref().unwrap_or("GET").to_ascii_uppercase();

        let outcome = match (method.as_str(), request.url.as_str()) {
            ("GET", "/docs") => docs_request(state, request.query.as_deref()),
            ("POST", "/queries") => request
                .content
                .ok_or_else(|| invalid("query request has no content"))
                .and_then(|content| Ok(from_value::<IndexQuery>(content)?))
                .and_then(|query| self.run_query(state, &query))
                .and_then(|result| Ok(GetResponse::ok(to_value(result)?))),
            (method, url) => Err(invalid(format!("unsupported request {method} {url}"))),
        };

        let mut response = outcome.unwrap_or_else(|error| {
            let status_code = match &error {
                SessionError::Server { status, .. } => *status,
                SessionError::Concurrency { .. } => 409,
                _ => 500,
            };
            GetResponse { result: Some(json!({ "Error": error.to_string() })), status_code, ..GetResponse::default() }
        });

        response
            .headers
            .insert(REQUEST_TIME_HEADER.to_string(), started.elapsed().as_millis().to_string());
        response
    }
}

/// A set change vector must match the stored one. An empty change vector requires the
/// document not to exist.
fn check_change_vector(id: &str, expected: Option<&str>, existing: Option<&StoredDocument>) -> SessionResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = existing.map(|document| document.change_vector.as_str());
    let satisfied = match actual {
        Some(actual) => actual == expected,
        None => expected.is_empty(),
    };
    if satisfied {
        return Ok(());
    }

    tracing::debug!(id, expected, ?actual, "Change vector mismatch");
    Err(SessionError::Concurrency {
        id: id.to_string(),
        expected: Some(expected.to_string()),
        actual: actual.map(str::to_string),
    })
}

fn written(command_type: CommandType, document: &StoredDocument) -> BatchResultItem {
    BatchResultItem {
        command_type,
        id: document.id.clone(),
        change_vector: Some(document.change_vector.clone()),
        collection: document.collection.clone(),
        last_modified: Some(document.last_modified),
        status: None,
        modified_document: None,
        deleted: None,
    }
}

fn patched(document: &StoredDocument, status: &str) -> SessionResult<BatchResultItem> {
    Ok(BatchResultItem {
        status: Some(status.to_string()),
        modified_document: Some(document.to_wire()?),
        ..written(CommandType::Patch, document)
    })
}

fn project(document: &StoredDocument, projection: &Projection) -> Value {
    let fields = projection
        .fields
        .iter()
        .map(|field| {
            let value = lookup(&document.body, &field.field).cloned().unwrap_or(Value::Null);
            (field.alias.clone(), value)
        })
        .collect::<Map<_, _>>();

    Value::Object(fields)
}

/// Looks up `ids`, then every document the found ones reference through `includes`.
///
/// Requested documents are never repeated among the includes. A referenced document that
/// does not exist is reported as `null`.
fn get_documents(documents: &DocumentMap, ids: &[String], includes: &[String]) -> SessionResult<GetDocumentsResult> {
    let found: Vec<Option<&StoredDocument>> = ids.iter().map(|id| documents.get(&key(id))).collect();

    let mut included = Map::new();
    for document in found.iter().flatten() {
        let body = Value::Object(document.body.clone());
        for path in includes {
            for id in referenced_ids(&body, path) {
                let requested = ids.iter().any(|requested| key(requested) == key(&id));
                if requested || included.contains_key(&id) {
                    continue;
                }

                let document = documents.get(&key(&id)).map(StoredDocument::to_wire).transpose()?;
                included.insert(id, document.unwrap_or(Value::Null));
            }
        }
    }

    let results = found
        .into_iter()
        .map(|document| document.map(StoredDocument::to_wire).transpose())
        .collect::<SessionResult<Vec<_>>>()?;

    Ok(GetDocumentsResult { results, includes: included })
}

/// Values of one query-string parameter, percent-decoded.
fn query_values(query: Option<&str>, name: &str) -> Vec<String> {
    query
        .unwrap_or_default()
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value))
        .collect()
}

fn docs_request(state: &ServerState, query: Option<&str>) -> SessionResult<GetResponse> {
    let ids = query_values(query, "id");
    if ids.is_empty() {
        return Err(invalid("document request names no id"));
    }

    let includes = query_values(query, "include");
    let result = get_documents(&state.documents, &ids, &includes)?;
    if result.results.iter().all(Option::is_none) {
        return Ok(GetResponse { status_code: 404, ..GetResponse::default() });
    }

    Ok(GetResponse::ok(to_value(result)?))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| value.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());

        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

#[async_trait]
impl RequestExecutor for InMemoryServer {
    #[tracing::instrument(level = "debug", skip_all, fields(command = command.name(), session = %session_info.session_id()))]
    async fn execute(&self, command: Command, session_info: &SessionInfo) -> SessionResult<CommandResponse> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        state.request_count += 1;
        if let Some(message) = state.failures.pop_front() {
            tracing::debug!(%message, "Failing request on demand");
            return Err(SessionError::Transport(message));
        }

        match command {
            Command::Batch(commands) => Ok(CommandResponse::Batch(self.apply_batch(state, commands)?)),
            Command::GetDocuments { ids, includes } => Ok(CommandResponse::Documents(get_documents(
                &state.documents,
                &ids,
                &includes,
            )?)),
            Command::HeadDocument(id) => Ok(CommandResponse::Head(
                state
                    .documents
                    .get(&key(&id))
                    .map(|document| document.change_vector.clone()),
            )),
            Command::Query(query) => Ok(CommandResponse::Query(self.run_query(state, &query)?)),
            Command::MultiGet(requests) => Ok(CommandResponse::MultiGet(
                requests
                    .into_iter()
                    .map(|request| self.handle_get(state, request))
                    .collect(),
            )),
        }
    }
}

/// Builder for [`InMemoryServer`].
///
/// # Example
///
/// ```ignore
/// use docsession::memory::InMemoryServer;
/// use docsession::transport::RequestExecutorBuilder;
///
/// let server = InMemoryServer::builder().stale_queries(2).build().await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryServerBuilder {
    stale_queries: u32,
    database_id: Option<String>,
}

impl InMemoryServerBuilder {
    /// Makes the first `count` query evaluations report stale results.
    pub fn stale_queries(mut self, count: u32) -> Self {
        self.stale_queries = count;
        self
    }

    /// Fixes the database id used in change vectors.
    pub fn database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    /// Builds the server without going through [`RequestExecutorBuilder`].
    pub fn into_server(self) -> InMemoryServer {
        InMemoryServer::from_builder(self)
    }
}

#[async_trait]
impl RequestExecutorBuilder for InMemoryServerBuilder {
    type Executor = InMemoryServer;

    async fn build(self) -> SessionResult<Self::Executor> {
        Ok(self.into_server())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsession_core::{
        commands::PatchRequest,
        query::{DocumentQuery, Filter},
    };
    use futures::executor::block_on;

    fn server() -> InMemoryServer {
        InMemoryServer::builder().database_id("mem").into_server()
    }

    fn info() -> SessionInfo {
        SessionInfo::new(None)
    }

    fn put(id: &str, change_vector: Option<&str>, document: Value) -> CommandData {
        CommandData::put(id, change_vector.map(str::to_string), document).unwrap()
    }

    #[test]
    fn batch_assigns_change_vectors() {
        block_on(async {
            let server = server();
            let result = server
                .execute(
                    Command::Batch(vec![put(
                        "products/1",
                        None,
                        json!({ "Name": "Chai", "@metadata": { "@collection": "Products" } }),
                    )]),
                    &info(),
                )
                .await
                .unwrap()
                .into_batch()
                .unwrap();

            let item = &result.results[0];
            assert_eq!(item.change_vector.as_deref(), Some("A:1-mem"));
            assert_eq!(item.collection.as_deref(), Some("Products"));

            let stored = server.document("PRODUCTS/1").await.unwrap().unwrap();
            assert_eq!(stored["Name"], "Chai");
            assert_eq!(stored["@metadata"]["@change-vector"], "A:1-mem");
        });
    }

    #[test]
    fn failed_precondition_rolls_back_whole_batch() {
        block_on(async {
            let server = server();
            let change_vector = server
                .put_document("products/9", Some("Products"), json!({ "Name": "Mishi Kobe Niku" }))
                .await
                .unwrap();

            let error = server
                .execute(
                    Command::Batch(vec![
                        put("products/10", None, json!({ "Name": "Ikura" })),
                        put("products/9", Some("A:0-mem"), json!({ "Name": "Changed" })),
                    ]),
                    &info(),
                )
                .await
                .unwrap_err();

            assert_eq!(
                error,
                SessionError::Concurrency {
                    id: "products/9".to_string(),
                    expected: Some("A:0-mem".to_string()),
                    actual: Some(change_vector),
                }
            );
            assert_eq!(server.document_count().await, 1);
            assert_eq!(server.document("products/9").await.unwrap().unwrap()["Name"], "Mishi Kobe Niku");
        });
    }

    #[test]
    fn patch_statuses() {
        block_on(async {
            let server = server();
            server.put_document("products/1", Some("Products"), json!({ "Stock": 1 })).await.unwrap();

            let result = server
                .execute(
                    Command::Batch(vec![
                        CommandData::patch("products/1", None, PatchRequest::new("this.Stock = 5;"), None).unwrap(),
                        CommandData::patch("products/1", None, PatchRequest::new("this.Stock = 5;"), None).unwrap(),
                        CommandData::patch("products/2", None, PatchRequest::new("this.Stock = 1;"), None).unwrap(),
                        CommandData::patch(
                            "products/3",
                            None,
                            PatchRequest::new("this.Stock = 1;"),
                            Some(PatchRequest::new("this.Stock = 0;")),
                        )
                        .unwrap(),
                    ]),
                    &info(),
                )
                .await
                .unwrap()
                .into_batch()
                .unwrap();

            let statuses: Vec<_> = result.results.iter().map(|item| item.status.as_deref()).collect();
            assert_eq!(
                statuses,
                vec![Some("Patched"), Some("NotModified"), Some("DocumentDoesNotExist"), Some("Created")]
            );
            assert_eq!(result.results[0].modified_document.as_ref().unwrap()["Stock"], 5);
            assert_eq!(server.document("products/3").await.unwrap().unwrap()["Stock"], 0);
        });
    }

    #[test]
    fn delete_of_missing_document_is_not_an_error() {
        block_on(async {
            let server = server();
            let result = server
                .execute(Command::Batch(vec![CommandData::delete("products/1", None).unwrap()]), &info())
                .await
                .unwrap()
                .into_batch()
                .unwrap();

            assert_eq!(result.results[0].deleted, Some(false));
        });
    }

    #[test]
    fn queries_filter_order_and_page() {
        block_on(async {
            let server = server();
            for (i, stock) in [(1, 5), (2, 30), (3, 12), (4, 0)] {
                server
                    .put_document(&format!("products/{i}"), Some("Products"), json!({ "Stock": stock }))
                    .await
                    .unwrap();
            }
            server.put_document("orders/1", Some("Orders"), json!({ "Stock": 100 })).await.unwrap();

            let query = DocumentQuery::from_collection("Products")
                .filter(Filter::gt("Stock", 1))
                .order_by_descending("Stock")
                .take(2)
                .to_index_query()
                .unwrap();

            let result = server
                .execute(Command::Query(query), &info())
                .await
                .unwrap()
                .into_query()
                .unwrap();

            assert_eq!(result.total_results, 3);
            let stocks: Vec<_> = result.results.iter().map(|document| document["Stock"].clone()).collect();
            assert_eq!(stocks, vec![json!(30), json!(12)]);
            assert_eq!(result.index_name, "Auto/Products");
        });
    }

    #[test]
    fn multi_get_routes_sub_requests() {
        block_on(async {
            let server = server();
            server.put_document("employees/1 a", Some("Employees"), json!({ "Name": "Nancy" })).await.unwrap();

            let requests = vec![
                GetRequest::new("/docs").with_query("?id=employees/1%20a"),
                GetRequest::new("/docs").with_query("?id=employees/2"),
                GetRequest::new("/queries")
                    .with_method("POST")
                    .with_content(json!({ "Query": "from Employees group by Name" })),
            ];

            let responses = server
                .execute(Command::MultiGet(requests), &info())
                .await
                .unwrap()
                .into_multi_get()
                .unwrap();

            assert_eq!(responses[0].status_code, 200);
            assert_eq!(responses[0].result.as_ref().unwrap()["Results"][0]["Name"], "Nancy");
            assert_eq!(responses[1].status_code, 404);
            assert_eq!(responses[2].status_code, 400);
            assert!(responses.iter().all(|response| response.request_time().is_some()));
            assert_eq!(server.request_count().await, 1);
        });
    }

    #[test]
    fn documents_come_with_their_includes() {
        block_on(async {
            let server = server();
            server.put_document("companies/1", Some("Companies"), json!({ "Name": "Acme" })).await.unwrap();
            server.put_document("products/1", Some("Products"), json!({ "Name": "Chai" })).await.unwrap();
            server
                .put_document(
                    "orders/1",
                    Some("Orders"),
                    json!({
                        "Company": "companies/1",
                        "Lines": [{ "Product": "products/1" }, { "Product": "products/9" }]
                    }),
                )
                .await
                .unwrap();
            server
                .put_document("orders/2", Some("Orders"), json!({ "Company": "companies/1", "Lines": [] }))
                .await
                .unwrap();

            let result = server
                .execute(
                    Command::GetDocuments {
                        ids: vec!["orders/1".into(), "orders/2".into(), "orders/3".into()],
                        includes: vec!["Company".into(), "Lines.Product".into()],
                    },
                    &info(),
                )
                .await
                .unwrap()
                .into_documents()
                .unwrap();

            assert_eq!(result.results.len(), 3);
            assert!(result.results[2].is_none());
            assert_eq!(result.includes.len(), 3);
            assert_eq!(result.includes["companies/1"]["Name"], "Acme");
            assert_eq!(result.includes["companies/1"]["@metadata"]["@id"], "companies/1");
            assert_eq!(result.includes["products/1"]["Name"], "Chai");
            assert_eq!(result.includes["products/9"], Value::Null);

            let responses = server
                .execute(
                    Command::MultiGet(vec![
                        GetRequest::new("/docs").with_query("?id=orders/2&include=Company&include=Lines.Product"),
                        GetRequest::new("/docs").with_query("?id=orders/1&include=Company&id=companies/1"),
                    ]),
                    &info(),
                )
                .await
                .unwrap()
                .into_multi_get()
                .unwrap();

            let includes = &responses[0].result.as_ref().unwrap()["Includes"];
            assert_eq!(includes.as_object().unwrap().len(), 1);
            assert_eq!(includes["companies/1"]["Name"], "Acme");

            // Requested documents are not repeated as includes.
            let second = responses[1].result.as_ref().unwrap();
            assert_eq!(second["Results"].as_array().unwrap().len(), 2);
            assert!(second.get("Includes").is_none());
        });
    }

    #[test]
    fn injected_failures_and_stale_queries() {
        let server = block_on(InMemoryServer::builder().stale_queries(1).build()).unwrap();

        block_on(async {
            server.fail_next("connection reset").await;

            let query = IndexQuery { query: "from Products".to_string(), ..IndexQuery::default() };
            let error = server.execute(Command::Query(query.clone()), &info()).await.unwrap_err();
            assert_eq!(error, SessionError::Transport("connection reset".to_string()));

            let first = server.execute(Command::Query(query.clone()), &info()).await.unwrap().into_query().unwrap();
            let second = server.execute(Command::Query(query), &info()).await.unwrap().into_query().unwrap();
            assert!(first.is_stale);
            assert!(!second.is_stale);
            assert_eq!(server.request_count().await, 3);
        });
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("orders/1%26x%3D"), "orders/1&x=");
        assert_eq!(percent_decode("100%"), "100%");
    }
}
