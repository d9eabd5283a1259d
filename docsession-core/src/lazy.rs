//! Deferred reads that share a single round trip.
//!
//! A lazy operation is queued on the session and hands back a [`Lazy<T>`] handle. Nothing
//! is sent until some handle's value is requested through
//! [`DocumentSession::lazy_value`](crate::session::DocumentSession::lazy_value), at which
//! point every queued operation goes out in one multi-get request.
//!
//! Each handle moves through `Pending -> Materializing -> Resolved | Failed`. Resolved
//! values are cached, so asking again never makes another request. A failed handle keeps
//! returning the error that failed it.

use serde_json::{Map, Value, from_value, to_value};
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{
    commands::{GetDocumentsResult, GetRequest, GetResponse},
    document::Document,
    error::{SessionError, SessionResult},
    include::register_includes,
    load::{ParsedDocument, escape_query_value, parse_documents, track_query_results},
    query::{IndexQuery, QueryResult},
    tracking::IdentityMap,
};

/// Handle to the result of a lazy operation.
///
/// The handle is plain data; pass it to
/// [`DocumentSession::lazy_value`](crate::session::DocumentSession::lazy_value) on the
/// session that created it. Slot numbers are unique across the process, so any other
/// session rejects the handle.
pub struct Lazy<T> {
    slot: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Lazy<T> {
    fn new(slot: u64) -> Self {
        Self { slot, _marker: PhantomData }
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Lazy<T> {}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lazy").field(&self.slot).finish()
    }
}

/// Server-side duration of one sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTimeItem {
    pub url: String,
    pub duration: Duration,
}

/// Timings of a lazy materialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseTimeInformation {
    pub total_server_duration: Duration,
    pub total_client_duration: Duration,
    pub duration_breakdown: Vec<ResponseTimeItem>,
}

impl ResponseTimeInformation {
    /// Sums the breakdown into `total_server_duration`.
    pub fn compute_server_total(&mut self) {
        self.total_server_duration = self.duration_breakdown.iter().map(|item| item.duration).sum();
    }
}

/// A read that can be multiplexed with others into one request.
pub trait LazyOperation: Send {
    /// Builds the sub-request for this operation.
    fn create_request(&self) -> SessionResult<GetRequest>;

    /// Parses the sub-response. Nothing is tracked at this point.
    fn handle_response(&mut self, response: GetResponse) -> SessionResult<()>;

    /// Set by [`handle_response`](Self::handle_response) when the whole request must be sent
    /// again, for example because a query hit a stale index while waiting for fresh results.
    fn requires_retry(&self) -> bool;

    /// Tracks what was parsed and returns the typed result.
    fn complete(
        self: Box<Self>,
        identity_map: &mut IdentityMap,
        no_tracking: bool,
    ) -> SessionResult<Box<dyn Any + Send>>;
}

fn missing_result(url: &str) -> SessionError {
    SessionError::UnexpectedResponse(format!("response to {url} has no body"))
}

/// Whether a lazy load returns a single slot or one per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadShape {
    One,
    Many,
}

/// Loads documents by id, with the documents their include paths reference.
pub struct LazyLoadOperation<D> {
    ids: Vec<String>,
    includes: Vec<String>,
    shape: LoadShape,
    parsed: Option<Vec<Option<ParsedDocument>>>,
    included: Map<String, Value>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> LazyLoadOperation<D> {
    pub(crate) fn new(ids: Vec<String>, shape: LoadShape) -> Self {
        Self { ids, includes: Vec::new(), shape, parsed: None, included: Map::new(), _marker: PhantomData }
    }

    pub(crate) fn with_includes(mut self, includes: Vec<String>) -> Self {
        self.includes = includes;
        self
    }
}

impl<D: Document> LazyOperation for LazyLoadOperation<D> {
    fn create_request(&self) -> SessionResult<GetRequest> {
        let query = self
            .ids
            .iter()
            .map(|id| format!("id={}", escape_query_value(id)))
            .chain(self.includes.iter().map(|path| format!("include={}", escape_query_value(path))))
            .collect::<Vec<_>>()
            .join("&");

        Ok(GetRequest::new("/docs").with_query(format!("?{query}")))
    }

    fn handle_response(&mut self, response: GetResponse) -> SessionResult<()> {
        if response.status_code == 404 {
            self.parsed = Some(self.ids.iter().map(|_| None).collect());
            return Ok(());
        }

        let result = response.result.ok_or_else(|| missing_result("/docs"))?;
        let documents: GetDocumentsResult = from_value(result)?;

        if documents.results.len() != self.ids.len() {
            return Err(SessionError::UnexpectedResponse(format!(
                "requested {} documents, got {}",
                self.ids.len(),
                documents.results.len()
            )));
        }

        self.parsed = Some(parse_documents::<D>(&self.ids, documents.results)?);
        self.included = documents.includes;
        Ok(())
    }

    fn requires_retry(&self) -> bool {
        false
    }

    fn complete(
        self: Box<Self>,
        identity_map: &mut IdentityMap,
        no_tracking: bool,
    ) -> SessionResult<Box<dyn Any + Send>> {
        let parsed = self
            .parsed
            .ok_or_else(|| SessionError::UnexpectedResponse("lazy load was never answered".to_string()))?;

        let mut handles = Vec::with_capacity(self.ids.len());
        for (document, id) in parsed.into_iter().zip(&self.ids) {
            let handle = match (identity_map.handle_for(id), document) {
                (Some(handle), _) => Some(handle),
                (None, Some(document)) => document.track(identity_map, no_tracking)?,
                (None, None) => None,
            };
            handles.push(handle);
        }
        register_includes(identity_map, self.included);

        let value: Box<dyn Any + Send> = match self.shape {
            LoadShape::One => Box::new(handles.into_iter().next().flatten()),
            LoadShape::Many => Box::new(handles),
        };
        Ok(value)
    }
}

fn query_request(query: &IndexQuery) -> SessionResult<GetRequest> {
    Ok(GetRequest::new("/queries").with_method("POST").with_content(to_value(query)?))
}

fn parse_query_response(query: &IndexQuery, response: GetResponse) -> SessionResult<Option<QueryResult>> {
    let result = response.result.ok_or_else(|| missing_result("/queries"))?;
    let result: QueryResult = from_value(result)?;

    if result.is_stale && query.wait_for_non_stale_results {
        tracing::warn!(index = %result.index_name, "Query results are stale, retrying");
        return Ok(None);
    }

    Ok(Some(result))
}

/// Runs a query and tracks the matching documents.
pub struct LazyQueryOperation<D> {
    query: IndexQuery,
    parsed: Option<Vec<ParsedDocument>>,
    requires_retry: bool,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> LazyQueryOperation<D> {
    pub fn new(query: IndexQuery) -> Self {
        Self { query, parsed: None, requires_retry: false, _marker: PhantomData }
    }
}

impl<D: Document> LazyOperation for LazyQueryOperation<D> {
    fn create_request(&self) -> SessionResult<GetRequest> {
        query_request(&self.query)
    }

    fn handle_response(&mut self, response: GetResponse) -> SessionResult<()> {
        let Some(result) = parse_query_response(&self.query, response)? else {
            self.requires_retry = true;
            return Ok(());
        };

        self.requires_retry = false;
        self.parsed = Some(parse_query_results::<D>(result.results)?);
        Ok(())
    }

    fn requires_retry(&self) -> bool {
        self.requires_retry
    }

    fn complete(
        self: Box<Self>,
        identity_map: &mut IdentityMap,
        no_tracking: bool,
    ) -> SessionResult<Box<dyn Any + Send>> {
        let parsed = self
            .parsed
            .ok_or_else(|| SessionError::UnexpectedResponse("lazy query was never answered".to_string()))?;

        Ok(Box::new(track_query_results(parsed, identity_map, no_tracking)?))
    }
}

pub(crate) fn parse_query_results<D: Document>(results: Vec<Value>) -> SessionResult<Vec<ParsedDocument>> {
    results
        .into_iter()
        .map(|document| ParsedDocument::parse::<D>(document, None))
        .collect()
}

/// Counts the matches of a query without fetching them.
pub struct LazyCountOperation {
    query: IndexQuery,
    count: Option<usize>,
    requires_retry: bool,
}

impl LazyCountOperation {
    pub fn new(mut query: IndexQuery) -> Self {
        query.page_size = Some(0);
        Self { query, count: None, requires_retry: false }
    }
}

impl LazyOperation for LazyCountOperation {
    fn create_request(&self) -> SessionResult<GetRequest> {
        query_request(&self.query)
    }

    fn handle_response(&mut self, response: GetResponse) -> SessionResult<()> {
        let Some(result) = parse_query_response(&self.query, response)? else {
            self.requires_retry = true;
            return Ok(());
        };

        self.requires_retry = false;
        self.count = Some(result.total_results);
        Ok(())
    }

    fn requires_retry(&self) -> bool {
        self.requires_retry
    }

    fn complete(
        self: Box<Self>,
        _identity_map: &mut IdentityMap,
        _no_tracking: bool,
    ) -> SessionResult<Box<dyn Any + Send>> {
        let count = self
            .count
            .ok_or_else(|| SessionError::UnexpectedResponse("lazy count was never answered".to_string()))?;
        Ok(Box::new(count))
    }
}

type EvalCallback = Box<dyn FnOnce(&(dyn Any + Send)) + Send>;

enum SlotState {
    Pending,
    Materializing,
    Resolved(Box<dyn Any + Send>),
    Failed(SessionError),
}

impl fmt::Debug for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Pending => f.write_str("Pending"),
            SlotState::Materializing => f.write_str("Materializing"),
            SlotState::Resolved(_) => f.write_str("Resolved"),
            SlotState::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

struct QueuedOperation {
    slot: u64,
    operation: Box<dyn LazyOperation>,
    on_eval: Option<EvalCallback>,
}

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// The session's pending lazy operations and the state of every handle it gave out.
///
/// Resolved and failed slots are kept until the session is dropped so that reading a
/// handle again returns the cached outcome. Boxed results therefore live as long as the
/// session.
#[derive(Default)]
pub(crate) struct LazyQueue {
    queued: Vec<QueuedOperation>,
    slots: HashMap<u64, SlotState>,
}

impl fmt::Debug for LazyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQueue")
            .field("queued", &self.queued.len())
            .field("slots", &self.slots)
            .finish()
    }
}

fn typed_callback<T: 'static>(on_eval: Box<dyn FnOnce(&T) + Send>) -> EvalCallback {
    Box::new(move |value: &(dyn Any + Send)| {
        if let Some(value) = value.downcast_ref::<T>() {
            on_eval(value);
        }
    })
}

impl LazyQueue {
    fn next_slot(&mut self) -> u64 {
        NEXT_SLOT.fetch_add(1, Ordering::Relaxed)
    }

    /// Queues an operation whose result is a `T`.
    pub fn enqueue<T: 'static>(
        &mut self,
        operation: Box<dyn LazyOperation>,
        on_eval: Option<Box<dyn FnOnce(&T) + Send>>,
    ) -> Lazy<T> {
        let slot = self.next_slot();
        self.slots.insert(slot, SlotState::Pending);
        self.queued.push(QueuedOperation { slot, operation, on_eval: on_eval.map(typed_callback) });
        Lazy::new(slot)
    }

    /// Creates a handle that is already resolved. `on_eval` runs immediately.
    pub fn resolved<T: Send + 'static>(
        &mut self,
        value: T,
        on_eval: Option<Box<dyn FnOnce(&T) + Send>>,
    ) -> Lazy<T> {
        if let Some(on_eval) = on_eval {
            on_eval(&value);
        }

        let slot = self.next_slot();
        self.slots.insert(slot, SlotState::Resolved(Box::new(value)));
        Lazy::new(slot)
    }

    pub fn pending_len(&self) -> usize {
        self.queued.len()
    }

    /// The cached outcome for `lazy`, or `None` while it still needs a round trip.
    pub fn value<T: Clone + 'static>(&self, lazy: &Lazy<T>) -> Option<SessionResult<T>> {
        match self.slots.get(&lazy.slot) {
            None => Some(Err(SessionError::InvalidArgument(format!(
                "lazy handle {} does not belong to this session",
                lazy.slot
            )))),
            Some(SlotState::Pending | SlotState::Materializing) => None,
            Some(SlotState::Failed(error)) => Some(Err(error.clone())),
            Some(SlotState::Resolved(value)) => Some(value.downcast_ref::<T>().cloned().ok_or_else(|| {
                SessionError::UnexpectedResponse(format!("lazy handle {} holds another type", lazy.slot))
            })),
        }
    }

    /// Marks every queued operation as materializing and returns their sub-requests.
    ///
    /// Operations stay queued until [`complete`](Self::complete) or [`fail`](Self::fail), so an
    /// interrupted materialization can simply be run again.
    pub fn begin(&mut self) -> SessionResult<Vec<GetRequest>> {
        for queued in &self.queued {
            self.slots.insert(queued.slot, SlotState::Materializing);
        }

        self.queued.iter().map(|queued| queued.operation.create_request()).collect()
    }

    /// Feeds each operation its sub-response. Returns `true` when any of them asks for a retry.
    pub fn handle_responses(&mut self, responses: Vec<GetResponse>) -> SessionResult<bool> {
        if responses.len() != self.queued.len() {
            return Err(SessionError::UnexpectedResponse(format!(
                "sent {} lazy requests, got {} responses",
                self.queued.len(),
                responses.len()
            )));
        }

        let mut retry = false;
        for (queued, response) in self.queued.iter_mut().zip(responses) {
            if response.request_has_errors() {
                let message = response
                    .result
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "no response body".to_string());
                return Err(SessionError::Server { status: response.status_code, message });
            }

            queued.operation.handle_response(response)?;
            retry |= queued.operation.requires_retry();
        }

        Ok(retry)
    }

    /// Tracks every parsed result, resolves the handles and runs the callbacks in queue order.
    pub fn complete(&mut self, identity_map: &mut IdentityMap, no_tracking: bool) -> SessionResult<()> {
        let mut queued = std::mem::take(&mut self.queued).into_iter();

        while let Some(QueuedOperation { slot, operation, on_eval }) = queued.next() {
            match operation.complete(identity_map, no_tracking) {
                Ok(value) => {
                    if let Some(on_eval) = on_eval {
                        on_eval(&*value);
                    }
                    self.slots.insert(slot, SlotState::Resolved(value));
                }
                Err(error) => {
                    self.slots.insert(slot, SlotState::Failed(error.clone()));
                    for rest in queued {
                        self.slots.insert(rest.slot, SlotState::Failed(error.clone()));
                    }
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Fails every queued operation with `error`.
    pub fn fail(&mut self, error: &SessionError) {
        for queued in std::mem::take(&mut self.queued) {
            self.slots.insert(queued.slot, SlotState::Failed(error.clone()));
        }
    }
}
