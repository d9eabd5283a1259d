//! The document session: one unit of work against the server.
//!
//! A [`DocumentSession`] owns an [`IdentityMap`] and a queue of lazy operations. Reads
//! register entities, writes are only recorded, and [`DocumentSession::save_changes`] sends
//! everything that changed as one atomic batch.
//!
//! A session is not meant to be shared: every operation takes `&mut self`, so the borrow
//! checker enforces that nothing else runs while a request is in flight.
//!
//! # Example
//!
//! ```ignore
//! let mut session = store.open_session();
//!
//! let handle = session.load::<Order>("orders/1").await?.expect("order exists");
//! session.get_mut::<Order>(handle)?.freight += 10.0;
//!
//! let employee = session.lazily().load::<Employee>("employees/1")?;
//! let company = session.lazily().load::<Company>("companies/1")?;
//! // Both loads go out in one request here.
//! let employee = session.lazy_value(&employee).await?;
//!
//! session.save_changes().await?;
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use crate::{
    batch::BatchOperation,
    commands::{Command, CommandData, CommandResponse, GetRequest, PatchRequest},
    conventions::{DocumentConventions, SessionOptions},
    document::{Document, DocumentMetadata, IntoAnyDocument, split_metadata},
    error::{SessionError, SessionResult},
    include::{includes_loaded, register_includes, track_included},
    lazy::{
        Lazy, LazyCountOperation, LazyLoadOperation, LazyQueryOperation, LazyQueue, LoadShape,
        ResponseTimeInformation, ResponseTimeItem, parse_query_results,
    },
    load::{parse_documents, track_documents, track_query_results},
    query::{DocumentQuery, IndexQuery, QueryResult, RawQuery},
    tracking::{EntityHandle, EntityRef, IdentityMap, Snapshot},
    transport::RequestExecutor,
};

/// Identity and request counter of a session, passed along with every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    session_id: Uuid,
    database: Option<String>,
    request_count: u32,
    created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(database: Option<String>) -> Self {
        Self { session_id: Uuid::new_v4(), database, request_count: 0, created_at: Utc::now() }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Number of round trips made so far.
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn same_id(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn validate_id(id: &str) -> SessionResult<()> {
    if id.trim().is_empty() {
        return Err(SessionError::InvalidArgument("Id cannot be null or empty".to_string()));
    }
    Ok(())
}

/// A unit of work over documents.
#[derive(Debug)]
pub struct DocumentSession<'a, E: RequestExecutor> {
    executor: &'a E,
    conventions: &'a DocumentConventions,
    options: SessionOptions,
    info: SessionInfo,
    identity_map: IdentityMap,
    lazy: LazyQueue,
}

impl<'a, E: RequestExecutor> DocumentSession<'a, E> {
    pub fn new(executor: &'a E, conventions: &'a DocumentConventions, options: SessionOptions) -> Self {
        let info = SessionInfo::new(options.database().map(str::to_string));
        tracing::debug!(session = %info.session_id(), "Opening session");

        Self {
            executor,
            conventions,
            options,
            info,
            identity_map: IdentityMap::new(),
            lazy: LazyQueue::default(),
        }
    }

    pub fn session_info(&self) -> &SessionInfo {
        &self.info
    }

    /// Number of round trips this session has made.
    pub fn number_of_requests(&self) -> u32 {
        self.info.request_count
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn conventions(&self) -> &DocumentConventions {
        self.conventions
    }

    /// Read-only view of the tracked entities.
    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    fn max_requests(&self) -> u32 {
        self.options
            .max_requests()
            .unwrap_or_else(|| self.conventions.max_requests_per_session())
    }

    /// Sends one command, counting it against the request quota.
    #[tracing::instrument(level = "debug", skip_all, fields(command = command.name()))]
    async fn send(&mut self, command: Command) -> SessionResult<CommandResponse> {
        let max = self.max_requests();
        if self.info.request_count >= max {
            return Err(SessionError::RequestQuotaExceeded { max });
        }

        self.info.request_count += 1;
        tracing::debug!(
            session = %self.info.session_id,
            request = self.info.request_count,
            "Sending request"
        );

        self.executor.execute(command, &self.info).await
    }

    /// Tracks a new entity under a generated id.
    pub fn store<D: Document>(&mut self, entity: D) -> SessionResult<EntityHandle> {
        let id = self.conventions.generate_document_id(D::collection_name());
        self.store_with_change_vector(entity, &id, None)
    }

    /// Tracks a new entity under `id`.
    pub fn store_with_id<D: Document>(&mut self, entity: D, id: &str) -> SessionResult<EntityHandle> {
        self.store_with_change_vector(entity, id, None)
    }

    /// Tracks a new entity under `id`, saving it only if the server copy has `change_vector`.
    pub fn store_with_change_vector<D: Document>(
        &mut self,
        entity: D,
        id: &str,
        change_vector: Option<String>,
    ) -> SessionResult<EntityHandle> {
        self.identity_map.track_entity(
            id,
            EntityRef::Instance(entity.into_any_document()),
            Snapshot::New { change_vector },
        )
    }

    /// Loads one document. Returns `None` when it does not exist or was deleted in this session.
    pub async fn load<D: Document>(&mut self, id: &str) -> SessionResult<Option<EntityHandle>> {
        Ok(self.load_many::<D>(&[id]).await?.into_iter().next().flatten())
    }

    /// Loads several documents in one round trip, one slot per id.
    ///
    /// Ids already in the session are answered from the identity map. When all of them are,
    /// no request is made.
    pub async fn load_many<D: Document>(&mut self, ids: &[&str]) -> SessionResult<Vec<Option<EntityHandle>>> {
        self.load_with_includes::<D>(ids, &[]).await
    }

    /// Starts a load that also brings in the documents referenced by `path`.
    ///
    /// The referenced documents are kept by the session and become entities only when a
    /// later load asks for them, without another request.
    pub fn include(&mut self, path: impl Into<String>) -> IncludeLoader<'_, 'a, E> {
        IncludeLoader { session: self, includes: vec![path.into()] }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn load_with_includes<D: Document>(
        &mut self,
        ids: &[&str],
        includes: &[String],
    ) -> SessionResult<Vec<Option<EntityHandle>>> {
        let no_tracking = self.options.no_tracking();
        let mut slots = Vec::with_capacity(ids.len());
        let mut to_fetch: Vec<String> = Vec::new();

        for id in ids {
            validate_id(id)?;

            let deleted = self.identity_map.is_deleted(id);
            let mut handle = self.identity_map.handle_for(id);
            if handle.is_none() && !deleted {
                handle = track_included::<D>(&mut self.identity_map, id, no_tracking)?;
            }

            if handle.is_none() && !deleted && !to_fetch.iter().any(|fetch| same_id(fetch, id)) {
                to_fetch.push(id.to_string());
            }
            slots.push(handle);
        }

        // Includes are resolved from the server copies, so known ids are fetched too.
        if !includes.is_empty() && !includes_loaded(&self.identity_map, ids, includes) {
            for id in ids {
                if !self.identity_map.is_deleted(id) && !to_fetch.iter().any(|fetch| same_id(fetch, id)) {
                    to_fetch.push(id.to_string());
                }
            }
        }

        if to_fetch.is_empty() {
            return Ok(slots);
        }

        let command = Command::GetDocuments { ids: to_fetch.clone(), includes: includes.to_vec() };
        let result = self.send(command).await?.into_documents()?;
        if result.results.len() != to_fetch.len() {
            return Err(SessionError::UnexpectedResponse(format!(
                "requested {} documents, got {}",
                to_fetch.len(),
                result.results.len()
            )));
        }

        let parsed = parse_documents::<D>(&to_fetch, result.results)?;
        let fetched = track_documents(parsed, &mut self.identity_map, no_tracking)?;
        register_includes(&mut self.identity_map, result.includes);

        for (slot, id) in slots.iter_mut().zip(ids) {
            if slot.is_some() {
                continue;
            }
            if let Some(position) = to_fetch.iter().position(|fetch| same_id(fetch, id)) {
                *slot = fetched[position];
            }
        }

        Ok(slots)
    }

    /// Checks whether a document exists without loading it.
    pub async fn exists(&mut self, id: &str) -> SessionResult<bool> {
        validate_id(id)?;

        if self.identity_map.handle_for(id).is_some() {
            return Ok(true);
        }
        if self.identity_map.is_deleted(id) {
            return Ok(false);
        }

        Ok(self.send(Command::HeadDocument(id.to_string())).await?.into_head()?.is_some())
    }

    /// Reloads a tracked entity from the server, discarding local changes.
    pub async fn refresh(&mut self, handle: EntityHandle) -> SessionResult<()> {
        let id = self.identity_map.tracked(handle)?.id().to_string();

        let command = Command::GetDocuments { ids: vec![id.clone()], includes: Vec::new() };
        let result = self.send(command).await?.into_documents()?;
        let document = result.results.into_iter().next().flatten().ok_or_else(|| {
            SessionError::UnexpectedResponse(format!(
                "document {id} no longer exists and was probably deleted"
            ))
        })?;

        let (body, mut metadata) = split_metadata(document)?;
        if metadata.id.is_empty() {
            metadata.id = id;
        }

        self.identity_map.refresh_from_server(handle, Value::Object(body), metadata)
    }

    /// Typed access to a tracked entity.
    pub fn get<D: Document>(&self, handle: EntityHandle) -> SessionResult<&D> {
        self.identity_map.entity::<D>(handle)
    }

    /// Typed mutable access to a tracked entity. Changes are picked up by the next flush.
    pub fn get_mut<D: Document>(&mut self, handle: EntityHandle) -> SessionResult<&mut D> {
        self.identity_map.entity_mut::<D>(handle)
    }

    pub fn id_of(&self, handle: EntityHandle) -> SessionResult<&str> {
        Ok(self.identity_map.tracked(handle)?.id())
    }

    pub fn change_vector_of(&self, handle: EntityHandle) -> SessionResult<Option<&str>> {
        Ok(self.identity_map.tracked(handle)?.change_vector())
    }

    pub fn metadata_for(&self, handle: EntityHandle) -> SessionResult<&DocumentMetadata> {
        Ok(self.identity_map.tracked(handle)?.metadata())
    }

    /// Whether `id` is tracked by this session or held as an include.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.identity_map.handle_for(id).is_some() || self.identity_map.is_included(id)
    }

    /// Whether a flush would send anything.
    pub fn has_changes(&self) -> SessionResult<bool> {
        Ok(!self.identity_map.compute_change_set()?.is_empty())
    }

    pub fn has_changed(&self, handle: EntityHandle) -> SessionResult<bool> {
        self.identity_map.has_changed(handle)
    }

    /// Marks a tracked entity for deletion.
    pub fn delete(&mut self, handle: EntityHandle) -> SessionResult<()> {
        let tracked = self.identity_map.tracked(handle)?;
        if tracked.is_read_only() {
            return Err(SessionError::NotTracked(tracked.id().to_string()));
        }

        let id = tracked.id().to_string();
        self.identity_map.mark_deleted(&id)
    }

    /// Deletes a document by id. Untracked ids are deleted with a deferred command.
    pub fn delete_by_id(&mut self, id: &str, change_vector: Option<String>) -> SessionResult<()> {
        if self.identity_map.handle_for(id).is_some() {
            return self.identity_map.mark_deleted(id);
        }
        if self.identity_map.is_deleted(id) {
            tracing::trace!(id, "Document already pending deletion");
            return Ok(());
        }

        let command = CommandData::delete(id, change_vector)?;
        self.identity_map.defer(command);
        Ok(())
    }

    /// Sends `command` with the next flush, ordered among the tracked changes.
    pub fn defer(&mut self, command: CommandData) {
        self.identity_map.defer(command);
    }

    /// Patches a document on the server with the next flush.
    pub fn patch(&mut self, id: &str, patch: PatchRequest) -> SessionResult<()> {
        let command = CommandData::patch(id, None, patch, None)?;
        self.identity_map.defer(command);
        Ok(())
    }

    /// Stops tracking an entity. Pending changes to it are discarded.
    pub fn evict(&mut self, handle: EntityHandle) -> SessionResult<()> {
        self.identity_map.evict(handle)
    }

    /// Stops tracking everything and drops deferred commands.
    pub fn clear(&mut self) {
        self.identity_map.clear();
    }

    /// Runs a query and tracks the matching documents.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn query<D: Document>(&mut self, query: &DocumentQuery) -> SessionResult<Vec<EntityHandle>> {
        self.query_index::<D>(query.to_index_query()?).await
    }

    /// Runs RQL text as written and tracks the matching documents.
    #[tracing::instrument(level = "debug", skip_all, fields(query = query.query()))]
    pub async fn raw_query<D: Document>(&mut self, query: &RawQuery) -> SessionResult<Vec<EntityHandle>> {
        self.query_index::<D>(query.to_index_query()?).await
    }

    async fn query_index<D: Document>(&mut self, index_query: IndexQuery) -> SessionResult<Vec<EntityHandle>> {
        let result = self.run_query(index_query).await?;

        let no_tracking = self.options.no_tracking();
        let parsed = parse_query_results::<D>(result.results)?;

        track_query_results(parsed, &mut self.identity_map, no_tracking)
    }

    /// Counts the matches of a query.
    pub async fn count(&mut self, query: &DocumentQuery) -> SessionResult<usize> {
        let mut index_query = query.to_index_query()?;
        index_query.page_size = Some(0);

        Ok(self.run_query(index_query).await?.total_results)
    }

    async fn run_query(&mut self, query: IndexQuery) -> SessionResult<QueryResult> {
        let max_retries = self.conventions.max_lazy_retries();
        let mut retries = 0;

        loop {
            let result = self.send(Command::Query(query.clone())).await?.into_query()?;
            if !(result.is_stale && query.wait_for_non_stale_results) {
                return Ok(result);
            }

            retries += 1;
            if retries > max_retries {
                return Err(SessionError::Transport(format!(
                    "query results were still stale after {max_retries} retries"
                )));
            }
            tracing::warn!(retries, index = %result.index_name, "Query results are stale, retrying");
        }
    }

    /// Sends every tracked change as one atomic batch.
    ///
    /// Does nothing, and makes no request, when nothing changed. On failure the session is
    /// left exactly as it was, so the caller may fix the conflict and try again.
    #[tracing::instrument(level = "debug", skip(self), fields(session = %self.info.session_id))]
    pub async fn save_changes(&mut self) -> SessionResult<()> {
        let change_set = self.identity_map.compute_change_set()?;
        let Some(batch) = BatchOperation::from_change_set(change_set)? else {
            tracing::trace!("No changes to save");
            return Ok(());
        };

        tracing::debug!(commands = batch.len(), "Saving changes");

        let result = self.send(Command::Batch(batch.commands().to_vec())).await?.into_batch()?;
        batch.set_result(result, &mut self.identity_map)
    }

    /// Lazy variants of the read operations.
    pub fn lazily(&mut self) -> LazySessionOperations<'_, 'a, E> {
        LazySessionOperations { session: self }
    }

    pub fn number_of_pending_lazy_operations(&self) -> usize {
        self.lazy.pending_len()
    }

    pub fn has_pending_lazy_operations(&self) -> bool {
        self.lazy.pending_len() > 0
    }

    /// Returns the value behind a lazy handle, materializing every pending lazy operation
    /// first if needed.
    pub async fn lazy_value<T: Clone + 'static>(&mut self, lazy: &Lazy<T>) -> SessionResult<T> {
        if let Some(value) = self.lazy.value(lazy) {
            return value;
        }

        self.execute_all_pending_lazy_operations().await?;

        self.lazy.value(lazy).unwrap_or_else(|| {
            Err(SessionError::UnexpectedResponse(format!("{lazy:?} was not materialized")))
        })
    }

    /// Sends every pending lazy operation in one request and resolves their handles.
    ///
    /// On failure, every handle involved is failed with the same error and nothing is
    /// tracked.
    #[tracing::instrument(level = "debug", skip(self), fields(pending = self.lazy.pending_len()))]
    pub async fn execute_all_pending_lazy_operations(&mut self) -> SessionResult<ResponseTimeInformation> {
        if self.lazy.pending_len() == 0 {
            return Ok(ResponseTimeInformation::default());
        }

        let started = Instant::now();
        match self.materialize().await {
            Ok(mut timings) => {
                timings.total_client_duration = started.elapsed();
                Ok(timings)
            }
            Err(error) => {
                tracing::debug!(%error, "Lazy operations failed");
                self.lazy.fail(&error);
                Err(error)
            }
        }
    }

    async fn materialize(&mut self) -> SessionResult<ResponseTimeInformation> {
        let max_retries = self.conventions.max_lazy_retries();
        let mut timings = ResponseTimeInformation::default();
        let mut retries = 0;

        loop {
            let requests = self.lazy.begin()?;
            let urls: Vec<String> = requests.iter().map(GetRequest::url_and_query).collect();

            let responses = self.send(Command::MultiGet(requests)).await?.into_multi_get()?;

            timings.duration_breakdown = urls
                .into_iter()
                .zip(&responses)
                .map(|(url, response)| ResponseTimeItem {
                    url,
                    duration: response.request_time().unwrap_or_default(),
                })
                .collect();

            if !self.lazy.handle_responses(responses)? {
                break;
            }

            retries += 1;
            if retries > max_retries {
                return Err(SessionError::Transport(format!(
                    "lazy operations still required a retry after {max_retries} retries"
                )));
            }
            tracing::warn!(retries, "Lazy operations asked for a retry");
        }

        timings.compute_server_total();
        self.lazy.complete(&mut self.identity_map, self.options.no_tracking())?;

        Ok(timings)
    }
}

/// Queues lazy reads on a session. Obtained from [`DocumentSession::lazily`].
pub struct LazySessionOperations<'s, 'a, E: RequestExecutor> {
    session: &'s mut DocumentSession<'a, E>,
}

type OnEval<T> = Option<Box<dyn FnOnce(&T) + Send>>;

impl<'s, 'a, E: RequestExecutor> LazySessionOperations<'s, 'a, E> {
    /// Lazily loads one document.
    pub fn load<D: Document>(self, id: &str) -> SessionResult<Lazy<Option<EntityHandle>>> {
        self.load_internal::<D>(id, None)
    }

    /// Lazily loads one document and calls `on_eval` once the result is known.
    pub fn load_with<D, F>(self, id: &str, on_eval: F) -> SessionResult<Lazy<Option<EntityHandle>>>
    where
        D: Document,
        F: FnOnce(&Option<EntityHandle>) + Send + 'static,
    {
        self.load_internal::<D>(id, Some(Box::new(on_eval)))
    }

    fn load_internal<D: Document>(
        self,
        id: &str,
        on_eval: OnEval<Option<EntityHandle>>,
    ) -> SessionResult<Lazy<Option<EntityHandle>>> {
        queue_load::<E, D, _>(self.session, &[id], Vec::new(), LoadShape::One, on_eval, first_slot)
    }

    /// Lazily loads several documents, one slot per id.
    pub fn load_many<D: Document>(self, ids: &[&str]) -> SessionResult<Lazy<Vec<Option<EntityHandle>>>> {
        self.load_many_internal::<D>(ids, None)
    }

    pub fn load_many_with<D, F>(self, ids: &[&str], on_eval: F) -> SessionResult<Lazy<Vec<Option<EntityHandle>>>>
    where
        D: Document,
        F: FnOnce(&Vec<Option<EntityHandle>>) + Send + 'static,
    {
        self.load_many_internal::<D>(ids, Some(Box::new(on_eval)))
    }

    fn load_many_internal<D: Document>(
        self,
        ids: &[&str],
        on_eval: OnEval<Vec<Option<EntityHandle>>>,
    ) -> SessionResult<Lazy<Vec<Option<EntityHandle>>>> {
        queue_load::<E, D, _>(self.session, ids, Vec::new(), LoadShape::Many, on_eval, |handles| handles)
    }

    /// Starts a lazy load that also brings in the documents referenced by `path`.
    pub fn include(self, path: impl Into<String>) -> LazyIncludeLoader<'s, 'a, E> {
        LazyIncludeLoader { session: self.session, includes: vec![path.into()] }
    }

    /// Lazily runs a query.
    pub fn query<D: Document>(self, query: &DocumentQuery) -> SessionResult<Lazy<Vec<EntityHandle>>> {
        let operation = LazyQueryOperation::<D>::new(query.to_index_query()?);
        Ok(self.session.lazy.enqueue(Box::new(operation), None))
    }

    pub fn query_with<D, F>(self, query: &DocumentQuery, on_eval: F) -> SessionResult<Lazy<Vec<EntityHandle>>>
    where
        D: Document,
        F: FnOnce(&Vec<EntityHandle>) + Send + 'static,
    {
        let operation = LazyQueryOperation::<D>::new(query.to_index_query()?);
        let on_eval: OnEval<Vec<EntityHandle>> = Some(Box::new(on_eval));
        Ok(self.session.lazy.enqueue(Box::new(operation), on_eval))
    }

    /// Lazily runs RQL text as written.
    pub fn raw_query<D: Document>(self, query: &RawQuery) -> SessionResult<Lazy<Vec<EntityHandle>>> {
        let operation = LazyQueryOperation::<D>::new(query.to_index_query()?);
        Ok(self.session.lazy.enqueue(Box::new(operation), None))
    }

    /// Lazily counts the matches of a query.
    pub fn count(self, query: &DocumentQuery) -> SessionResult<Lazy<usize>> {
        let operation = LazyCountOperation::new(query.to_index_query()?);
        Ok(self.session.lazy.enqueue(Box::new(operation), None))
    }
}

fn first_slot(handles: Vec<Option<EntityHandle>>) -> Option<EntityHandle> {
    handles.into_iter().next().flatten()
}

/// Queues a lazy load, or resolves it at once when the session can already answer it.
///
/// Included documents asked for are turned into entities here. The load still goes to the
/// server when any id is unknown or, with includes, when a referenced document is missing.
fn queue_load<E, D, T>(
    session: &mut DocumentSession<'_, E>,
    ids: &[&str],
    includes: Vec<String>,
    shape: LoadShape,
    on_eval: OnEval<T>,
    pick: fn(Vec<Option<EntityHandle>>) -> T,
) -> SessionResult<Lazy<T>>
where
    E: RequestExecutor,
    D: Document,
    T: Send + 'static,
{
    for id in ids {
        validate_id(id)?;
    }
    let no_tracking = session.options.no_tracking();

    let mut known = Vec::with_capacity(ids.len());
    for id in ids {
        known.push(match session.identity_map.handle_for(id) {
            Some(handle) => Some(Some(handle)),
            None if session.identity_map.is_deleted(id) => Some(None),
            None => track_included::<D>(&mut session.identity_map, id, no_tracking)?.map(Some),
        });
    }

    let known: Option<Vec<Option<EntityHandle>>> = known.into_iter().collect();
    if let Some(handles) = known {
        if includes.is_empty() || includes_loaded(&session.identity_map, ids, &includes) {
            return Ok(session.lazy.resolved(pick(handles), on_eval));
        }
    }

    let ids = ids.iter().map(|id| id.to_string()).collect();
    let operation = LazyLoadOperation::<D>::new(ids, shape).with_includes(includes);
    Ok(session.lazy.enqueue(Box::new(operation), on_eval))
}

/// A load with include paths. Obtained from [`DocumentSession::include`].
///
/// # Example
///
/// ```ignore
/// let order = session
///     .include("Company")
///     .include("Lines.Product")
///     .load::<Order>("orders/1")
///     .await?;
///
/// // Answered from the includes, no request.
/// let company = session.load::<Company>("companies/1").await?;
/// ```
pub struct IncludeLoader<'s, 'a, E: RequestExecutor> {
    session: &'s mut DocumentSession<'a, E>,
    includes: Vec<String>,
}

impl<'s, 'a, E: RequestExecutor> IncludeLoader<'s, 'a, E> {
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    pub async fn load<D: Document>(self, id: &str) -> SessionResult<Option<EntityHandle>> {
        Ok(self.load_many::<D>(&[id]).await?.into_iter().next().flatten())
    }

    pub async fn load_many<D: Document>(self, ids: &[&str]) -> SessionResult<Vec<Option<EntityHandle>>> {
        self.session.load_with_includes::<D>(ids, &self.includes).await
    }
}

/// A lazy load with include paths. Obtained from [`LazySessionOperations::include`].
pub struct LazyIncludeLoader<'s, 'a, E: RequestExecutor> {
    session: &'s mut DocumentSession<'a, E>,
    includes: Vec<String>,
}

impl<'s, 'a, E: RequestExecutor> LazyIncludeLoader<'s, 'a, E> {
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    pub fn load<D: Document>(self, id: &str) -> SessionResult<Lazy<Option<EntityHandle>>> {
        queue_load::<E, D, _>(self.session, &[id], self.includes, LoadShape::One, None, first_slot)
    }

    pub fn load_many<D: Document>(self, ids: &[&str]) -> SessionResult<Lazy<Vec<Option<EntityHandle>>>> {
        queue_load::<E, D, _>(self.session, ids, self.includes, LoadShape::Many, None, |handles| handles)
    }
}
