//! Identity map and change tracking for a session.
//!
//! The [`IdentityMap`] guarantees at most one tracked entity per document id. Entities live
//! in an arena keyed by an opaque [`EntityHandle`] handed out at tracking time, with a side
//! index from (case-insensitive) document id to handle.
//!
//! # Change detection
//!
//! Dirtiness is decided by structural comparison: at flush time every loaded entity is
//! serialized to JSON and compared with the snapshot taken when it was loaded or last
//! saved. Two calls to [`IdentityMap::compute_change_set`] with no mutation in between
//! produce equal change sets.
//!
//! # Ordering
//!
//! Every registration (tracking an entity, marking it deleted, deferring a command) takes
//! the next value of a per-map sequence. Change sets are sorted by that sequence, which is
//! what lets the batch orchestrator preserve first-registered, first-applied order.

use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    commands::{CommandData, CommandType},
    document::{AnyDocument, Document, DocumentMetadata},
    error::{SessionError, SessionResult},
};

/// Opaque identity of a tracked entity.
///
/// Values are unique across the process, so a handle never resolves in a session other
/// than the one that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl EntityHandle {
    fn next() -> Self {
        EntityHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The entity side of a tracking request.
pub enum EntityRef {
    /// An entity already in the arena.
    Handle(EntityHandle),
    /// A new entity instance to move into the arena.
    Instance(Box<dyn AnyDocument>),
}

/// What the server is known to hold for an entity at tracking time.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Never persisted. `change_vector`, when set, is sent as a precondition with the first PUT.
    New { change_vector: Option<String> },
    /// Loaded from the server, `state` being the document body without `@metadata`.
    Loaded { state: Value, metadata: DocumentMetadata },
}

/// One entry of the identity map.
pub struct TrackedEntity {
    id: String,
    handle: EntityHandle,
    entity: Box<dyn AnyDocument>,
    original_state: Value,
    change_vector: Option<String>,
    metadata: DocumentMetadata,
    is_new: bool,
    is_deleted: bool,
    read_only: bool,
    sequence: u64,
}

impl TrackedEntity {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    pub fn entity(&self) -> &dyn AnyDocument {
        self.entity.as_ref()
    }

    /// The last state known to be on the server (`Null` for new entities).
    pub fn original_state(&self) -> &Value {
        &self.original_state
    }

    pub fn change_vector(&self) -> Option<&str> {
        self.change_vector.as_deref()
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// Whether the entity was loaded by a no-tracking session and is ignored at flush time.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_dirty(&self) -> SessionResult<bool> {
        if self.read_only {
            return Ok(false);
        }
        if self.is_new {
            return Ok(true);
        }

        let current = self.entity.to_any_json()?;
        let dirty = current != self.original_state;
        tracing::trace!(id = %self.id, handle = %self.handle, dirty, "Dirty check result");
        Ok(dirty)
    }
}

impl fmt::Debug for TrackedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEntity")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("collection", &self.entity.document_collection())
            .field("change_vector", &self.change_vector)
            .field("is_new", &self.is_new)
            .field("is_deleted", &self.is_deleted)
            .field("read_only", &self.read_only)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// A create or update found by change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPut {
    pub handle: EntityHandle,
    pub id: String,
    pub collection: &'static str,
    pub change_vector: Option<String>,
    /// Current entity state, without `@metadata`.
    pub document: Value,
    pub sequence: u64,
}

/// A deletion of a persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelete {
    pub handle: EntityHandle,
    pub id: String,
    pub change_vector: Option<String>,
    pub sequence: u64,
}

/// A command registered directly with the session.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub command: CommandData,
    pub sequence: u64,
}

/// Everything a flush would send, each group sorted by registration sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub to_create: Vec<PendingPut>,
    pub to_update: Vec<PendingPut>,
    pub to_delete: Vec<PendingDelete>,
    pub deferred: Vec<PendingCommand>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_delete.is_empty()
            && self.deferred.is_empty()
    }

    /// Total number of commands this change set produces.
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len() + self.deferred.len()
    }
}

fn id_key(id: &str) -> String {
    id.to_lowercase()
}

/// Maps document ids to tracked entities and detects their modifications.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entities: BTreeMap<EntityHandle, TrackedEntity>,
    by_id: HashMap<String, EntityHandle>,
    deferred: Vec<PendingCommand>,
    /// Raw documents received as includes, keyed by lowercased id.
    included: HashMap<String, Value>,
    next_sequence: u64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Registers an entity under `id`.
    ///
    /// Tracking the handle already registered under `id` is a no-op returning that handle.
    /// Any other entity under a tracked id fails with
    /// [`SessionError::DuplicateTracking`].
    #[tracing::instrument(level = "trace", skip(self, entity, snapshot))]
    pub fn track_entity(
        &mut self,
        id: &str,
        entity: EntityRef,
        snapshot: Snapshot,
    ) -> SessionResult<EntityHandle> {
        if id.trim().is_empty() {
            return Err(SessionError::InvalidArgument("Id cannot be null or empty".to_string()));
        }

        if let Some(existing) = self.by_id.get(&id_key(id)) {
            return match entity {
                EntityRef::Handle(handle) if handle == *existing => Ok(handle),
                _ => Err(SessionError::DuplicateTracking(id.to_string())),
            };
        }

        // A server copy may not come back under an id this session is deleting.
        if matches!(snapshot, Snapshot::Loaded { .. }) && self.is_deleted(id) {
            return Err(SessionError::DuplicateTracking(id.to_string()));
        }

        let entity = match entity {
            EntityRef::Instance(entity) => entity,
            EntityRef::Handle(handle) => {
                return Err(match self.entities.get(&handle) {
                    Some(tracked) => SessionError::InvalidArgument(format!(
                        "entity {handle} is already tracked as {}",
                        tracked.id
                    )),
                    None => SessionError::NotTracked(handle.to_string()),
                });
            }
        };

        let handle = EntityHandle::next();
        let sequence = self.next_sequence();

        let (original_state, change_vector, metadata, is_new) = match snapshot {
            Snapshot::New { change_vector } => {
                let metadata = DocumentMetadata {
                    id: id.to_string(),
                    collection: Some(entity.document_collection().to_string()),
                    change_vector: change_vector.clone(),
                    last_modified: None,
                };
                (Value::Null, change_vector, metadata, true)
            }
            Snapshot::Loaded { state, metadata } => {
                (state, metadata.change_vector.clone(), metadata, false)
            }
        };

        tracing::trace!(id, %handle, is_new, "Tracking entity");

        self.included.remove(&id_key(id));
        self.by_id.insert(id_key(id), handle);
        self.entities.insert(
            handle,
            TrackedEntity {
                id: id.to_string(),
                handle,
                entity,
                original_state,
                change_vector,
                metadata,
                is_new,
                is_deleted: false,
                read_only: false,
                sequence,
            },
        );

        Ok(handle)
    }

    /// Stores a loaded entity in the arena without indexing it by id.
    ///
    /// The entity is readable through its handle but never part of a change set.
    pub fn attach_untracked(
        &mut self,
        id: &str,
        entity: Box<dyn AnyDocument>,
        state: Value,
        metadata: DocumentMetadata,
    ) -> SessionResult<EntityHandle> {
        let handle = EntityHandle::next();
        let sequence = self.next_sequence();

        self.entities.insert(
            handle,
            TrackedEntity {
                id: id.to_string(),
                handle,
                entity,
                original_state: state,
                change_vector: metadata.change_vector.clone(),
                metadata,
                is_new: false,
                is_deleted: false,
                read_only: true,
                sequence,
            },
        );

        Ok(handle)
    }

    /// Marks the entity tracked under `id` for deletion.
    ///
    /// A new entity is simply forgotten, since nothing exists on the server to delete.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn mark_deleted(&mut self, id: &str) -> SessionResult<()> {
        let handle = self
            .by_id
            .remove(&id_key(id))
            .ok_or_else(|| SessionError::NotTracked(id.to_string()))?;

        let sequence = self.next_sequence();

        let forget = match self.entities.get_mut(&handle) {
            Some(tracked) if tracked.is_new => true,
            Some(tracked) => {
                tracked.is_deleted = true;
                tracked.sequence = sequence;
                false
            }
            None => return Err(SessionError::NotTracked(id.to_string())),
        };

        if forget {
            tracing::trace!(id, %handle, "Deleted entity was never saved, dropping it");
            self.entities.remove(&handle);
        }

        Ok(())
    }

    /// Registers a raw command to be sent with the next flush.
    pub fn defer(&mut self, command: CommandData) {
        if command.command_type() == CommandType::Delete {
            self.included.remove(&id_key(command.id()));
        }
        let sequence = self.next_sequence();
        self.deferred.push(PendingCommand { command, sequence });
    }

    /// Compares every tracked entity with its snapshot.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn compute_change_set(&self) -> SessionResult<ChangeSet> {
        let mut change_set = ChangeSet { deferred: self.deferred.clone(), ..ChangeSet::default() };

        for tracked in self.entities.values().filter(|t| !t.read_only) {
            if tracked.is_deleted {
                change_set.to_delete.push(PendingDelete {
                    handle: tracked.handle,
                    id: tracked.id.clone(),
                    change_vector: tracked.change_vector.clone(),
                    sequence: tracked.sequence,
                });
                continue;
            }

            if !tracked.is_dirty()? {
                continue;
            }

            let pending = PendingPut {
                handle: tracked.handle,
                id: tracked.id.clone(),
                collection: tracked.entity.document_collection(),
                change_vector: tracked.change_vector.clone(),
                document: tracked.entity.to_any_json()?,
                sequence: tracked.sequence,
            };

            if tracked.is_new {
                change_set.to_create.push(pending);
            } else {
                change_set.to_update.push(pending);
            }
        }

        change_set.to_create.sort_by_key(|p| p.sequence);
        change_set.to_update.sort_by_key(|p| p.sequence);
        change_set.to_delete.sort_by_key(|p| p.sequence);

        tracing::debug!(
            creates = change_set.to_create.len(),
            updates = change_set.to_update.len(),
            deletes = change_set.to_delete.len(),
            deferred = change_set.deferred.len(),
            "Computed change set"
        );

        Ok(change_set)
    }

    /// Records what the server now holds for `id` after a successful flush.
    pub fn apply_server_result(
        &mut self,
        id: &str,
        new_change_vector: Option<String>,
        new_state: Value,
    ) -> SessionResult<()> {
        let tracked = self.tracked_by_id_mut(id)?;

        tracked.original_state = new_state;
        tracked.metadata.change_vector = new_change_vector.clone();
        tracked.change_vector = new_change_vector;
        tracked.is_new = false;

        Ok(())
    }

    /// Replaces both the entity and its snapshot with a fresh server copy.
    ///
    /// The snapshot is taken from the rebuilt entity, not from `body`.
    pub fn refresh_from_server(
        &mut self,
        handle: EntityHandle,
        body: Value,
        metadata: DocumentMetadata,
    ) -> SessionResult<()> {
        let tracked = self.tracked_mut(handle)?;

        let mut entity = tracked.entity.clone_box();
        entity.replace_from_json(body)?;
        let state = entity.to_any_json()?;

        tracked.entity = entity;
        tracked.original_state = state;
        tracked.change_vector = metadata.change_vector.clone();
        tracked.metadata = metadata;
        tracked.is_new = false;

        Ok(())
    }

    /// Installs an already rebuilt entity together with the state it was built from.
    pub(crate) fn replace_entity(
        &mut self,
        handle: EntityHandle,
        entity: Box<dyn AnyDocument>,
        state: Value,
        metadata: DocumentMetadata,
    ) -> SessionResult<()> {
        let tracked = self.tracked_mut(handle)?;

        tracked.entity = entity;
        tracked.original_state = state;
        tracked.change_vector = metadata.change_vector.clone();
        tracked.metadata = metadata;
        tracked.is_new = false;

        Ok(())
    }

    pub(crate) fn metadata_mut(&mut self, handle: EntityHandle) -> SessionResult<&mut DocumentMetadata> {
        Ok(&mut self.tracked_mut(handle)?.metadata)
    }

    /// Drops an entity whose deletion the server has acknowledged.
    pub(crate) fn forget_deleted(&mut self, handle: EntityHandle) {
        if self.entities.get(&handle).is_some_and(|t| t.is_deleted) {
            self.entities.remove(&handle);
        }
    }

    pub(crate) fn clear_deferred(&mut self) {
        self.deferred.clear();
    }

    /// Stops tracking an entity. Nothing is sent to the server for it.
    pub fn evict(&mut self, handle: EntityHandle) -> SessionResult<()> {
        let tracked = self
            .entities
            .remove(&handle)
            .ok_or_else(|| SessionError::NotTracked(handle.to_string()))?;

        if self.by_id.get(&id_key(&tracked.id)) == Some(&handle) {
            self.by_id.remove(&id_key(&tracked.id));
        }

        Ok(())
    }

    /// Stops tracking everything, including deferred commands.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_id.clear();
        self.deferred.clear();
        self.included.clear();
    }

    /// Keeps the raw server copy of a document that arrived as an include.
    pub fn register_included(&mut self, id: &str, document: Value) {
        self.included.insert(id_key(id), document);
    }

    /// The raw included document for `id`, if one is held.
    pub fn included(&self, id: &str) -> Option<&Value> {
        self.included.get(&id_key(id))
    }

    pub fn is_included(&self, id: &str) -> bool {
        self.included.contains_key(&id_key(id))
    }

    pub(crate) fn forget_included(&mut self, id: &str) {
        self.included.remove(&id_key(id));
    }

    /// Returns the live (not deleted) handle tracked under `id`.
    pub fn handle_for(&self, id: &str) -> Option<EntityHandle> {
        self.by_id.get(&id_key(id)).copied()
    }

    /// Returns `true` when `id` has a pending deletion in this session.
    pub fn is_deleted(&self, id: &str) -> bool {
        let key = id_key(id);

        self.entities
            .values()
            .any(|t| t.is_deleted && id_key(&t.id) == key)
            || self.deferred.iter().any(|p| {
                p.command.command_type() == CommandType::Delete && id_key(p.command.id()) == key
            })
    }

    pub fn tracked(&self, handle: EntityHandle) -> SessionResult<&TrackedEntity> {
        match self.entities.get(&handle) {
            Some(tracked) if !tracked.is_deleted => Ok(tracked),
            Some(tracked) => Err(SessionError::NotTracked(tracked.id.clone())),
            None => Err(SessionError::NotTracked(handle.to_string())),
        }
    }

    fn tracked_mut(&mut self, handle: EntityHandle) -> SessionResult<&mut TrackedEntity> {
        match self.entities.get_mut(&handle) {
            Some(tracked) if !tracked.is_deleted => Ok(tracked),
            Some(tracked) => Err(SessionError::NotTracked(tracked.id.clone())),
            None => Err(SessionError::NotTracked(handle.to_string())),
        }
    }

    fn tracked_by_id_mut(&mut self, id: &str) -> SessionResult<&mut TrackedEntity> {
        let handle = self
            .handle_for(id)
            .ok_or_else(|| SessionError::NotTracked(id.to_string()))?;
        self.tracked_mut(handle)
    }

    /// Typed access to a tracked entity.
    pub fn entity<D: Document>(&self, handle: EntityHandle) -> SessionResult<&D> {
        let tracked = self.tracked(handle)?;
        let actual = tracked.entity.document_collection();

        tracked.entity.downcast_ref::<D>().ok_or_else(|| SessionError::TypeMismatch {
            id: tracked.id.clone(),
            actual,
            requested: D::collection_name(),
        })
    }

    /// Typed mutable access to a tracked entity.
    pub fn entity_mut<D: Document>(&mut self, handle: EntityHandle) -> SessionResult<&mut D> {
        let tracked = self.tracked_mut(handle)?;
        let id = tracked.id.clone();
        let actual = tracked.entity.document_collection();

        tracked.entity.downcast_mut::<D>().ok_or(SessionError::TypeMismatch {
            id,
            actual,
            requested: D::collection_name(),
        })
    }

    /// Returns `true` when the entity differs from its snapshot or was never saved.
    pub fn has_changed(&self, handle: EntityHandle) -> SessionResult<bool> {
        self.tracked(handle)?.is_dirty()
    }

    /// Number of live tracked entities.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
