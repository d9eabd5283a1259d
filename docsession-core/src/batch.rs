//! Turning a change set into one ordered batch and reconciling its result.
//!
//! Commands are emitted deletes first, then puts and patches, each group in registration
//! order. A result is checked against the request in full before any tracked state is
//! touched, so a rejected or malformed response leaves the identity map as it was.

use serde_json::{Map, Value};

use crate::{
    commands::{BatchResult, BatchResultItem, CommandData, CommandType},
    document::{AnyDocument, DocumentMetadata, METADATA_KEY, split_metadata},
    error::{SessionError, SessionResult},
    tracking::{ChangeSet, EntityHandle, IdentityMap, PendingPut},
};

/// What to do with the result of one command.
#[derive(Debug, Clone, PartialEq)]
enum ResultAction {
    /// Record the acknowledged state of a tracked entity.
    Saved { handle: EntityHandle, id: String, state: Value },
    /// Drop an entity whose deletion went through.
    Deleted { handle: EntityHandle },
    /// A deferred command. Patches may refresh a tracked entity.
    Deferred,
}

/// One flush worth of commands, ready to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    commands: Vec<CommandData>,
    actions: Vec<ResultAction>,
}

fn put_command(pending: &PendingPut) -> SessionResult<CommandData> {
    let Value::Object(body) = &pending.document else {
        return Err(SessionError::InvalidArgument(format!(
            "entity {} must serialize to a JSON object",
            pending.id
        )));
    };

    let mut metadata = Map::new();
    metadata.insert("@collection".to_string(), Value::String(pending.collection.to_string()));

    let mut document = body.clone();
    document.insert(METADATA_KEY.to_string(), Value::Object(metadata));

    CommandData::put(pending.id.clone(), pending.change_vector.clone(), Value::Object(document))
}

/// Staged outcome of a command, computed before anything is written back.
enum Staged {
    Saved { handle: EntityHandle, id: String, state: Value, metadata: DocumentMetadata },
    Deleted { handle: EntityHandle },
    Refreshed { handle: EntityHandle, entity: Box<dyn AnyDocument>, state: Value, metadata: DocumentMetadata },
    Nothing,
}

impl BatchOperation {
    /// Orders a change set into commands. Returns `None` when there is nothing to send.
    pub fn from_change_set(change_set: ChangeSet) -> SessionResult<Option<Self>> {
        if change_set.is_empty() {
            return Ok(None);
        }

        let ChangeSet { to_create, to_update, to_delete, deferred } = change_set;

        let mut deletes: Vec<(u64, CommandData, ResultAction)> = Vec::new();
        let mut writes: Vec<(u64, CommandData, ResultAction)> = Vec::new();

        for pending in to_delete {
            let command = CommandData::delete(pending.id, pending.change_vector)?;
            deletes.push((pending.sequence, command, ResultAction::Deleted { handle: pending.handle }));
        }

        for pending in to_create.into_iter().chain(to_update) {
            let command = put_command(&pending)?;
            writes.push((
                pending.sequence,
                command,
                ResultAction::Saved { handle: pending.handle, id: pending.id, state: pending.document },
            ));
        }

        for pending in deferred {
            let entry = (pending.sequence, pending.command, ResultAction::Deferred);
            match entry.1.command_type() {
                CommandType::Delete => deletes.push(entry),
                CommandType::Put | CommandType::Patch => writes.push(entry),
            }
        }

        deletes.sort_by_key(|(sequence, _, _)| *sequence);
        writes.sort_by_key(|(sequence, _, _)| *sequence);

        let (commands, actions) = deletes
            .into_iter()
            .chain(writes)
            .map(|(_, command, action)| (command, action))
            .unzip();

        Ok(Some(Self { commands, actions }))
    }

    /// The commands in submission order.
    pub fn commands(&self) -> &[CommandData] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Writes an applied batch back into the identity map.
    ///
    /// Fails with [`SessionError::UnexpectedResponse`] when the result does not line up with
    /// the request, in which case nothing is changed.
    #[tracing::instrument(level = "debug", skip_all, fields(commands = self.commands.len()))]
    pub fn set_result(self, result: BatchResult, identity_map: &mut IdentityMap) -> SessionResult<()> {
        if result.results.len() != self.commands.len() {
            return Err(SessionError::UnexpectedResponse(format!(
                "batch of {} commands returned {} results",
                self.commands.len(),
                result.results.len()
            )));
        }

        let mut staged = Vec::with_capacity(self.commands.len());
        for ((command, action), item) in self.commands.iter().zip(self.actions).zip(result.results) {
            staged.push(stage(command, action, item, identity_map)?);
        }

        for outcome in staged {
            match outcome {
                Staged::Saved { handle, id, state, metadata } => {
                    identity_map.apply_server_result(&id, metadata.change_vector.clone(), state)?;
                    let tracked = identity_map.metadata_mut(handle)?;
                    tracked.last_modified = metadata.last_modified;
                    if metadata.collection.is_some() {
                        tracked.collection = metadata.collection;
                    }
                }
                Staged::Deleted { handle } => identity_map.forget_deleted(handle),
                Staged::Refreshed { handle, entity, state, metadata } => {
                    identity_map.replace_entity(handle, entity, state, metadata)?;
                }
                Staged::Nothing => {}
            }
        }

        identity_map.clear_deferred();
        Ok(())
    }
}

fn stage(
    command: &CommandData,
    action: ResultAction,
    item: BatchResultItem,
    identity_map: &IdentityMap,
) -> SessionResult<Staged> {
    if item.command_type != command.command_type() {
        return Err(SessionError::UnexpectedResponse(format!(
            "expected a {:?} result for {}, got {:?}",
            command.command_type(),
            command.id(),
            item.command_type
        )));
    }

    match action {
        ResultAction::Saved { handle, id, state } => {
            if identity_map.handle_for(&id) != Some(handle) {
                return Err(SessionError::NotTracked(id));
            }

            let metadata = DocumentMetadata {
                id: item.id,
                collection: item.collection,
                change_vector: item.change_vector,
                last_modified: item.last_modified,
            };
            Ok(Staged::Saved { handle, id, state, metadata })
        }
        ResultAction::Deleted { handle } => Ok(Staged::Deleted { handle }),
        ResultAction::Deferred => {
            let (Some(modified), CommandType::Patch) = (item.modified_document, item.command_type)
            else {
                return Ok(Staged::Nothing);
            };
            let Some(handle) = identity_map.handle_for(command.id()) else {
                return Ok(Staged::Nothing);
            };

            let (body, mut metadata) = split_metadata(modified)?;
            if metadata.id.is_empty() {
                metadata.id = item.id;
            }
            if metadata.change_vector.is_none() {
                metadata.change_vector = item.change_vector;
            }

            let mut entity = identity_map.tracked(handle)?.entity().clone_box();
            entity.replace_from_json(Value::Object(body))?;
            let state = entity.to_any_json()?;

            Ok(Staged::Refreshed { handle, entity, state, metadata })
        }
    }
}
