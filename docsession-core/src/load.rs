//! Turning server documents into tracked entities.
//!
//! Parsing and tracking are separate steps: a whole response is parsed first, and only
//! once every document has deserialized is anything registered in the identity map.

use serde_json::Value;

use crate::{
    document::{AnyDocument, Document, DocumentExt, DocumentMetadata, IntoAnyDocument, split_metadata},
    error::SessionResult,
    tracking::{EntityHandle, EntityRef, IdentityMap, Snapshot},
};

/// A server document deserialized into its entity type but not yet tracked.
pub(crate) struct ParsedDocument {
    pub id: String,
    pub entity: Box<dyn AnyDocument>,
    /// The entity re-serialized. Fields the entity type does not know are dropped here,
    /// so they never show up as changes.
    pub state: Value,
    pub metadata: DocumentMetadata,
}

impl ParsedDocument {
    /// Parses a raw server document. `fallback_id` is used when the metadata has no `@id`.
    pub fn parse<D: Document>(document: Value, fallback_id: Option<&str>) -> SessionResult<Self> {
        let (body, mut metadata) = split_metadata(document)?;

        if metadata.id.is_empty() {
            metadata.id = fallback_id.unwrap_or_default().to_string();
        }

        let entity = D::from_json(Value::Object(body))?;
        let state = entity.to_json()?;

        Ok(Self { id: metadata.id.clone(), entity: entity.into_any_document(), state, metadata })
    }

    /// Registers the document, or returns the entity already tracked under its id.
    ///
    /// An entity already in the session keeps its in-memory state. Documents without an id
    /// (projections) are attached read-only. A document whose id is pending deletion in
    /// this session yields `None`.
    pub fn track(self, identity_map: &mut IdentityMap, no_tracking: bool) -> SessionResult<Option<EntityHandle>> {
        if let Some(handle) = identity_map.handle_for(&self.id) {
            return Ok(Some(handle));
        }

        if self.id.is_empty() {
            return identity_map
                .attach_untracked(&self.id, self.entity, self.state, self.metadata)
                .map(Some);
        }

        if identity_map.is_deleted(&self.id) {
            tracing::trace!(id = %self.id, "Skipping document pending deletion");
            return Ok(None);
        }

        if no_tracking {
            return identity_map
                .attach_untracked(&self.id, self.entity, self.state, self.metadata)
                .map(Some);
        }

        identity_map
            .track_entity(
                &self.id,
                EntityRef::Instance(self.entity),
                Snapshot::Loaded { state: self.state, metadata: self.metadata },
            )
            .map(Some)
    }
}

/// Parses every slot of a documents result, keeping `None` for missing documents.
pub(crate) fn parse_documents<D: Document>(
    ids: &[String],
    documents: Vec<Option<Value>>,
) -> SessionResult<Vec<Option<ParsedDocument>>> {
    ids.iter()
        .zip(documents)
        .map(|(id, document)| {
            document
                .map(|document| ParsedDocument::parse::<D>(document, Some(id)))
                .transpose()
        })
        .collect()
}

/// Tracks parsed documents in order.
pub(crate) fn track_documents(
    parsed: Vec<Option<ParsedDocument>>,
    identity_map: &mut IdentityMap,
    no_tracking: bool,
) -> SessionResult<Vec<Option<EntityHandle>>> {
    parsed
        .into_iter()
        .map(|document| {
            Ok(match document {
                Some(document) => document.track(identity_map, no_tracking)?,
                None => None,
            })
        })
        .collect()
}

/// Tracks query results in order, leaving out documents this session is deleting.
pub(crate) fn track_query_results(
    parsed: Vec<ParsedDocument>,
    identity_map: &mut IdentityMap,
    no_tracking: bool,
) -> SessionResult<Vec<EntityHandle>> {
    let mut handles = Vec::with_capacity(parsed.len());
    for document in parsed {
        if let Some(handle) = document.track(identity_map, no_tracking)? {
            handles.push(handle);
        }
    }
    Ok(handles)
}

const RESERVED: &[char] = &['%', '&', '=', '#', '+', '?', ' '];

/// Escapes a document id for use as a query-string value.
pub(crate) fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if RESERVED.contains(&c) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}
