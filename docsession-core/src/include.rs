//! Documents loaded alongside the ones asked for.
//!
//! A load can name include paths: fields of the loaded documents that hold the ids of
//! other documents. The server returns those referenced documents next to the results,
//! and the session keeps them raw until a later load asks for one of them, so that load
//! needs no round trip.
//!
//! A path is a dotted field path. Arrays met along the way are walked element by
//! element, so `Lines.Product` collects the `Product` of every order line.

use serde_json::{Map, Value};

use crate::{
    document::Document,
    error::SessionResult,
    load::ParsedDocument,
    tracking::{EntityHandle, IdentityMap},
};

/// The document ids `path` points at inside `document`.
///
/// Strings are ids. Missing fields, nulls and values of other types are skipped.
pub fn referenced_ids(document: &Value, path: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let segments: Vec<&str> = path.split('.').filter(|segment| !segment.is_empty()).collect();
    if !segments.is_empty() {
        collect(document, &segments, &mut ids);
    }
    ids
}

fn collect(value: &Value, segments: &[&str], ids: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, segments, ids);
            }
        }
        Value::Object(fields) => {
            if let Some((first, rest)) = segments.split_first() {
                if let Some(next) = fields.get(*first) {
                    collect(next, rest, ids);
                }
            }
        }
        Value::String(id) if segments.is_empty() && !id.is_empty() => ids.push(id.clone()),
        _ => {}
    }
}

/// Keeps the documents a server returned as includes.
///
/// Ids already tracked or pending deletion are skipped, as are missing documents.
pub(crate) fn register_includes(identity_map: &mut IdentityMap, includes: Map<String, Value>) {
    for (id, document) in includes {
        if document.is_null() || identity_map.handle_for(&id).is_some() || identity_map.is_deleted(&id) {
            continue;
        }
        identity_map.register_included(&id, document);
    }
}

/// Turns a previously included document into an entity.
///
/// Returns `Ok(None)` when `id` was not included. A tracking session forgets the raw copy
/// once the entity is registered.
pub(crate) fn track_included<D: Document>(
    identity_map: &mut IdentityMap,
    id: &str,
    no_tracking: bool,
) -> SessionResult<Option<EntityHandle>> {
    let Some(document) = identity_map.included(id).cloned() else {
        return Ok(None);
    };

    let handle = ParsedDocument::parse::<D>(document, Some(id))?.track(identity_map, no_tracking)?;
    if !no_tracking {
        identity_map.forget_included(id);
    }

    tracing::trace!(id, "Loaded document from includes");
    Ok(handle)
}

/// Whether loading `ids` with `includes` can be answered without a request.
///
/// Every id must already be known to the session, and every document its include paths
/// reference must be tracked, included or pending deletion.
pub(crate) fn includes_loaded(identity_map: &IdentityMap, ids: &[&str], includes: &[String]) -> bool {
    ids.iter().all(|id| {
        if identity_map.is_deleted(id) {
            return true;
        }

        let document = match identity_map.handle_for(id) {
            Some(handle) => match identity_map.tracked(handle).and_then(|t| t.entity().to_any_json()) {
                Ok(document) => document,
                Err(_) => return false,
            },
            None => match identity_map.included(id) {
                Some(document) => document.clone(),
                None => return false,
            },
        };

        includes.iter().all(|path| {
            referenced_ids(&document, path).iter().all(|referenced| {
                identity_map.handle_for(referenced).is_some()
                    || identity_map.is_included(referenced)
                    || identity_map.is_deleted(referenced)
            })
        })
    })
}
