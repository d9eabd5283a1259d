//! Entities as the session sees them.
//!
//! This module provides the trait every entity stored through a session must implement,
//! the type-erased [`AnyDocument`] used by the identity map, and [`DocumentMetadata`],
//! the typed view of a server document's `@metadata` object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, from_value, to_value};
use std::any::Any;

use crate::error::{SessionError, SessionResult};

/// Name of the metadata object embedded in every server document.
pub const METADATA_KEY: &str = "@metadata";

/// Core trait that all entities stored in a session must implement.
///
/// Ids are not part of the entity: the session assigns or receives them and keeps them in
/// the identity map.
///
/// # Example
///
/// ```ignore
/// use docsession::document::Document;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Order {
///     pub company: String,
///     pub total: f64,
/// }
///
/// impl Document for Order {
///     fn collection_name() -> &'static str {
///         "Orders"
///     }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// The server collection holding documents of this type.
    ///
    /// The name is written to the `@collection` metadata and used as the prefix of
    /// generated ids.
    fn collection_name() -> &'static str;
}

/// JSON conversion shared by every [`Document`]. Serializer errors surface as
/// [`SessionError::Serialization`].
pub trait DocumentExt: Document {
    /// The JSON body sent to the server and kept as the tracking snapshot.
    fn to_json(&self) -> SessionResult<Value>;

    /// Reads a body received from the server, `@metadata` already removed.
    fn from_json(value: Value) -> SessionResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_json(&self) -> SessionResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> SessionResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Type-erased document, the unit stored in the identity map arena.
///
/// The arena holds entities of many types at once; typed access goes through
/// [`downcast_ref`](trait.AnyDocument.html#method.downcast_ref) and friends.
pub trait AnyDocument: Send + Sync {
    /// [`Document::collection_name`] of the concrete type.
    fn document_collection(&self) -> &'static str;

    /// For typed access by handle.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn clone_box(&self) -> Box<dyn AnyDocument>;

    /// Converts this document to JSON.
    fn to_any_json(&self) -> SessionResult<Value>;

    /// Overwrites this document in place with the contents of `value`.
    ///
    /// On error the document is left unchanged.
    fn replace_from_json(&mut self, value: Value) -> SessionResult<()>;
}

impl dyn AnyDocument {
    /// `None` when the tracked entity is not a `D`.
    pub fn downcast_ref<D: Document>(&self) -> Option<&D> {
        self.as_any().downcast_ref::<D>()
    }

    pub fn downcast_mut<D: Document>(&mut self) -> Option<&mut D> {
        self.as_any_mut().downcast_mut::<D>()
    }
}

impl<D: Document> AnyDocument for D {
    fn document_collection(&self) -> &'static str {
        Self::collection_name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyDocument> {
        Box::new(self.clone())
    }

    fn to_any_json(&self) -> SessionResult<Value> {
        DocumentExt::to_json(self)
    }

    fn replace_from_json(&mut self, value: Value) -> SessionResult<()> {
        *self = D::from_json(value)?;
        Ok(())
    }
}

impl Clone for Box<dyn AnyDocument> {
    fn clone(&self) -> Box<dyn AnyDocument> {
        self.clone_box()
    }
}

/// Boxing into the identity map's erased form. Already boxed values pass through.
pub trait IntoAnyDocument {
    fn into_any_document(self) -> Box<dyn AnyDocument>;
}

impl<D: Document> IntoAnyDocument for D {
    fn into_any_document(self) -> Box<dyn AnyDocument> {
        Box::new(self) as Box<dyn AnyDocument>
    }
}

impl IntoAnyDocument for Box<dyn AnyDocument> {
    fn into_any_document(self) -> Box<dyn AnyDocument> {
        self
    }
}

/// The `@metadata` object the server attaches to each document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Document id.
    #[serde(rename = "@id", default)]
    pub id: String,
    /// Collection the document belongs to.
    #[serde(rename = "@collection", default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Change vector of the revision this metadata describes.
    #[serde(rename = "@change-vector", default, skip_serializing_if = "Option::is_none")]
    pub change_vector: Option<String>,
    /// Time of the last modification on the server.
    #[serde(rename = "@last-modified", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Splits a raw server document into its body and its parsed metadata.
///
/// The body is the document with `@metadata` removed, which is what entities are
/// deserialized from and what snapshots are compared against.
pub fn split_metadata(document: Value) -> SessionResult<(Map<String, Value>, DocumentMetadata)> {
    let Value::Object(mut body) = document else {
        return Err(SessionError::UnexpectedResponse(
            "a document must be a JSON object".to_string(),
        ));
    };

    let metadata = match body.remove(METADATA_KEY) {
        Some(raw) => from_value(raw)?,
        None => DocumentMetadata::default(),
    };

    Ok((body, metadata))
}
