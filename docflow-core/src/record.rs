//! Typed records and their mapping to stored documents.
//!
//! A [`Record`] is any serde type that encodes to a BSON document. Field correspondence is
//! name-based: an explicit `#[serde(rename = "...")]` wins, otherwise the declared (snake_case)
//! field name is used. Unknown document fields are ignored on decode and `#[serde(skip)]` fields
//! are left out on encode.
//!
//! The mapping itself lives in [`RecordExt`]: [`RecordExt::to_document`] encodes and
//! [`RecordExt::from_document`] decodes. Field injection (identifiers and timestamps) is layered
//! on top by [`crate::field`].
//!
//! # Example
//!
//! ```ignore
//! use docflow::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! pub struct UserInfo {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<bson::oid::ObjectId>,
//!     pub name: String,
//!     pub age: u16,
//!     pub weight: u32,
//! }
//! ```

use bson::{Bson, Document, de::deserialize_from_document, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};
use std::any::{Any, type_name};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::CustomFields,
    hook::RecordHooks,
};

/// Correspondence between a declared struct field and its document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// The field name as declared in the Rust struct.
    pub declared: &'static str,
    /// The field name in the stored document.
    pub document: &'static str,
}

/// Core trait of every value stored through a collection.
///
/// Implement it with `#[derive(Record)]`, or by hand:
///
/// ```ignore
/// impl Record for UserInfo {}
/// ```
///
/// Every capability is optional and absent by default:
/// - [`Record::FIELDS`] lists the field mapping (the derive fills it in),
/// - [`Record::custom_fields`] overrides the identifier/timestamp convention,
/// - [`Record::hooks`] exposes lifecycle hooks,
/// - [`Record::validate`] checks declarative constraints.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Declared-to-document field names. Empty for hand-written records, in which case custom
    /// field names are taken to be document field names.
    const FIELDS: &'static [FieldMapping] = &[];

    /// Names the identifier and timestamp fields explicitly. `None` selects the default
    /// convention (`_id`, `createAt`, `updateAt`).
    fn custom_fields() -> Option<CustomFields> {
        None
    }

    /// Returns this record's lifecycle hooks, if the type has any.
    ///
    /// Types with hooks implement [`RecordHooks`] and return `Some(self)`.
    fn hooks(&self) -> Option<&dyn RecordHooks> {
        None
    }

    /// Checks declarative field constraints, reporting every violation at once.
    fn validate(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Generic documents are records too: they carry no hooks, constraints or custom fields.
impl Record for Document {}

/// Encoding and decoding helpers, implemented for every [`Record`].
pub trait RecordExt: Record {
    /// Encodes this record into a document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the record does not encode to a
    /// document, or a serialization error.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Decodes a record from a document.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Converts this record to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a record from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "{} encodes to {:?}, expected a document",
                type_name::<R>(),
                other.element_type()
            ))),
        }
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Type-erased record handed to middleware.
///
/// Middleware is registered process-wide and sees records of every type; it can downcast to the
/// types it cares about or inspect the encoded form.
pub trait AnyRecord: Send + Sync {
    /// Returns the Rust type name of the record.
    fn record_type(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Encodes the record without any field injection.
    fn to_any_document(&self) -> DocumentStoreResult<Document>;

    fn to_any_json(&self) -> DocumentStoreResult<Value>;
}

impl dyn AnyRecord + '_ {
    /// Attempts to downcast to a concrete record type.
    ///
    /// ```ignore
    /// if let Some(user) = record.downcast_ref::<UserInfo>() {
    ///     println!("inserting {}", user.name);
    /// }
    /// ```
    pub fn downcast_ref<R: Record>(&self) -> Option<&R> {
        self.as_any().downcast_ref::<R>()
    }
}

impl<R: Record> AnyRecord for R {
    fn record_type(&self) -> &'static str {
        type_name::<R>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_any_document(&self) -> DocumentStoreResult<Document> {
        RecordExt::to_document(self)
    }

    fn to_any_json(&self) -> DocumentStoreResult<Value> {
        RecordExt::to_json(self)
    }
}
