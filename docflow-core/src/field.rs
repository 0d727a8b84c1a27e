//! Identifier and timestamp injection.
//!
//! Each record type resolves once to a [`FieldSpec`] naming its identifier, create-time and
//! update-time document fields. The spec comes either from the default convention
//! (`_id`, `createAt`, `updateAt`) or from the type's [`CustomFields`] builder, and is cached
//! for the rest of the process.
//!
//! [`inject`] then fills those fields on an encoded document:
//!
//! | field       | insert / upsert          | replace |
//! |-------------|--------------------------|---------|
//! | identifier  | generated if zero (1)    | kept    |
//! | create-time | set to now if zero       | kept    |
//! | update-time | set to now               | set to now |
//!
//! (1) On upsert a zero `_id` is removed instead, leaving it to the store.
//!
//! Generated values keep the kind of the field they replace, so a record declaring
//! `update_at: i64` receives unix seconds while a `bson::DateTime` field receives a date.
//!
//! Records that want the conventional fields without declaring them flatten a [`DefaultField`]:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Record)]
//! pub struct Article {
//!     #[serde(flatten)]
//!     pub base: DefaultField,
//!     pub title: String,
//! }
//! ```

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use bson::{Bson, DateTime, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    record::{FieldMapping, Record},
};

pub const DEFAULT_ID_FIELD: &str = "_id";
pub const DEFAULT_CREATED_AT_FIELD: &str = "createAt";
pub const DEFAULT_UPDATED_AT_FIELD: &str = "updateAt";

static FIELD_SPECS: LazyLock<RwLock<HashMap<TypeId, Arc<FieldSpec>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Explicit names for a record's identifier and timestamp fields.
///
/// Names refer to *declared* struct fields; they are mapped to document field names through
/// [`Record::FIELDS`].
///
/// ```ignore
/// impl Record for User3 {
///     fn custom_fields() -> Option<CustomFields> {
///         Some(
///             CustomFields::new()
///                 .set_created_at("create_time_at")
///                 .set_updated_at("update_time_at")
///                 .set_id("my_id"),
///         )
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFields {
    id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_id(mut self, field: impl Into<String>) -> Self {
        self.id = Some(field.into());
        self
    }

    pub fn set_created_at(mut self, field: impl Into<String>) -> Self {
        self.created_at = Some(field.into());
        self
    }

    pub fn set_updated_at(mut self, field: impl Into<String>) -> Self {
        self.updated_at = Some(field.into());
        self
    }
}

/// The conventional `_id`, `createAt` and `updateAt` fields as one block, meant for
/// `#[serde(flatten)]`.
///
/// Unset fields encode as `null` and are filled on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultField {
    #[serde(rename = "_id", default)]
    pub id: Option<ObjectId>,
    #[serde(rename = "createAt", default)]
    pub create_at: Option<DateTime>,
    #[serde(rename = "updateAt", default)]
    pub update_at: Option<DateTime>,
}

impl DefaultField {
    pub fn new() -> Self {
        Self::default()
    }

    /// A block for an existing document, e.g. for `replace_one`.
    pub fn with_id(id: ObjectId) -> Self {
        Self { id: Some(id), ..Self::default() }
    }
}

/// A resolved special-role field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRole {
    /// The document field name.
    pub name: String,
    /// Whether the encoded document must carry the field. Roles named by a custom builder are
    /// required; convention roles are filled only when present.
    pub required: bool,
}

impl FieldRole {
    fn optional(name: &str) -> Self {
        Self { name: name.to_string(), required: false }
    }

    fn required(name: &str) -> Self {
        Self { name: name.to_string(), required: true }
    }
}

/// Resolved identifier/timestamp field names for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: FieldRole,
    pub created_at: Option<FieldRole>,
    pub updated_at: Option<FieldRole>,
}

impl FieldSpec {
    /// The default convention.
    pub fn convention() -> Self {
        Self {
            id: FieldRole::optional(DEFAULT_ID_FIELD),
            created_at: Some(FieldRole::optional(DEFAULT_CREATED_AT_FIELD)),
            updated_at: Some(FieldRole::optional(DEFAULT_UPDATED_AT_FIELD)),
        }
    }

    /// Resolves a spec from an optional custom builder and the record's field mapping.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] if the builder names a field that the
    /// mapping does not contain.
    pub fn resolve(
        custom: Option<CustomFields>,
        fields: &[FieldMapping],
        record_type: &str,
    ) -> DocumentStoreResult<Self> {
        let Some(custom) = custom else {
            return Ok(Self::convention());
        };

        let lookup = |declared: &str| -> DocumentStoreResult<FieldRole> {
            if fields.is_empty() {
                return Ok(FieldRole::required(declared));
            }

            fields
                .iter()
                .find(|mapping| mapping.declared == declared)
                .map(|mapping| FieldRole::required(mapping.document))
                .ok_or_else(|| {
                    DocumentStoreError::Configuration(format!(
                        "custom fields of {record_type} name `{declared}`, which is not a field of the record"
                    ))
                })
        };

        Ok(Self {
            id: match custom.id.as_deref() {
                Some(declared) => lookup(declared)?,
                None => FieldRole::optional(DEFAULT_ID_FIELD),
            },
            created_at: custom.created_at.as_deref().map(lookup).transpose()?,
            updated_at: custom.updated_at.as_deref().map(lookup).transpose()?,
        })
    }

    /// Returns the cached spec of `R`, resolving it on first use.
    ///
    /// Resolution is deterministic, so concurrent first uses produce the same spec; the first
    /// writer stores it and later callers share it. Failed resolutions are not cached.
    pub fn of<R: Record>() -> DocumentStoreResult<Arc<FieldSpec>> {
        let key = TypeId::of::<R>();

        if let Some(spec) = FIELD_SPECS.read().get(&key) {
            return Ok(spec.clone());
        }

        let mut specs = FIELD_SPECS.write();
        if let Some(spec) = specs.get(&key) {
            return Ok(spec.clone());
        }

        let spec = Arc::new(Self::resolve(R::custom_fields(), R::FIELDS, type_name::<R>())?);
        specs.insert(key, spec.clone());

        Ok(spec)
    }
}

/// What kind of write the document is about to take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectMode {
    Insert,
    Upsert,
    Replace,
}

/// Fills identifier and timestamp fields of an encoded document according to `spec`.
///
/// Fields the caller set explicitly are left alone, except the update-time field which is always
/// refreshed.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Configuration`] when a required role is missing from the
/// document, when an identifier is a zero integer (integers are never generated), or when a
/// timestamp field has a kind that cannot hold a time.
pub fn inject(document: &mut Document, spec: &FieldSpec, mode: InjectMode) -> DocumentStoreResult<()> {
    let now = Utc::now();

    for role in [Some(&spec.id), spec.created_at.as_ref(), spec.updated_at.as_ref()]
        .into_iter()
        .flatten()
    {
        if role.required && !document.contains_key(&role.name) {
            return Err(DocumentStoreError::Configuration(format!(
                "field `{}` is named as a special field but is missing from the encoded document",
                role.name
            )));
        }
    }

    if mode != InjectMode::Replace {
        let id = &spec.id.name;
        match document.get(id) {
            // An upsert may match an existing document whose `_id` must not change, so the
            // store assigns it only on the insert path.
            Some(current) if mode == InjectMode::Upsert && id == DEFAULT_ID_FIELD && is_zero(current) => {
                document.remove(id);
            }
            None if mode == InjectMode::Upsert && id == DEFAULT_ID_FIELD => {}
            None => {
                document.insert(id.clone(), ObjectId::new());
            }
            Some(current) if is_zero(current) => {
                let generated = generate_id(current).ok_or_else(|| {
                    DocumentStoreError::Configuration(format!(
                        "identifier field `{id}` holds {:?}, which cannot be generated",
                        current.element_type()
                    ))
                })?;
                document.insert(id.clone(), generated);
            }
            Some(_) => {}
        }

        if let Some(role) = &spec.created_at {
            if let Some(current) = document.get(&role.name).filter(|value| is_zero(value)) {
                let stamped = timestamp_like(current, now, &role.name)?;
                document.insert(role.name.clone(), stamped);
            }
        }
    }

    if let Some(role) = &spec.updated_at {
        if let Some(current) = document.get(&role.name) {
            let stamped = timestamp_like(current, now, &role.name)?;
            document.insert(role.name.clone(), stamped);
        }
    }

    Ok(())
}

fn is_zero(value: &Bson) -> bool {
    match value {
        Bson::Null => true,
        Bson::String(text) => text.is_empty(),
        Bson::ObjectId(oid) => oid.bytes() == [0u8; 12],
        Bson::DateTime(date) => date.timestamp_millis() == 0,
        Bson::Int32(number) => *number == 0,
        Bson::Int64(number) => *number == 0,
        Bson::Binary(binary) => binary.bytes.iter().all(|byte| *byte == 0),
        _ => false,
    }
}

fn generate_id(current: &Bson) -> Option<Bson> {
    match current {
        Bson::Null | Bson::ObjectId(_) => Some(Bson::ObjectId(ObjectId::new())),
        Bson::String(_) => Some(Bson::String(ObjectId::new().to_hex())),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
            Some(bson::Uuid::from_bytes(uuid::Uuid::now_v7().into_bytes()).into())
        }
        _ => None,
    }
}

fn timestamp_like(
    current: &Bson,
    now: chrono::DateTime<Utc>,
    field: &str,
) -> DocumentStoreResult<Bson> {
    match current {
        Bson::Null | Bson::DateTime(_) => Ok(Bson::DateTime(DateTime::from_millis(now.timestamp_millis()))),
        Bson::Int64(_) => Ok(Bson::Int64(now.timestamp())),
        Bson::Int32(_) => i32::try_from(now.timestamp()).map(Bson::Int32).map_err(|_| {
            DocumentStoreError::Configuration(format!(
                "timestamp field `{field}` is a 32-bit integer and cannot hold {now}"
            ))
        }),
        Bson::String(_) => Ok(Bson::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))),
        other => Err(DocumentStoreError::Configuration(format!(
            "timestamp field `{field}` holds {:?}, which cannot hold a time",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordExt;
    use bson::doc;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Custom {
        my_id: String,
    }

    impl Record for Custom {
        const FIELDS: &'static [FieldMapping] = &[FieldMapping { declared: "my_id", document: "myId" }];

        fn custom_fields() -> Option<CustomFields> {
            Some(CustomFields::new().set_id("my_id"))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Broken {
        name: String,
    }

    impl Record for Broken {
        const FIELDS: &'static [FieldMapping] = &[FieldMapping { declared: "name", document: "name" }];

        fn custom_fields() -> Option<CustomFields> {
            Some(CustomFields::new().set_created_at("created"))
        }
    }

    #[test]
    fn convention_fills_id_and_present_timestamps() {
        let mut document = doc! { "name": "Alice", "createAt": Bson::Null, "updateAt": 0i64 };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Insert).unwrap();

        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
        assert!(matches!(document.get("createAt"), Some(Bson::DateTime(_))));
        assert!(document.get_i64("updateAt").unwrap() > 0);
    }

    #[test]
    fn convention_does_not_add_missing_timestamps() {
        let mut document = doc! { "name": "Alice" };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Insert).unwrap();

        assert!(document.get("createAt").is_none());
        assert!(document.get("updateAt").is_none());
    }

    #[test]
    fn explicit_values_are_kept() {
        let id = ObjectId::new();
        let created = DateTime::from_millis(1_000);
        let mut document = doc! { "_id": id, "createAt": created, "updateAt": created };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Insert).unwrap();

        assert_eq!(document.get_object_id("_id").unwrap(), id);
        assert_eq!(*document.get_datetime("createAt").unwrap(), created);
        assert_ne!(*document.get_datetime("updateAt").unwrap(), created);
    }

    #[test]
    fn replace_only_refreshes_update_time() {
        let mut document = doc! { "_id": "", "createAt": Bson::Null, "updateAt": "" };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Replace).unwrap();

        assert_eq!(document.get_str("_id").unwrap(), "");
        assert_eq!(document.get("createAt"), Some(&Bson::Null));
        assert!(!document.get_str("updateAt").unwrap().is_empty());
    }

    #[test]
    fn upsert_leaves_zero_object_ids_to_the_store() {
        let mut document = doc! { "_id": Bson::Null, "createAt": Bson::Null };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Upsert).unwrap();

        assert!(document.get("_id").is_none());
        assert!(matches!(document.get("createAt"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn generated_ids_keep_the_field_kind() {
        let mut document = doc! { "_id": "" };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Insert).unwrap();
        assert!(ObjectId::parse_str(document.get_str("_id").unwrap()).is_ok());

        let mut document = doc! { "_id": bson::Uuid::from_bytes([0; 16]) };
        inject(&mut document, &FieldSpec::convention(), InjectMode::Insert).unwrap();
        match document.get("_id") {
            Some(Bson::Binary(binary)) => assert!(binary.bytes.iter().any(|byte| *byte != 0)),
            other => panic!("unexpected id {other:?}"),
        }

        let mut document = doc! { "_id": 0i32 };
        assert!(matches!(
            inject(&mut document, &FieldSpec::convention(), InjectMode::Insert),
            Err(DocumentStoreError::Configuration(_))
        ));
    }

    #[test]
    fn int32_timestamps_that_overflow_are_rejected() {
        let late = chrono::DateTime::from_timestamp(i64::from(i32::MAX) + 1, 0).unwrap();
        assert!(matches!(
            timestamp_like(&Bson::Int32(0), late, "updateAt"),
            Err(DocumentStoreError::Configuration(_))
        ));

        let early = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            timestamp_like(&Bson::Int32(0), early, "updateAt").unwrap(),
            Bson::Int32(1_700_000_000)
        );
    }

    #[derive(Serialize, Deserialize)]
    struct Article {
        #[serde(flatten)]
        base: DefaultField,
        title: String,
    }

    impl Record for Article {
        const FIELDS: &'static [FieldMapping] = &[FieldMapping { declared: "title", document: "title" }];
    }

    #[test]
    fn flattened_default_fields_follow_the_convention() {
        let article = Article { base: DefaultField::new(), title: "hello".into() };
        let mut document = article.to_document().unwrap();
        assert_eq!(document.get("_id"), Some(&Bson::Null));

        let spec = FieldSpec::of::<Article>().unwrap();
        inject(&mut document, &spec, InjectMode::Insert).unwrap();

        let stored = Article::from_document(document).unwrap();
        assert!(stored.base.id.is_some());
        assert!(stored.base.create_at.is_some());
        assert!(stored.base.update_at.is_some());
        assert_eq!(stored.title, "hello");
    }

    #[test]
    fn flattened_default_fields_leave_upsert_ids_to_the_store() {
        let mut document = Article { base: DefaultField::new(), title: "x".into() }.to_document().unwrap();
        inject(&mut document, &FieldSpec::of::<Article>().unwrap(), InjectMode::Upsert).unwrap();
        assert!(document.get("_id").is_none());

        let id = ObjectId::new();
        let mut document = Article { base: DefaultField::with_id(id), title: "x".into() }.to_document().unwrap();
        inject(&mut document, &FieldSpec::of::<Article>().unwrap(), InjectMode::Replace).unwrap();
        assert_eq!(document.get_object_id("_id").unwrap(), id);
    }

    #[test]
    fn custom_fields_map_declared_names() {
        let spec = FieldSpec::of::<Custom>().unwrap();
        assert_eq!(spec.id, FieldRole { name: "myId".into(), required: true });
        assert!(spec.created_at.is_none());

        assert!(Arc::ptr_eq(&spec, &FieldSpec::of::<Custom>().unwrap()));
    }

    #[test]
    fn unknown_custom_field_is_a_configuration_error() {
        assert!(matches!(
            FieldSpec::of::<Broken>(),
            Err(DocumentStoreError::Configuration(_))
        ));
    }

    #[test]
    fn missing_required_field_is_a_configuration_error() {
        let spec = FieldSpec::resolve(
            Some(CustomFields::new().set_updated_at("touched")),
            &[],
            "Anonymous",
        )
        .unwrap();

        let mut document = doc! { "name": "x" };
        assert!(matches!(
            inject(&mut document, &spec, InjectMode::Insert),
            Err(DocumentStoreError::Configuration(_))
        ));
    }

    #[test]
    fn concurrent_first_use_converges() {
        let handles = (0..8)
            .map(|_| std::thread::spawn(FieldSpec::of::<Custom>))
            .collect::<Vec<_>>();

        let specs = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect::<Vec<_>>();

        assert!(specs.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
