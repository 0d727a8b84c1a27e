//! Structured update expressions.
//!
//! ```ignore
//! let bump = Update::new().set("age", 10).inc("visits", 1).push("tags", "adult");
//! users.update_many(Filter::all(), bump).await?;
//! ```
//!
//! Updates are untyped: they carry no record type, so identifier and timestamp fields are not
//! injected. Set `updateAt` (or the record's custom update-time field) explicitly when needed.

use bson::{Bson, Document};

/// A single field modification.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Sets the field to the value, creating it if missing.
    Set(String, Bson),
    /// Removes the field.
    Unset(String),
    /// Adds the numeric value to the field, treating a missing field as zero.
    Inc(String, Bson),
    /// Appends the value to the array field, creating the array if missing.
    Push(String, Bson),
}

impl UpdateOp {
    pub fn field(&self) -> &str {
        match self {
            UpdateOp::Set(field, _)
            | UpdateOp::Unset(field)
            | UpdateOp::Inc(field, _)
            | UpdateOp::Push(field, _) => field,
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            UpdateOp::Set(..) => "$set",
            UpdateOp::Unset(_) => "$unset",
            UpdateOp::Inc(..) => "$inc",
            UpdateOp::Push(..) => "$push",
        }
    }
}

/// An ordered list of field modifications applied to every matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), by.into()));
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Push(field.into(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Renders the update in operator form, e.g. `{ "$set": { "age": 10 } }`.
    pub fn to_document(&self) -> Document {
        let mut rendered = Document::new();

        for op in &self.ops {
            let value = match op {
                UpdateOp::Set(_, value) | UpdateOp::Inc(_, value) | UpdateOp::Push(_, value) => {
                    value.clone()
                }
                UpdateOp::Unset(_) => Bson::String(String::new()),
            };

            let entry = rendered
                .entry(op.operator().to_string())
                .or_insert_with(|| Bson::Document(Document::new()));

            if let Bson::Document(fields) = entry {
                fields.insert(op.field().to_string(), value);
            }
        }

        rendered
    }
}
