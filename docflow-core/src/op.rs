//! Operation descriptors shared by hooks and middleware.
//!
//! - [`OpKind`] - what the operation does (insert, update, remove, ...)
//! - [`HookPhase`] - whether an interceptor runs before or after the store call
//! - [`OpType`] - the pair of both, the tag handed to middleware
//! - [`OpContext`] - the execution context handed to hooks and middleware
//! - [`OpOptions`] - an open, typed set of per-call options

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

/// The kind of operation being intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// A record is inserted.
    Insert,
    /// Documents are modified through an update expression.
    Update,
    /// A document is replaced by a record.
    Replace,
    /// A document is replaced by a record, or the record inserted if nothing matched.
    Upsert,
    /// Documents are removed.
    Remove,
    /// Documents are read.
    Query,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Replace => "replace",
            OpKind::Upsert => "upsert",
            OpKind::Remove => "remove",
            OpKind::Query => "query",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an interceptor runs before or after the store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

/// Tag identifying the interception point: a phase paired with an operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpType {
    phase: HookPhase,
    kind: OpKind,
}

impl OpType {
    pub const BEFORE_INSERT: OpType = OpType::new(HookPhase::Before, OpKind::Insert);
    pub const AFTER_INSERT: OpType = OpType::new(HookPhase::After, OpKind::Insert);
    pub const BEFORE_UPDATE: OpType = OpType::new(HookPhase::Before, OpKind::Update);
    pub const AFTER_UPDATE: OpType = OpType::new(HookPhase::After, OpKind::Update);
    pub const BEFORE_REPLACE: OpType = OpType::new(HookPhase::Before, OpKind::Replace);
    pub const AFTER_REPLACE: OpType = OpType::new(HookPhase::After, OpKind::Replace);
    pub const BEFORE_UPSERT: OpType = OpType::new(HookPhase::Before, OpKind::Upsert);
    pub const AFTER_UPSERT: OpType = OpType::new(HookPhase::After, OpKind::Upsert);
    pub const BEFORE_REMOVE: OpType = OpType::new(HookPhase::Before, OpKind::Remove);
    pub const AFTER_REMOVE: OpType = OpType::new(HookPhase::After, OpKind::Remove);
    pub const BEFORE_QUERY: OpType = OpType::new(HookPhase::Before, OpKind::Query);
    pub const AFTER_QUERY: OpType = OpType::new(HookPhase::After, OpKind::Query);

    pub const fn new(phase: HookPhase, kind: OpKind) -> Self {
        Self { phase, kind }
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            HookPhase::Before => write!(f, "before_{}", self.kind),
            HookPhase::After => write!(f, "after_{}", self.kind),
        }
    }
}

/// Execution context of a single collection operation.
///
/// Hooks and middleware receive it to learn where the operation is going and whether it runs
/// inside a transaction.
#[derive(Debug, Clone)]
pub struct OpContext {
    database: String,
    collection: String,
    kind: OpKind,
    in_transaction: bool,
}

impl OpContext {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        kind: OpKind,
        in_transaction: bool,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            kind,
            in_transaction,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Returns `true` when the operation runs on a transaction-bound session.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

/// An open set of operation-specific options, keyed by type.
///
/// Callers attach values with `.option(value)` on any collection action; middleware and hooks
/// read them back with [`OpOptions::get`]. Built-in actions also store their own settings here
/// (for example [`crate::collection::UpdateSettings`]).
#[derive(Default)]
pub struct OpOptions {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl OpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, returning the previous value of the same type if any.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for OpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpOptions")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_type_display_names_phase_and_kind() {
        assert_eq!(OpType::BEFORE_INSERT.to_string(), "before_insert");
        assert_eq!(OpType::AFTER_REMOVE.to_string(), "after_remove");
        assert_eq!(OpType::AFTER_UPSERT.kind(), OpKind::Upsert);
    }

    #[test]
    fn options_are_keyed_by_type() {
        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        let mut options = OpOptions::new();
        assert!(options.insert(Tenant("a")).is_none());
        assert_eq!(options.insert(Tenant("b")), Some(Tenant("a")));
        options.insert(42u32);

        assert_eq!(options.get::<Tenant>(), Some(&Tenant("b")));
        assert_eq!(options.get::<u32>(), Some(&42));
        assert!(options.get::<String>().is_none());
        assert_eq!(options.len(), 2);
    }
}
