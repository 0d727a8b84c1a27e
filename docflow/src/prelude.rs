//! Convenient re-exports of commonly used types.
//!
//! ```ignore
//! use docflow::prelude::*;
//! ```

pub use bson::{Bson, DateTime, Document, doc, oid::ObjectId};

pub use docflow_core::{
    client::{Client, Database},
    collection::{Collection, InsertManyResult, InsertOneResult, UpdateSettings},
    config::{ClientConfig, PoolConfig},
    error::{BoxError, DocumentStoreError, DocumentStoreResult},
    field::{CustomFields, DefaultField},
    hook::RecordHooks,
    middleware::{Middleware, Subject},
    op::{HookPhase, OpContext, OpKind, OpOptions, OpType},
    pipeline::{Accumulator, Pipeline},
    query::{Expr, Filter, Projection, SortDirection},
    record::{AnyRecord, Record, RecordExt},
    transaction::Transaction,
    update::Update,
    validate::{Constraint, FieldViolation, Violations},
};
pub use docflow_macros::Record;

pub use async_trait::async_trait;
