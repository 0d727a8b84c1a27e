//! Error types and result types for client operations.
//!
//! Every fallible operation in the crate returns [`DocumentStoreResult<T>`]. The variants of
//! [`DocumentStoreError`] separate failures that happen *before* anything reaches the store
//! (validation, before-hooks, before-middleware, pool acquisition) from failures of the store
//! call itself and from failures that surface *after* the store already applied the effect
//! (after-hooks, after-middleware). Nothing in this crate retries automatically.

use std::time::Duration;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::{
    op::{HookPhase, OpType},
    validate::FieldViolation,
};

/// Boxed error returned by hooks and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents all possible errors that can occur when talking to a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The store could not be reached or refused the connection.
    #[error("Connection error: {0}")]
    Connection(String),
    /// No pooled connection became available before the acquire timeout elapsed.
    #[error("Connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),
    /// The client (or its pool) was closed.
    #[error("Client is closed")]
    Closed,
    /// A malformed mapping, custom field spec or client configuration, detected at first use.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// One or more declarative field constraints were violated. Every violation is listed.
    #[error("Validation failed: {}", render_violations(.0))]
    ValidationFailed(Vec<FieldViolation>),
    /// A record hook failed. The hook's own error is kept unchanged as the source.
    #[error("Hook failed at {op_type}: {source}")]
    HookFailed {
        op_type: OpType,
        #[source]
        source: BoxError,
    },
    /// A registered middleware failed. The middleware's own error is kept unchanged as the source.
    #[error("Middleware failed at {op_type}: {source}")]
    MiddlewareFailed {
        op_type: OpType,
        #[source]
        source: BoxError,
    },
    /// The underlying CRUD or aggregation call failed.
    #[error("Store operation failed: {0}")]
    StoreOperation(String),
    /// The transaction unit succeeded but the store failed to commit it.
    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),
    /// The store failed to abort a transaction.
    #[error("Transaction abort failed: {0}")]
    AbortFailed(String),
    /// The caller-supplied deadline elapsed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// Serialization/deserialization error when converting between records and documents.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The value does not have the shape of a document.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// No document matched in the given collection.
    #[error("No document found in collection {0}")]
    DocumentNotFound(String),
    /// A document with the same identifier already exists.
    /// The first argument is the identifier, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DuplicateKey(String, String),
    /// The backend does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// A specialized `Result` type for client operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Returns `true` when the failure happened before the operation reached the store,
    /// meaning no store-side effect can have taken place.
    pub fn is_before_phase(&self) -> bool {
        match self {
            DocumentStoreError::HookFailed { op_type, .. }
            | DocumentStoreError::MiddlewareFailed { op_type, .. } => {
                op_type.phase() == HookPhase::Before
            }
            DocumentStoreError::PoolExhausted(_)
            | DocumentStoreError::Closed
            | DocumentStoreError::Configuration(_)
            | DocumentStoreError::ValidationFailed(_)
            | DocumentStoreError::Serialization(_)
            | DocumentStoreError::InvalidDocument(_) => true,
            _ => false,
        }
    }

    /// Returns the violations of a [`DocumentStoreError::ValidationFailed`] error.
    pub fn violations(&self) -> Option<&[FieldViolation]> {
        match self {
            DocumentStoreError::ValidationFailed(violations) => Some(violations),
            _ => None,
        }
    }
}

fn render_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
