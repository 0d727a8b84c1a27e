//! Multi-statement transactions.
//!
//! A transaction unit is an async closure receiving a [`Transaction`]. The transaction is the
//! only source of collections bound to its session:
//!
//! ```ignore
//! let inserted = database
//!     .do_transaction(async |tx| {
//!         let users = tx.collection("users");
//!         users.insert_one(&alice).await?;
//!         users.insert_one(&bob).await?;
//!         Ok(2)
//!     })
//!     .await?;
//! ```
//!
//! The unit runs exactly once. If it returns `Ok`, the transaction commits; a failed commit is
//! reported as [`DocumentStoreError::CommitFailed`] and the unit is not retried. If it returns
//! `Err`, the transaction aborts and the unit's error is returned unchanged; a failed abort is
//! logged and does not replace it.
//!
//! # Caller contract
//!
//! Store calls made inside the unit through any collection *not* obtained from
//! [`Transaction::collection`] (for example a collection captured from the surrounding scope)
//! run on their own pooled session, outside the transaction. The library cannot detect this.

use std::{ops::AsyncFnOnce, sync::Arc, time::Duration};

use mea::mutex::Mutex;
use tracing::{debug, warn};

use crate::{
    backend::Namespace,
    collection::Collection,
    error::{DocumentStoreError, DocumentStoreResult},
    pool::{ConnectionManager, Session},
};

/// Execution context of a running transaction.
pub struct Transaction {
    session: Mutex<Session>,
    database: String,
    timeout: Option<Duration>,
}

impl Transaction {
    /// Name of the database the transaction was started from.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// A collection of the transaction's database whose operations run inside the transaction.
    pub fn collection(&self, name: impl Into<String>) -> Collection<'_> {
        self.collection_in(self.database.clone(), name)
    }

    /// A collection of another database, bound to the same transaction.
    pub fn collection_in(
        &self,
        database: impl Into<String>,
        name: impl Into<String>,
    ) -> Collection<'_> {
        Collection::bound(Namespace::new(database, name), &self.session, self.timeout)
    }
}

pub(crate) async fn run<T, F>(
    pool: &Arc<ConnectionManager>,
    database: &str,
    timeout: Option<Duration>,
    unit: F,
) -> DocumentStoreResult<T>
where
    F: AsyncFnOnce(&Transaction) -> DocumentStoreResult<T>,
{
    let mut session = pool.acquire().await?;
    session.connection()?.start_transaction().await?;

    let session_id = session.id();
    debug!(target: "docflow::txn", session_id, database, "transaction started");

    let tx = Transaction {
        session: Mutex::new(session),
        database: database.to_string(),
        timeout,
    };

    let outcome = unit(&tx).await;
    let mut session = tx.session.lock().await;

    match outcome {
        Ok(value) => {
            session
                .connection()?
                .commit_transaction()
                .await
                .map_err(|err| DocumentStoreError::CommitFailed(err.to_string()))?;

            debug!(target: "docflow::txn", session_id, "transaction committed");
            Ok(value)
        }
        Err(err) => {
            let aborted = match session.connection() {
                Ok(connection) => connection.abort_transaction().await,
                Err(closed) => Err(closed),
            };

            match aborted {
                Ok(()) => debug!(target: "docflow::txn", session_id, %err, "transaction aborted"),
                Err(abort_err) => warn!(
                    target: "docflow::txn",
                    session_id,
                    %err,
                    %abort_err,
                    "transaction abort failed"
                ),
            }

            Err(err)
        }
    }
}
