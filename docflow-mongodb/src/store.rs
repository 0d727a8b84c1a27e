//! Driver-session backed connections.
//!
//! Every pooled connection owns one [`ClientSession`], so transactions and causal consistency
//! follow the session. Transport failures mark the connection unhealthy and the pool discards it.

use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, SessionCursor,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::ClientOptions,
};
use tracing::{debug, warn};

use docflow_core::{
    backend::{DeleteResult, Namespace, StoreBackend, StoreBackendBuilder, StoreConnection, UpdateResult},
    config::ClientConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Pipeline, sort_document},
    query::{Expr, FindSpec},
    update::Update,
};

use crate::query::MongoQueryTranslator;

const DUPLICATE_KEY: i32 = 11000;

/// A MongoDB deployment. Each pooled connection is one driver session.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
}

impl MongoDbStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn builder() -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::default()
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn connect(&self) -> DocumentStoreResult<Box<dyn StoreConnection>> {
        let session = self
            .client
            .start_session()
            .await
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        Ok(Box::new(MongoDbConnection {
            client: self.client.clone(),
            session,
            healthy: true,
            in_transaction: false,
        }))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;
        debug!(target: "docflow::mongodb", "client shut down");
        Ok(())
    }
}

/// Builds a [`MongoDbStore`] from [`ClientConfig::uri`].
#[derive(Debug, Default)]
pub struct MongoDbStoreBuilder {
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    /// Reported to the server in the connection handshake.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self, config: &ClientConfig) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| DocumentStoreError::Configuration(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        // The driver's own pool only has to cover our sessions.
        options.max_pool_size = Some(u32::try_from(config.pool.max_pool_size).unwrap_or(u32::MAX));

        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Configuration(e.to_string()))?;

        Ok(MongoDbStore::new(client))
    }
}

#[derive(Debug)]
pub struct MongoDbConnection {
    client: Client,
    session: ClientSession,
    healthy: bool,
    in_transaction: bool,
}

fn is_network_error(err: &MongoError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
    )
}

fn duplicate_key(err: &MongoError) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .iter()
            .flatten()
            .any(|write| write.code == DUPLICATE_KEY),
        _ => false,
    }
}

impl MongoDbConnection {
    fn collection(&self, ns: &Namespace) -> MongoCollection<Document> {
        self.client.database(&ns.database).collection(&ns.collection)
    }

    /// Maps a driver error, marking the connection unhealthy on transport failures.
    fn fail(&mut self, ns: &Namespace, err: MongoError) -> DocumentStoreError {
        if is_network_error(&err) {
            self.healthy = false;
            warn!(target: "docflow::mongodb", %ns, error = %err, "connection failed");
            return DocumentStoreError::Connection(err.to_string());
        }
        if duplicate_key(&err) {
            return DocumentStoreError::DuplicateKey(err.to_string(), ns.to_string());
        }
        DocumentStoreError::StoreOperation(err.to_string())
    }

    async fn drain(&mut self, ns: &Namespace, mut cursor: SessionCursor<Document>) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = cursor.next(&mut self.session).await {
            match document {
                Ok(document) => documents.push(document),
                Err(err) => return Err(self.fail(ns, err)),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl StoreConnection for MongoDbConnection {
    async fn insert(&mut self, ns: &Namespace, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let count = documents.len();
        let result = self
            .collection(ns)
            .insert_many(documents)
            .session(&mut self.session)
            .await;

        match result {
            Ok(result) => Ok((0..count)
                .map(|index| result.inserted_ids.get(&index).cloned().unwrap_or(Bson::Null))
                .collect()),
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn find(&mut self, ns: &Namespace, spec: &FindSpec) -> DocumentStoreResult<Vec<Document>> {
        let filter = MongoQueryTranslator::translate(&spec.filter)?;
        let collection = self.collection(ns);

        let mut action = collection.find(filter);
        if !spec.sort.is_empty() {
            action = action.sort(sort_document(&spec.sort));
        }
        if let Some(skip) = spec.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = spec.effective_limit() {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(projection) = &spec.projection {
            action = action.projection(projection.to_document());
        }

        let result = action.session(&mut self.session).await;
        match result {
            Ok(cursor) => self.drain(ns, cursor).await,
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn count(&mut self, ns: &Namespace, filter: &Expr) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::translate(filter)?;
        let result = self
            .collection(ns)
            .count_documents(filter)
            .session(&mut self.session)
            .await;

        result.map_err(|err| self.fail(ns, err))
    }

    async fn update(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        update: &Update,
        multi: bool,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        let filter = MongoQueryTranslator::translate(filter)?;
        let collection = self.collection(ns);

        let result = if multi {
            collection
                .update_many(filter, update.to_document())
                .upsert(upsert)
                .session(&mut self.session)
                .await
        } else {
            collection
                .update_one(filter, update.to_document())
                .upsert(upsert)
                .session(&mut self.session)
                .await
        };

        match result {
            Ok(result) => Ok(UpdateResult {
                matched_count: result.matched_count,
                modified_count: result.modified_count,
                upserted_id: result.upserted_id,
            }),
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn replace(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        mut document: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        let filter = MongoQueryTranslator::translate(filter)?;
        if !upsert {
            // The matched document keeps its own identifier.
            document.remove("_id");
        }

        let result = self
            .collection(ns)
            .replace_one(filter, document)
            .upsert(upsert)
            .session(&mut self.session)
            .await;

        match result {
            Ok(result) => Ok(UpdateResult {
                matched_count: result.matched_count,
                modified_count: result.modified_count,
                upserted_id: result.upserted_id,
            }),
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn delete(&mut self, ns: &Namespace, filter: &Expr, multi: bool) -> DocumentStoreResult<DeleteResult> {
        let filter = MongoQueryTranslator::translate(filter)?;
        let collection = self.collection(ns);

        let result = if multi {
            collection.delete_many(filter).session(&mut self.session).await
        } else {
            collection.delete_one(filter).session(&mut self.session).await
        };

        match result {
            Ok(result) => Ok(DeleteResult { deleted_count: result.deleted_count }),
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn aggregate(&mut self, ns: &Namespace, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
        let stages = pipeline.to_documents(MongoQueryTranslator::translate)?;
        let result = self
            .collection(ns)
            .aggregate(stages)
            .session(&mut self.session)
            .await;

        match result {
            Ok(cursor) => self.drain(ns, cursor).await,
            Err(err) => Err(self.fail(ns, err)),
        }
    }

    async fn start_transaction(&mut self) -> DocumentStoreResult<()> {
        self.session
            .start_transaction()
            .await
            .map_err(|e| DocumentStoreError::StoreOperation(e.to_string()))?;
        self.in_transaction = true;
        Ok(())
    }

    // Commit and abort are not retried, so the session leaves the transaction either way.
    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        let committed = self.session.commit_transaction().await;
        self.in_transaction = false;
        committed.map_err(|e| DocumentStoreError::StoreOperation(e.to_string()))
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        let aborted = self.session.abort_transaction().await;
        self.in_transaction = false;
        aborted.map_err(|e| DocumentStoreError::AbortFailed(e.to_string()))
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connection string of a replica set; tests needing a server return early without one.
    fn server_uri() -> Option<String> {
        std::env::var("DOCFLOW_MONGODB_URI").ok()
    }

    #[tokio::test]
    async fn transaction_flag_follows_start_and_abort() {
        let Some(uri) = server_uri() else {
            return;
        };
        let store = MongoDbStore::builder()
            .build(&ClientConfig::new(uri))
            .await
            .unwrap();
        let mut conn = store.connect().await.unwrap();
        assert!(!conn.in_transaction());

        conn.start_transaction().await.unwrap();
        assert!(conn.in_transaction());

        conn.abort_transaction().await.unwrap();
        assert!(!conn.in_transaction());

        conn.start_transaction().await.unwrap();
        conn.commit_transaction().await.unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.is_healthy());
    }

    #[tokio::test]
    async fn invalid_uri_is_a_configuration_error() {
        let err = MongoDbStore::builder()
            .build(&ClientConfig::new("not-a-uri"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Configuration(_)));
    }
}
