//! In-memory storage implementation of the driver seam.
//!
//! Documents live in per-namespace vectors behind an async-aware read-write lock, kept in
//! insertion order. Every write works on a copy that replaces the stored vector only on success,
//! so a failing operation changes nothing.
//!
//! Transactions stage a private copy of each namespace on first touch. Commit publishes every
//! written namespace at once and fails with a write conflict when another session changed one of
//! them in the meantime.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::debug;

use docflow_core::{
    backend::{DeleteResult, Namespace, StoreBackend, StoreBackendBuilder, StoreConnection, UpdateResult},
    config::ClientConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::Pipeline,
    query::{Expr, FindSpec},
    update::Update,
};

use crate::{
    aggregate::{self, project},
    evaluator::{Comparable, DocumentEvaluator, compare_documents},
    update::{apply, seed},
};

#[derive(Debug, Default)]
struct CollectionData {
    /// Bumped on every published write.
    version: u64,
    documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct Shared {
    namespaces: RwLock<HashMap<Namespace, CollectionData>>,
    fail_next_commit: AtomicBool,
    fail_next_abort: AtomicBool,
    offline: AtomicBool,
    live_connections: AtomicUsize,
}

/// Thread-safe in-memory document store.
///
/// Clones share the same data, so a test can keep a handle for inspection after handing one to
/// the client.
///
/// ```ignore
/// let backend = MemoryBackend::new();
/// let client = Client::with_backend(backend.clone(), ClientConfig::default().database("test")).await?;
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder
    }

    /// Returns a copy of the committed documents of a collection.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.shared
            .namespaces
            .read()
            .await
            .get(&Namespace::new(database, collection))
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    /// Makes the next commit on any connection fail. The failed transaction is discarded.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::Release);
    }

    /// Makes the next abort on any connection fail. The connection stays inside its transaction,
    /// so the pool closes it instead of reusing it.
    pub fn fail_next_abort(&self) {
        self.shared.fail_next_abort.store(true, Ordering::Release);
    }

    /// While offline, dialling fails and operations on open connections fail with a connection
    /// error, marking those connections unhealthy.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::Release);
    }

    /// Number of connections dialled and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.shared.live_connections.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn connect(&self) -> DocumentStoreResult<Box<dyn StoreConnection>> {
        if self.shared.offline.load(Ordering::Acquire) {
            return Err(DocumentStoreError::Connection("memory backend is offline".to_string()));
        }

        self.shared.live_connections.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            workspace: None,
            healthy: true,
            closed: false,
        }))
    }
}

/// Builder for [`MemoryBackend`]. The connection string is ignored.
#[derive(Debug, Default)]
pub struct MemoryBackendBuilder;

#[async_trait]
impl StoreBackendBuilder for MemoryBackendBuilder {
    type Backend = MemoryBackend;

    async fn build(self, _config: &ClientConfig) -> DocumentStoreResult<Self::Backend> {
        Ok(MemoryBackend::new())
    }
}

#[derive(Debug, Default)]
struct Staged {
    base_version: u64,
    documents: Vec<Document>,
    dirty: bool,
}

/// One session with a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    workspace: Option<HashMap<Namespace, Staged>>,
    healthy: bool,
    closed: bool,
}

impl MemoryConnection {
    fn check(&mut self) -> DocumentStoreResult<()> {
        if self.closed {
            return Err(DocumentStoreError::Closed);
        }
        if self.shared.offline.load(Ordering::Acquire) {
            self.healthy = false;
            return Err(DocumentStoreError::Connection("memory backend is offline".to_string()));
        }
        Ok(())
    }

    /// The transaction's private copy of `ns`, staged on first touch.
    async fn stage(&mut self, ns: &Namespace) -> DocumentStoreResult<&mut Staged> {
        let shared = &self.shared;
        let Some(workspace) = self.workspace.as_mut() else {
            return Err(DocumentStoreError::StoreOperation("no transaction in progress".to_string()));
        };

        match workspace.entry(ns.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let namespaces = shared.namespaces.read().await;
                let staged = namespaces
                    .get(ns)
                    .map(|data| Staged {
                        base_version: data.version,
                        documents: data.documents.clone(),
                        dirty: false,
                    })
                    .unwrap_or_default();
                drop(namespaces);
                Ok(entry.insert(staged))
            }
        }
    }

    async fn read<T, F>(&mut self, ns: &Namespace, f: F) -> DocumentStoreResult<T>
    where
        F: FnOnce(&[Document]) -> DocumentStoreResult<T> + Send,
    {
        self.check()?;

        if self.workspace.is_some() {
            let staged = self.stage(ns).await?;
            return f(&staged.documents);
        }

        let namespaces = self.shared.namespaces.read().await;
        f(namespaces.get(ns).map_or(&[][..], |data| data.documents.as_slice()))
    }

    async fn write<T, F>(&mut self, ns: &Namespace, f: F) -> DocumentStoreResult<T>
    where
        F: FnOnce(&mut Vec<Document>) -> DocumentStoreResult<T> + Send,
    {
        self.check()?;

        if self.workspace.is_some() {
            let staged = self.stage(ns).await?;
            let mut documents = staged.documents.clone();
            let output = f(&mut documents)?;
            staged.documents = documents;
            staged.dirty = true;
            return Ok(output);
        }

        let mut namespaces = self.shared.namespaces.write().await;
        let data = namespaces.entry(ns.clone()).or_default();
        let mut documents = data.documents.clone();
        let output = f(&mut documents)?;
        data.documents = documents;
        data.version += 1;
        Ok(output)
    }
}

fn matches(document: &Document, filter: &Expr) -> DocumentStoreResult<bool> {
    DocumentEvaluator::matches(document, filter)
}

fn same_id(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Puts a generated `_id` first when the document has none.
fn with_id(document: Document) -> (Bson, Document) {
    if let Some(id) = document.get("_id") {
        return (id.clone(), document);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let identified = std::iter::once(("_id".to_string(), id.clone()))
        .chain(document)
        .collect();
    (id, identified)
}

fn ensure_unique(ns: &Namespace, documents: &[Document], id: &Bson) -> DocumentStoreResult<()> {
    let taken = documents
        .iter()
        .any(|existing| existing.get("_id").is_some_and(|existing| same_id(existing, id)));

    if taken {
        return Err(DocumentStoreError::DuplicateKey(id.to_string(), ns.to_string()));
    }
    Ok(())
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn insert(&mut self, ns: &Namespace, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        self.write(ns, |stored| {
            let mut ids = Vec::with_capacity(documents.len());
            for document in documents {
                let (id, document) = with_id(document);
                ensure_unique(ns, stored, &id)?;
                stored.push(document);
                ids.push(id);
            }
            Ok(ids)
        })
        .await
    }

    async fn find(&mut self, ns: &Namespace, spec: &FindSpec) -> DocumentStoreResult<Vec<Document>> {
        self.read(ns, |stored| {
            let mut found = Vec::new();
            for document in stored {
                if matches(document, &spec.filter)? {
                    found.push(document.clone());
                }
            }

            if !spec.sort.is_empty() {
                found.sort_by(|a, b| compare_documents(a, b, &spec.sort));
            }

            Ok(found
                .into_iter()
                .skip(spec.skip.unwrap_or(0) as usize)
                .take(spec.effective_limit().map_or(usize::MAX, |limit| limit as usize))
                .map(|document| match &spec.projection {
                    Some(projection) => project(document, projection),
                    None => document,
                })
                .collect())
        })
        .await
    }

    async fn count(&mut self, ns: &Namespace, filter: &Expr) -> DocumentStoreResult<u64> {
        self.read(ns, |stored| {
            let mut count = 0;
            for document in stored {
                if matches(document, filter)? {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }

    async fn update(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        update: &Update,
        multi: bool,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        self.write(ns, |stored| {
            let mut result = UpdateResult::default();

            for document in stored.iter_mut() {
                if !matches(document, filter)? {
                    continue;
                }
                result.matched_count += 1;
                if apply(document, update)? {
                    result.modified_count += 1;
                }
                if !multi {
                    break;
                }
            }

            if result.matched_count == 0 && upsert {
                let mut document = seed(filter);
                apply(&mut document, update)?;
                let (id, document) = with_id(document);
                ensure_unique(ns, stored, &id)?;
                stored.push(document);
                result.upserted_id = Some(id);
            }

            Ok(result)
        })
        .await
    }

    async fn replace(
        &mut self,
        ns: &Namespace,
        filter: &Expr,
        mut document: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateResult> {
        self.write(ns, |stored| {
            let mut target = None;
            for (index, existing) in stored.iter().enumerate() {
                if matches(existing, filter)? {
                    target = Some(index);
                    break;
                }
            }

            match target {
                Some(index) => {
                    let existing = &mut stored[index];
                    if let Some(id) = existing.get("_id") {
                        document.insert("_id", id.clone());
                    }
                    let modified = *existing != document;
                    *existing = document;
                    Ok(UpdateResult {
                        matched_count: 1,
                        modified_count: u64::from(modified),
                        upserted_id: None,
                    })
                }
                None if upsert => {
                    if !document.contains_key("_id") {
                        if let Some(id) = seed(filter).get("_id") {
                            document.insert("_id", id.clone());
                        }
                    }
                    let (id, document) = with_id(document);
                    ensure_unique(ns, stored, &id)?;
                    stored.push(document);
                    Ok(UpdateResult { upserted_id: Some(id), ..UpdateResult::default() })
                }
                None => Ok(UpdateResult::default()),
            }
        })
        .await
    }

    async fn delete(&mut self, ns: &Namespace, filter: &Expr, multi: bool) -> DocumentStoreResult<DeleteResult> {
        self.write(ns, |stored| {
            let mut kept = Vec::with_capacity(stored.len());
            let mut deleted_count = 0;

            for document in stored.drain(..) {
                if (multi || deleted_count == 0) && matches(&document, filter)? {
                    deleted_count += 1;
                } else {
                    kept.push(document);
                }
            }

            *stored = kept;
            Ok(DeleteResult { deleted_count })
        })
        .await
    }

    async fn aggregate(&mut self, ns: &Namespace, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
        self.read(ns, |stored| aggregate::run(stored.to_vec(), pipeline)).await
    }

    async fn start_transaction(&mut self) -> DocumentStoreResult<()> {
        self.check()?;
        if self.workspace.is_some() {
            return Err(DocumentStoreError::StoreOperation(
                "transaction already in progress".to_string(),
            ));
        }

        self.workspace = Some(HashMap::new());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        let Some(workspace) = self.workspace.take() else {
            return Err(DocumentStoreError::StoreOperation("no transaction in progress".to_string()));
        };
        self.check()?;

        if self.shared.fail_next_commit.swap(false, Ordering::AcqRel) {
            return Err(DocumentStoreError::StoreOperation("commit rejected by the store".to_string()));
        }

        let mut namespaces = self.shared.namespaces.write().await;
        for (ns, staged) in workspace.iter().filter(|(_, staged)| staged.dirty) {
            let current = namespaces.get(ns).map_or(0, |data| data.version);
            if current != staged.base_version {
                return Err(DocumentStoreError::StoreOperation(format!("write conflict on {ns}")));
            }
        }

        let mut published = 0;
        for (ns, staged) in workspace.into_iter().filter(|(_, staged)| staged.dirty) {
            let data = namespaces.entry(ns).or_default();
            data.documents = staged.documents;
            data.version += 1;
            published += 1;
        }

        debug!(target: "docflow::memory", published, "transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        if self.workspace.is_some() && self.shared.fail_next_abort.swap(false, Ordering::AcqRel) {
            return Err(DocumentStoreError::AbortFailed("abort rejected by the store".to_string()));
        }

        match self.workspace.take() {
            Some(workspace) => {
                debug!(target: "docflow::memory", discarded = workspace.len(), "transaction aborted");
                Ok(())
            }
            None => Err(DocumentStoreError::StoreOperation("no transaction in progress".to_string())),
        }
    }

    fn in_transaction(&self) -> bool {
        self.workspace.is_some()
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn close(&mut self) -> DocumentStoreResult<()> {
        if !self.closed {
            self.closed = true;
            self.workspace = None;
            self.shared.live_connections.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}
