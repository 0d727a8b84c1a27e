mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use common::{UserInfo, connect};
use docflow::{memory::MemoryBackend, middleware, prelude::*};
use parking_lot::{Mutex, const_mutex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
#[record(hooks)]
struct Guarded {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    #[serde(skip)]
    reject_before: bool,
    #[serde(skip)]
    reject_after: bool,
}

#[async_trait]
impl RecordHooks for Guarded {
    async fn before_insert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        if self.reject_before {
            return Err(format!("{} is not welcome", self.name).into());
        }
        Ok(())
    }

    async fn after_insert(&self, _ctx: &OpContext) -> Result<(), BoxError> {
        if self.reject_after {
            return Err("audit log unavailable".into());
        }
        Ok(())
    }
}

fn guarded(name: &str) -> Guarded {
    Guarded { name: name.to_string(), ..Guarded::default() }
}

#[tokio::test]
async fn failing_before_hook_prevents_the_write() {
    let client = connect(MemoryBackend::new()).await;
    let guests = client.database("test").collection("guests");
    guests.insert_one(&guarded("ok")).await.unwrap();

    let rejected = Guarded { reject_before: true, ..guarded("mallory") };
    let err = guests.insert_one(&rejected).await.unwrap_err();

    match &err {
        DocumentStoreError::HookFailed { op_type, source } => {
            assert_eq!(*op_type, OpType::BEFORE_INSERT);
            assert_eq!(source.to_string(), "mallory is not welcome");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_before_phase());
    assert_eq!(guests.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn failing_after_hook_keeps_the_write() {
    let client = connect(MemoryBackend::new()).await;
    let guests = client.database("test").collection("guests");

    let late = Guarded { reject_after: true, ..guarded("trent") };
    let err = guests.insert_one(&late).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::HookFailed { op_type: OpType::AFTER_INSERT, .. }));
    assert!(!err.is_before_phase());
    assert_eq!(guests.count(Filter::eq("name", "trent")).await.unwrap(), 1);
}

#[tokio::test]
async fn one_rejected_record_aborts_the_whole_batch() {
    let client = connect(MemoryBackend::new()).await;
    let guests = client.database("test").collection("guests");

    let batch = [
        guarded("a"),
        Guarded { reject_before: true, ..guarded("b") },
        guarded("c"),
    ];
    assert!(guests.insert_many(&batch).await.is_err());
    assert_eq!(guests.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_before_middleware_prevents_the_write() {
    const COLLECTION: &str = "append-only";

    middleware::register(middleware::from_fn(|ctx, _, op, _| {
        if ctx.collection() == COLLECTION && op == OpType::BEFORE_REMOVE {
            return Err("append-only collection".into());
        }
        Ok(())
    }));

    let client = connect(MemoryBackend::new()).await;
    let entries = client.database("test").collection(COLLECTION);
    entries.insert_one(&UserInfo::new("entry", 1)).await.unwrap();

    let err = entries.remove_many(Filter::all()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::MiddlewareFailed { op_type: OpType::BEFORE_REMOVE, .. }));
    assert_eq!(entries.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn middleware_wraps_hooks() {
    const COLLECTION: &str = "wrapped";
    static SEEN: Mutex<Vec<String>> = const_mutex(Vec::new());

    struct Recording;

    #[async_trait]
    impl RecordHooks for Recording {
        async fn before_query(&self, _ctx: &OpContext) -> Result<(), BoxError> {
            SEEN.lock().push("hook:before".to_string());
            Ok(())
        }

        async fn after_query(&self, _ctx: &OpContext) -> Result<(), BoxError> {
            SEEN.lock().push("hook:after".to_string());
            Ok(())
        }
    }

    middleware::register(middleware::from_fn(|ctx, subject, op, _| {
        if ctx.collection() == COLLECTION && matches!(subject, Subject::Filter(_)) {
            let phase = match op.phase() {
                HookPhase::Before => "before",
                HookPhase::After => "after",
            };
            SEEN.lock().push(format!("middleware:{phase}"));
        }
        Ok(())
    }));

    let client = connect(MemoryBackend::new()).await;
    let wrapped = client.database("test").collection(COLLECTION);
    wrapped
        .find(Filter::all())
        .hooks(Arc::new(Recording))
        .documents()
        .await
        .unwrap();

    assert_eq!(
        *SEEN.lock(),
        vec!["middleware:before", "hook:before", "hook:after", "middleware:after"]
    );
}

#[tokio::test]
async fn middleware_sees_records_and_options() {
    const COLLECTION: &str = "imports";
    static IMPORTED: AtomicUsize = AtomicUsize::new(0);

    struct Source(&'static str);

    middleware::register(middleware::from_fn(|ctx, subject, op, options| {
        if ctx.collection() != COLLECTION || op != OpType::AFTER_INSERT {
            return Ok(());
        }
        if let Subject::Record(record) = subject {
            let user = record.downcast_ref::<UserInfo>().ok_or("not a user")?;
            if options.get::<Source>().is_some_and(|source| source.0 == "csv") && user.age >= 18 {
                IMPORTED.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }));

    let client = connect(MemoryBackend::new()).await;
    let imports = client.database("test").collection(COLLECTION);
    let batch = [UserInfo::new("adult", 30), UserInfo::new("child", 9), UserInfo::new("senior", 70)];

    imports.insert_many(&batch).option(Source("csv")).await.unwrap();
    imports.insert_one(&UserInfo::new("manual", 40)).await.unwrap();

    assert_eq!(IMPORTED.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expression_operations_take_hooks_on_the_call() {
    #[derive(Default)]
    struct Counting {
        updates: AtomicUsize,
        removals: AtomicUsize,
    }

    #[async_trait]
    impl RecordHooks for Counting {
        async fn after_update(&self, _ctx: &OpContext) -> Result<(), BoxError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn before_remove(&self, ctx: &OpContext) -> Result<(), BoxError> {
            assert_eq!(ctx.kind(), OpKind::Remove);
            self.removals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("counted");
    users.insert_one(&UserInfo::new("gina", 22)).await.unwrap();

    let hooks = Arc::new(Counting::default());
    users
        .update_one(Filter::eq("name", "gina"), Update::new().inc("age", 1))
        .hooks(hooks.clone())
        .await
        .unwrap();
    users.remove_one(Filter::eq("name", "gina")).hooks(hooks.clone()).await.unwrap();

    assert_eq!(hooks.updates.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.removals.load(Ordering::SeqCst), 1);
}
