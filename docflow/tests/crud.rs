mod common;

use std::collections::HashSet;

use common::{UserInfo, connect, seed_ages};
use docflow::{memory::MemoryBackend, prelude::*};

#[tokio::test]
async fn inserted_records_get_distinct_identifiers() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let records = (0..20).map(|i| UserInfo::new(&format!("u{i}"), i)).collect::<Vec<_>>();
    let inserted = users.insert_many(&records).await.unwrap();
    let single = users.insert_one(&UserInfo::new("solo", 40)).await.unwrap();

    let mut ids = inserted.inserted_ids.into_iter().collect::<Vec<_>>();
    ids.push(single.inserted_id);

    assert!(ids.iter().all(|id| matches!(id, Bson::ObjectId(_))));
    let distinct = ids.iter().map(ToString::to_string).collect::<HashSet<_>>();
    assert_eq!(distinct.len(), 21);
}

#[tokio::test]
async fn insert_then_find_round_trips_the_record() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let inserted = users.insert_one(&UserInfo::new("alice", 30)).await.unwrap();
    let found: UserInfo = users.find(Filter::id(inserted.inserted_id.clone())).one().await.unwrap();

    assert_eq!(found.id.map(Bson::ObjectId), Some(inserted.inserted_id));
    assert_eq!(found.name, "alice");
    assert_eq!(found.age, 30);
    assert!(found.created_at.is_some());
    assert!(found.updated_at.is_some());
}

#[tokio::test]
async fn counts_groups_and_updates_a_population() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("people");
    seed_ages(&users).await;

    assert_eq!(users.count(Filter::eq("age", 6)).await.unwrap(), 4);
    assert_eq!(users.count(Filter::gt("age", 6)).await.unwrap(), 2);
    assert_eq!(users.find(Filter::all()).skip(2).limit(3).count().await.unwrap(), 3);

    let groups = users
        .aggregate(
            Pipeline::new()
                .group(Some("age"), [Accumulator::count("count")])
                .sort("_id", SortDirection::Asc),
        )
        .documents()
        .await
        .unwrap();
    assert_eq!(
        groups,
        vec![
            doc! { "_id": 6, "count": 4 },
            doc! { "_id": 7, "count": 1 },
            doc! { "_id": 8, "count": 1 },
        ]
    );

    let updated = users
        .update_many(Filter::eq("age", 6), Update::new().set("age", 10))
        .await
        .unwrap();
    assert_eq!(updated.matched_count, 4);
    assert_eq!(updated.modified_count, 4);
    assert_eq!(users.count(Filter::eq("age", 10)).await.unwrap(), 4);
    assert_eq!(users.count(Filter::eq("age", 6)).await.unwrap(), 0);

    let removed = users.remove_many(Filter::eq("age", 7)).await.unwrap();
    assert_eq!(removed.deleted_count, 1);
    assert_eq!(users.count(Filter::eq("age", 7)).await.unwrap(), 0);

    let everyone = users
        .update_many(Filter::all(), Update::new().set("age", 10))
        .await
        .unwrap();
    assert_eq!(everyone.matched_count, 5);
    assert_eq!(users.count(Filter::eq("age", 10)).await.unwrap(), 5);
}

#[tokio::test]
async fn find_sorts_skips_and_projects() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("people");
    seed_ages(&users).await;

    let oldest: Vec<UserInfo> = users
        .find(Filter::all())
        .sort("age", SortDirection::Desc)
        .limit(2)
        .all()
        .await
        .unwrap();
    assert_eq!(oldest.iter().map(|u| u.age).collect::<Vec<_>>(), vec![8, 7]);

    let names = users
        .find(Filter::eq("age", 7))
        .project(Projection::include(["name"]))
        .documents()
        .await
        .unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].get_str("name").unwrap(), "user-4");
    assert!(names[0].contains_key("_id"));
    assert!(!names[0].contains_key("age"));
}

#[tokio::test]
async fn replace_keeps_identity_and_creation_time() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let inserted = users.insert_one(&UserInfo::new("bob", 20)).await.unwrap();
    let stored: UserInfo = users.find(Filter::id(inserted.inserted_id.clone())).one().await.unwrap();

    let mut replacement = stored.clone();
    replacement.age = 21;
    users
        .replace_one(Filter::id(inserted.inserted_id.clone()), &replacement)
        .await
        .unwrap();

    let documents = users.find(Filter::all()).documents().await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].get("_id"), Some(&inserted.inserted_id));
    assert_eq!(documents[0].get_i32("age").unwrap(), 21);

    let replaced = UserInfo::from_document(documents[0].clone()).unwrap();
    assert_eq!(replaced.created_at, stored.created_at);
    assert!(replaced.updated_at >= stored.updated_at);
}

#[tokio::test]
async fn upsert_inserts_then_replaces() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let first = users
        .upsert(Filter::eq("name", "carol"), &UserInfo::new("carol", 33))
        .await
        .unwrap();
    assert_eq!(first.matched_count, 0);
    assert!(matches!(first.upserted_id, Some(Bson::ObjectId(_))));

    let second = users
        .upsert(Filter::eq("name", "carol"), &UserInfo::new("carol", 34))
        .await
        .unwrap();
    assert_eq!(second.matched_count, 1);
    assert_eq!(second.upserted_id, None);

    let stored: UserInfo = users.find(Filter::eq("name", "carol")).one().await.unwrap();
    assert_eq!(stored.age, 34);
    assert_eq!(stored.id.map(Bson::ObjectId), first.upserted_id);
    assert_eq!(users.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn removing_nothing_is_reported() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let err = users.remove_one(Filter::eq("name", "nobody")).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentNotFound(ns) if ns == "test.users"));

    let removed = users.remove_many(Filter::eq("name", "nobody")).await.unwrap();
    assert_eq!(removed.deleted_count, 0);

    let inserted = users.insert_one(&UserInfo::new("dave", 50)).await.unwrap();
    let removed = users.remove_id(inserted.inserted_id).await.unwrap();
    assert_eq!(removed.deleted_count, 1);
    assert_eq!(users.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn find_one_without_a_match_is_not_found() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let err = users.find(Filter::eq("name", "ghost")).one::<UserInfo>().await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentNotFound(_)));
}

#[tokio::test]
async fn duplicate_identifiers_are_rejected() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let mut user = UserInfo::new("erin", 28);
    user.id = Some(ObjectId::new());
    users.insert_one(&user).await.unwrap();

    let err = users.insert_one(&user).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DuplicateKey(_, _)));
    assert_eq!(users.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn empty_updates_are_rejected_before_the_store() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("users");

    let err = users.update_one(Filter::all(), Update::new()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    assert!(err.is_before_phase());
}

#[tokio::test]
async fn default_names_must_be_configured() {
    let client = connect(MemoryBackend::new()).await;
    assert_eq!(client.default_database().unwrap().name(), "test");
    assert!(matches!(client.default_collection(), Err(DocumentStoreError::Configuration(_))));

    let bare = Client::with_backend(MemoryBackend::new(), ClientConfig::default()).await.unwrap();
    assert!(matches!(bare.default_database(), Err(DocumentStoreError::Configuration(_))));

    let configured = Client::with_backend(
        MemoryBackend::new(),
        ClientConfig::default().database("app").collection("users"),
    )
    .await
    .unwrap();
    let users = configured.default_collection().unwrap();
    assert_eq!(users.namespace().to_string(), "app.users");
}

#[tokio::test]
async fn closed_client_refuses_operations() {
    let backend = MemoryBackend::new();
    let client = connect(backend.clone()).await;
    let users = client.database("test").collection("users");
    users.insert_one(&UserInfo::new("frank", 60)).await.unwrap();

    client.close().await.unwrap();
    assert!(client.is_closed());

    let err = users.count(Filter::all()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Closed));
    assert_eq!(backend.live_connections(), 0);
}

#[tokio::test]
async fn zero_limit_returns_everything() {
    let client = connect(MemoryBackend::new()).await;
    let users = client.database("test").collection("people");
    seed_ages(&users).await;

    let found = users.find(Filter::all()).limit(0).documents().await.unwrap();
    assert_eq!(found.len(), 6);
    assert_eq!(users.find(Filter::all()).limit(0).count().await.unwrap(), 6);
    assert_eq!(users.find(Filter::all()).skip(4).limit(0).count().await.unwrap(), 2);
}
