mod common;

use common::connect;
use docflow::{memory::MemoryBackend, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Record)]
#[serde(rename_all = "camelCase")]
struct SignUp {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[validate(required, min_len = 2, max_len = 16)]
    user_name: String,
    #[validate(required, email)]
    email_address: String,
    #[validate(range(min = 13, max = 130))]
    age: i32,
    #[validate(range(min = -10.5))]
    balance: Option<f64>,
}

impl SignUp {
    fn valid() -> Self {
        Self {
            id: None,
            user_name: "jo".to_string(),
            email_address: "jo@example.com".to_string(),
            age: 30,
            balance: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Record)]
struct Ticket {
    #[record(id)]
    key: String,
    title: String,
    #[serde(rename = "openedAt")]
    #[record(created_at)]
    opened_at: i64,
    #[record(updated_at)]
    touched: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Record)]
struct Counter {
    #[record(id)]
    #[serde(rename = "_id")]
    id: i64,
}

#[tokio::test]
async fn validation_reports_every_violation() {
    let client = connect(MemoryBackend::new()).await;
    let signups = client.database("test").collection("signups");

    let invalid = SignUp {
        user_name: String::new(),
        email_address: "not-an-address".to_string(),
        age: 7,
        balance: Some(-20.0),
        ..SignUp::valid()
    };
    let err = signups.insert_one(&invalid).await.unwrap_err();

    let violated = err
        .violations()
        .unwrap()
        .iter()
        .map(|violation| (violation.field.as_str(), violation.constraint))
        .collect::<Vec<_>>();
    assert_eq!(
        violated,
        vec![
            ("userName", Constraint::Required),
            ("userName", Constraint::MinLen),
            ("emailAddress", Constraint::Email),
            ("age", Constraint::Range),
            ("balance", Constraint::Range),
        ]
    );
    assert!(err.is_before_phase());
    assert_eq!(signups.count(Filter::all()).await.unwrap(), 0);

    signups.insert_one(&SignUp::valid()).await.unwrap();
    assert_eq!(signups.count(Filter::eq("userName", "jo")).await.unwrap(), 1);
}

#[tokio::test]
async fn custom_fields_are_generated_in_their_own_kind() {
    let client = connect(MemoryBackend::new()).await;
    let tickets = client.database("test").collection("tickets");

    let ticket = Ticket {
        key: String::new(),
        title: "printer on fire".to_string(),
        opened_at: 0,
        touched: String::new(),
    };
    tickets.insert_one(&ticket).await.unwrap();

    let stored: Ticket = tickets.find(Filter::all()).one().await.unwrap();
    assert_eq!(stored.key.len(), 24);
    assert!(ObjectId::parse_str(&stored.key).is_ok());
    assert!(stored.opened_at > 1_600_000_000);
    assert!(chrono::DateTime::parse_from_rfc3339(&stored.touched).is_ok());

    let explicit = Ticket { key: "T-1".to_string(), ..ticket };
    tickets.insert_one(&explicit).await.unwrap();
    assert_eq!(tickets.count(Filter::eq("key", "T-1")).await.unwrap(), 1);
}

#[tokio::test]
async fn integer_identifiers_are_never_generated() {
    let client = connect(MemoryBackend::new()).await;
    let counters = client.database("test").collection("counters");

    let err = counters.insert_one(&Counter { id: 0 }).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Configuration(_)));

    let inserted = counters.insert_one(&Counter { id: 7 }).await.unwrap();
    assert_eq!(inserted.inserted_id, Bson::Int64(7));
}

#[tokio::test]
async fn explicit_timestamps_are_kept_on_insert() {
    #[derive(Debug, Clone, Serialize, Deserialize, Record)]
    struct Event {
        #[serde(rename = "_id")]
        id: ObjectId,
        #[serde(rename = "createAt")]
        created_at: DateTime,
        #[serde(rename = "updateAt")]
        updated_at: DateTime,
    }

    let client = connect(MemoryBackend::new()).await;
    let events = client.database("test").collection("events");

    let created = DateTime::from_millis(1_000_000);
    let zero = Event {
        id: ObjectId::from_bytes([0; 12]),
        created_at: DateTime::from_millis(0),
        updated_at: DateTime::from_millis(0),
    };
    let historic = Event { id: ObjectId::new(), created_at: created, updated_at: created };

    events.insert_many(&[zero, historic.clone()]).await.unwrap();

    let stored: Vec<Event> = events.find(Filter::all()).all().await.unwrap();
    assert_ne!(stored[0].id, ObjectId::from_bytes([0; 12]));
    assert!(stored[0].created_at.timestamp_millis() > 0);

    assert_eq!(stored[1].id, historic.id);
    assert_eq!(stored[1].created_at, created);
    assert!(stored[1].updated_at > created);
}

#[tokio::test]
async fn documents_are_records_too() {
    let client = connect(MemoryBackend::new()).await;
    let raw = client.database("test").collection("raw");

    raw.insert_one(&doc! { "kind": "plain", "tags": ["a", "b"] }).await.unwrap();
    let found: Document = raw.find(Filter::contains("tags", "a")).one().await.unwrap();

    assert!(found.get_object_id("_id").is_ok());
    assert!(found.get_datetime("createAt").is_err());
}

#[tokio::test]
async fn flattened_default_fields_round_trip() {
    #[derive(Debug, Clone, Serialize, Deserialize, Record)]
    struct Article {
        #[serde(flatten)]
        base: DefaultField,
        #[validate(required)]
        title: String,
    }

    let client = connect(MemoryBackend::new()).await;
    let articles = client.database("test").collection("articles");

    let inserted = articles
        .insert_one(&Article { base: DefaultField::new(), title: "hello".to_string() })
        .await
        .unwrap();

    let stored: Article = articles.find(Filter::id(inserted.inserted_id.clone())).one().await.unwrap();
    assert_eq!(stored.base.id.map(Bson::ObjectId), Some(inserted.inserted_id));
    assert!(stored.base.create_at.is_some());
    assert!(stored.base.update_at.is_some());
    assert_eq!(stored.title, "hello");

    let err = articles
        .insert_one(&Article { base: DefaultField::new(), title: String::new() })
        .await
        .unwrap_err();
    assert!(err.violations().is_some());
}
