//! Integration tests for the Bastion document and key/value stores
//!
//! Runs against the database named by `BASTION_TEST_DATABASE_URL`. Every test
//! returns early when the variable is unset.

use bastion_client::ConnectionProvider;
use bastion_common::{AesGcmCipher, BastionError, StoreConfig};
use bastion_document::{DocumentStore, Entry, JsonDataStore, KeyValueStore, TableLayout, TypedStore};
use bastion_query::{ConditionGroup, Query, Sort, Traversal};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const DATABASE_URL_VAR: &str = "BASTION_TEST_DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestItem {
    id: String,
    name: String,
}

/// Shared provider against the test database, with a freshly dropped table.
async fn setup(table: &str) -> Option<Arc<ConnectionProvider>> {
    let url = std::env::var(DATABASE_URL_VAR).ok()?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let config = StoreConfig::from_url(&url).unwrap().with_pool_size(0, 5);
    let provider = Arc::new(ConnectionProvider::new(&config).unwrap());
    let pool = provider.pool().await.unwrap();
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
        .execute(&pool)
        .await
        .unwrap();
    Some(provider)
}

/// Like [`setup`], but with a single pooled connection that times out fast.
async fn single_connection(table: &str) -> Option<Arc<ConnectionProvider>> {
    setup(table).await?;
    let url = std::env::var(DATABASE_URL_VAR).ok()?;
    let mut config = StoreConfig::from_url(&url).unwrap().with_pool_size(0, 1);
    config.pool.acquire_timeout = std::time::Duration::from_secs(2);
    Some(Arc::new(ConnectionProvider::new(&config).unwrap()))
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

fn ids(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| v["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[tokio::test]
async fn test_round_trip_and_not_found() {
    let Some(provider) = setup("it_round_trip").await else { return };
    let store = DocumentStore::new(provider, "it_round_trip").unwrap();

    assert_eq!(store.get("missing").await.unwrap(), None);
    assert!(!store.exists("missing").await.unwrap());

    let doc = json!({"id": "1", "name": "One", "tags": ["a", "b"], "nested": {"n": 1.5}});
    store.save("1", &doc).await.unwrap();

    assert_eq!(store.get("1").await.unwrap(), Some(doc));
    assert!(store.exists("1").await.unwrap());
    assert_eq!(store.layout(), Some(TableLayout::full()));

    assert!(store.delete("1").await.unwrap());
    assert!(!store.delete("1").await.unwrap());
    assert_eq!(store.get("1").await.unwrap(), None);
}

#[tokio::test]
async fn test_save_is_idempotent_and_versioned() {
    let Some(provider) = setup("it_versions").await else { return };
    let store = DocumentStore::new(provider, "it_versions").unwrap();
    let key = keys(&["1234"]);

    let item = json!({"id": "1234", "name": "MyName"});
    store.save("1234", &item).await.unwrap();
    let meta = store.metadata(&key).await.unwrap();
    assert_eq!(meta[0].key, "1234");
    assert_eq!(meta[0].version, 1);

    store.save("1234", &item).await.unwrap();
    assert_eq!(store.metadata(&key).await.unwrap()[0].version, 1);
    assert_eq!(store.get_all().await.unwrap().len(), 1);

    store.save("1234", &json!({"id": "1234", "name": "Name2"})).await.unwrap();
    assert_eq!(store.metadata(&key).await.unwrap()[0].version, 2);
}

#[tokio::test]
async fn test_legacy_table_defaults() {
    let Some(provider) = setup("it_legacy").await else { return };
    let pool = provider.pool().await.unwrap();
    sqlx::query(
        "CREATE TABLE it_legacy (\
         id varchar(200) NOT NULL PRIMARY KEY, \
         version integer DEFAULT 1, \
         last_updated timestamp DEFAULT CURRENT_TIMESTAMP, \
         date_created timestamp DEFAULT CURRENT_TIMESTAMP, \
         data json)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO it_legacy (id, data) VALUES ('12345', '{\"id\":\"12345\",\"name\":\"OLD\"}')")
        .execute(&pool)
        .await
        .unwrap();

    let store = DocumentStore::new(provider, "it_legacy").unwrap();
    let item = store.get("12345").await.unwrap().unwrap();
    assert_eq!(item["name"], "OLD");

    let meta = store.metadata(&keys(&["12345"])).await.unwrap();
    assert_eq!(meta[0].key, "12345");
    assert_eq!(meta[0].version, 1);
}

#[tokio::test]
async fn test_minimal_table_defaults() {
    let Some(provider) = setup("it_minimal").await else { return };
    let pool = provider.pool().await.unwrap();
    sqlx::query("CREATE TABLE it_minimal (id varchar(200) NOT NULL PRIMARY KEY, data json NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();

    let store = DocumentStore::new(provider, "it_minimal").unwrap();
    store.save("a", &json!({"id": "a"})).await.unwrap();
    store.save("a", &json!({"id": "a", "v": 2})).await.unwrap();

    assert_eq!(store.layout(), Some(TableLayout::minimal()));
    let meta = store.metadata(&keys(&["a"])).await.unwrap();
    assert_eq!(meta[0].version, 1);
}

// =============================================================================
// Bulk Operations
// =============================================================================

#[tokio::test]
async fn test_save_all_is_atomic() {
    let Some(provider) = setup("it_save_all").await else { return };
    let store = DocumentStore::new(provider, "it_save_all").unwrap();

    let items: Vec<Value> = (0..10).map(|i| json!({"id": format!("item-{}", i), "count": i})).collect();
    let item_keys: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
    store.save_all(&items, &item_keys).await.unwrap();

    assert_eq!(store.get_all().await.unwrap().len(), 10);
    let meta = store.metadata(&item_keys).await.unwrap();
    assert_eq!(meta.len(), 10);
    for (i, m) in meta.iter().enumerate() {
        assert_eq!(m.key, item_keys[i]);
        assert_eq!(m.version, 1);
    }

    // One oversized key fails the whole batch.
    let long_key = "x".repeat(300);
    let err = store
        .save_all(&[json!({"id": "new"}), json!({"id": "long"})], &[String::from("new"), long_key])
        .await;
    assert!(err.is_err());
    assert!(!store.exists("new").await.unwrap());

    let err = store.save_all(&items[..2], &item_keys[..1]).await.unwrap_err();
    assert!(matches!(err, BastionError::MismatchedBatch { items: 2, keys: 1 }));
}

#[tokio::test]
async fn test_delete_all_and_delete_query() {
    let Some(provider) = setup("it_deletes").await else { return };
    let store = DocumentStore::new(provider, "it_deletes").unwrap();

    for (key, color) in [("a", "red"), ("b", "blue"), ("c", "red"), ("d", "green")] {
        store.save(key, &json!({"id": key, "color": color})).await.unwrap();
    }

    assert_eq!(store.delete_all(&keys(&["d", "zzz"])).await.unwrap(), 1);

    let mut query = Query::new();
    query.filter().equals("color", "red");
    assert_eq!(store.count(&query).await.unwrap(), 2);

    let mut removed = store.delete_query(&query).await.unwrap();
    removed.sort();
    assert_eq!(removed, keys(&["a", "c"]));
    assert_eq!(store.count(&Query::new()).await.unwrap(), 1);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_filter_sort_and_window() {
    let Some(provider) = setup("it_queries").await else { return };
    let store = DocumentStore::new(provider, "it_queries").unwrap();

    for i in 0..6 {
        let doc = json!({
            "id": format!("d{}", i),
            "size": i * 10,
            "kind": if i % 2 == 0 { "even" } else { "odd" },
            "tags": if i < 3 { json!(["low"]) } else { json!(["high"]) },
            "labels": {"app": "x"}
        });
        store.save(&format!("d{}", i), &doc).await.unwrap();
    }

    let mut query = Query::new().sort_by(Sort::desc("size")).with_limit(2);
    query.filter().greater_than_or_equal("size", 20).equals("kind", "even");
    assert_eq!(ids(&store.query(&query).await.unwrap()), keys(&["d4", "d2"]));

    let mut query = Query::new().sort_by(Sort::asc("id"));
    query.filter().includes("id", ["d1", "d5", "nope"]);
    assert_eq!(ids(&store.query(&query).await.unwrap()), keys(&["d1", "d5"]));

    let mut query = Query::new();
    query.filter().contains("tags", "high");
    assert_eq!(store.count(&query).await.unwrap(), 3);

    let mut query = Query::new();
    query.filter().has_key("labels", "app");
    assert_eq!(store.count(&query).await.unwrap(), 6);

    let mut either = ConditionGroup::or();
    either.between("size", 0, 10).is_null("missing_field");
    let query = Query::new().with_conditions(either);
    assert_eq!(store.count(&query).await.unwrap(), 6);

    let query = Query::new()
        .sort_by(Sort::asc("id"))
        .with_limit(1)
        .with_offset(1)
        .with_fields(["kind", "size"]);
    let rows = store.query_fields(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["kind"].as_deref(), Some("odd"));
    assert_eq!(rows[0]["size"].as_deref(), Some("10"));

    let mut nothing = Query::new();
    nothing.filter().equals("kind", "none");
    assert!(store.query(&nothing).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_operator_fails_at_execution() {
    let Some(provider) = setup("it_unknown_op").await else { return };
    let store = DocumentStore::new(provider, "it_unknown_op").unwrap();
    store.save("a", &json!({"id": "a"})).await.unwrap();

    let mut query = Query::new();
    query.filter().condition("id", "like", vec![json!("a%")]);
    assert!(query.validate().is_err());
    assert!(store.query(&query).await.is_err());
}

#[tokio::test]
async fn test_temporal_filters() {
    let Some(provider) = setup("it_temporal").await else { return };
    let store = DocumentStore::new(provider, "it_temporal").unwrap();

    let t = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    let earlier = t - ChronoDuration::seconds(10);
    let later = t + ChronoDuration::seconds(10);
    store.save("1", &json!({"id": "1", "timestamp": earlier})).await.unwrap();
    store.save("2", &json!({"id": "2", "timestamp": later})).await.unwrap();

    let mut before = Query::new();
    before.filter().before("timestamp", t);
    assert_eq!(ids(&store.query(&before).await.unwrap()), keys(&["1"]));

    let mut after = Query::new();
    after.filter().after("timestamp", t);
    assert_eq!(ids(&store.query(&after).await.unwrap()), keys(&["2"]));
}

#[tokio::test]
async fn test_recursive_traversal() {
    let Some(provider) = setup("it_tree").await else { return };
    let store = DocumentStore::new(provider, "it_tree").unwrap();

    store.save("A", &json!({"id": "A"})).await.unwrap();
    store.save("B", &json!({"id": "B", "parent": "A"})).await.unwrap();
    store.save("C", &json!({"id": "C", "parent": "B"})).await.unwrap();
    store.save("X", &json!({"id": "X"})).await.unwrap();

    let mut down = Query::new().recurse("id", "parent");
    down.filter().equals("id", "A");
    assert_eq!(ids(&store.query(&down).await.unwrap()), keys(&["A", "B", "C"]));

    let mut up = Query::new().recurse("parent", "id");
    up.filter().equals("id", "C");
    assert_eq!(ids(&store.query(&up).await.unwrap()), keys(&["C", "B", "A"]));

    let mut bounded = Query::new().with_traversal(Traversal::new("id", "parent").with_max_depth(1));
    bounded.filter().equals("id", "A");
    assert_eq!(ids(&store.query(&bounded).await.unwrap()), keys(&["A", "B"]));

    assert_eq!(store.count(&down).await.unwrap(), 3);

    let removed = store.delete_query(&down).await.unwrap();
    assert_eq!(removed, keys(&["A", "B", "C"]));
    assert_eq!(ids(&store.get_all().await.unwrap()), keys(&["X"]));
}

#[tokio::test]
async fn test_traversal_shared_ancestor_listed_once() {
    let Some(provider) = setup("it_shared_parent").await else { return };
    let store = DocumentStore::new(provider, "it_shared_parent").unwrap();

    store.save("A", &json!({"id": "A", "kind": "root"})).await.unwrap();
    store.save("B1", &json!({"id": "B1", "parent": "A", "kind": "leaf"})).await.unwrap();
    store.save("B2", &json!({"id": "B2", "parent": "A", "kind": "leaf"})).await.unwrap();

    let mut up = Query::new().recurse("parent", "id").sort_by(Sort::asc("id"));
    up.filter().equals("kind", "leaf");

    let found = store.query(&up).await.unwrap();
    assert_eq!(ids(&found), keys(&["B1", "B2", "A"]));
    assert_eq!(store.count(&up).await.unwrap(), found.len() as i64);

    let entries = store.query_entries(&up).await.unwrap();
    let listed: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(listed, vec!["B1", "B2", "A"]);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_query_and_update_serializes_writers() {
    let Some(provider) = setup("it_counter").await else { return };
    let store = Arc::new(DocumentStore::new(provider, "it_counter").unwrap());
    store.save("counter", &json!({"id": "counter", "n": 0})).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let mut query = Query::new();
                query.filter().equals("id", "counter");
                store
                    .query_and_update(&query, |mut locked| {
                        for entry in &mut locked {
                            let n = entry.data["n"].as_i64().unwrap_or(0);
                            entry.data["n"] = json!(n + 1);
                        }
                        Ok(locked)
                    })
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let doc = store.get("counter").await.unwrap().unwrap();
    assert_eq!(doc["n"], 20);
    assert_eq!(store.metadata(&keys(&["counter"])).await.unwrap()[0].version, 21);
}

#[tokio::test]
async fn test_query_and_update_rolls_back_on_error() {
    let Some(provider) = setup("it_rollback").await else { return };
    let store = DocumentStore::new(provider, "it_rollback").unwrap();
    store.save("a", &json!({"id": "a", "n": 1})).await.unwrap();

    let result = store
        .query_and_update(&Query::new(), |_| {
            Err(BastionError::UpdateRejected("no thanks".to_string()))
        })
        .await;
    assert!(matches!(result, Err(BastionError::UpdateRejected(_))));
    assert_eq!(store.get("a").await.unwrap().unwrap()["n"], 1);
}

#[tokio::test]
async fn test_unit_of_work_transaction() {
    let Some(provider) = setup("it_unit").await else { return };
    let store = DocumentStore::new(Arc::clone(&provider), "it_unit").unwrap();
    store.check().await.unwrap();

    let mut unit = provider.unit_of_work().await.unwrap();
    {
        let mut tx = unit.begin().await.unwrap();
        let mut scoped = store.on(&mut tx);
        scoped.save("rolled", &json!({"id": "rolled"})).await.unwrap();
        assert!(scoped.exists("rolled").await.unwrap());
        tx.rollback().await.unwrap();
    }
    assert!(!store.exists("rolled").await.unwrap());

    {
        let mut tx = unit.begin().await.unwrap();
        store.on(&mut tx).save("kept", &json!({"id": "kept"})).await.unwrap();
        tx.commit().await.unwrap();
    }
    assert!(store.scoped(&mut unit).exists("kept").await.unwrap());
    assert!(provider.stats().pinned_reuse >= 3);
}

#[tokio::test]
async fn test_first_use_inside_unit_on_single_connection() {
    let Some(provider) = single_connection("it_pinned_first").await else { return };
    let store = DocumentStore::new(Arc::clone(&provider), "it_pinned_first").unwrap();

    let mut unit = provider.unit_of_work().await.unwrap();
    {
        let mut tx = unit.begin().await.unwrap();
        let mut scoped = store.on(&mut tx);
        scoped.save("rolled", &json!({"id": "rolled"})).await.unwrap();
        assert!(scoped.exists("rolled").await.unwrap());
        tx.rollback().await.unwrap();
    }
    // The table went away with the rollback, so nothing may be cached.
    assert_eq!(store.layout(), None);

    store.scoped(&mut unit).save("kept", &json!({"id": "kept"})).await.unwrap();
    assert!(store.scoped(&mut unit).exists("kept").await.unwrap());
    assert!(!store.scoped(&mut unit).exists("rolled").await.unwrap());
    assert_eq!(store.layout(), Some(TableLayout::full()));
    drop(unit);

    assert_eq!(ids(&store.get_all().await.unwrap()), keys(&["kept"]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_table_once() {
    let Some(provider) = setup("it_race").await else { return };
    let gate = Arc::new(tokio::sync::Barrier::new(8));

    let mut tasks = Vec::new();
    for n in 0..8 {
        let provider = Arc::clone(&provider);
        let gate = Arc::clone(&gate);
        tasks.push(tokio::spawn(async move {
            let store = DocumentStore::new(provider, "it_race").unwrap();
            let key = format!("doc-{n}");
            gate.wait().await;
            store.save(&key, &json!({"id": key.as_str()})).await?;
            Ok::<_, BastionError>(store.layout())
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Some(TableLayout::full()));
    }

    let store = DocumentStore::new(provider, "it_race").unwrap();
    assert_eq!(store.count(&Query::new()).await.unwrap(), 8);
}

#[tokio::test]
async fn test_on_create_seeds_once() {
    let Some(provider) = setup("it_seeded").await else { return };
    let store = DocumentStore::new(Arc::clone(&provider), "it_seeded")
        .unwrap()
        .on_create(|| Ok(vec![Entry::new("root", json!({"id": "root"}))]));

    assert!(store.exists("root").await.unwrap());
    store.delete("root").await.unwrap();

    let reopened = DocumentStore::new(provider, "it_seeded")
        .unwrap()
        .on_create(|| Ok(vec![Entry::new("root", json!({"id": "root"}))]));
    assert!(!reopened.exists("root").await.unwrap());
}

// =============================================================================
// Typed Store
// =============================================================================

#[tokio::test]
async fn test_typed_store() {
    let Some(provider) = setup("it_typed").await else { return };
    let store: TypedStore<TestItem> = TypedStore::new(DocumentStore::new(provider, "it_typed").unwrap());

    let item = TestItem {
        id: "uvm-j8oxaig3z9g".to_string(),
        name: "first".to_string(),
    };
    store.save(&item, &item.id).await.unwrap();
    assert_eq!(store.get(&item.id).await.unwrap(), Some(item.clone()));

    let updated = store
        .query_and_update(
            &Query::new(),
            Box::new(|items| {
                Ok(items
                    .into_iter()
                    .map(|(key, mut item)| {
                        item.name = "second".to_string();
                        (key, item)
                    })
                    .collect())
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(store.get(&item.id).await.unwrap().unwrap().name, "second");

    store.inner().save("broken", &json!({"unexpected": true})).await.unwrap();
    assert!(matches!(
        store.get("broken").await,
        Err(BastionError::MalformedDocument { .. })
    ));
}

// =============================================================================
// Key/Value Store
// =============================================================================

#[tokio::test]
async fn test_key_value_store() {
    let Some(provider) = setup("it_settings").await else { return };
    let cipher = Arc::new(AesGcmCipher::from_passphrase("integration").unwrap());
    let kv = KeyValueStore::new(provider, "it_settings").unwrap().with_cipher(cipher);
    kv.init().await.unwrap();

    assert_eq!(kv.get("absent").await.unwrap(), None);

    kv.set("Mail.Host", "smtp.example.com").await.unwrap();
    assert_eq!(kv.get("mail-host").await.unwrap().as_deref(), Some("smtp.example.com"));

    let mut many = BTreeMap::new();
    many.insert("mail.port".to_string(), "25".to_string());
    many.insert("ui.theme".to_string(), "dark".to_string());
    kv.set_many(&many).await.unwrap();

    let mail = kv.get_with_prefix("mail.").await.unwrap();
    assert_eq!(mail.len(), 2);
    assert_eq!(mail["mail_port"], "25");
    assert_eq!(kv.get_all().await.unwrap().len(), 3);

    kv.set_secure("db.password", "s3cret").await.unwrap();
    assert_ne!(kv.get("db.password").await.unwrap().as_deref(), Some("s3cret"));
    assert_eq!(kv.get_secure("db.password").await.unwrap().as_deref(), Some("s3cret"));

    assert!(kv.delete("ui.theme").await.unwrap());
    assert_eq!(kv.get("ui.theme").await.unwrap(), None);
}
