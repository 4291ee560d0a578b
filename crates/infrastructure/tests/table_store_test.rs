use std::sync::Arc;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;

use scheduler_core::config::DatabaseConfig;
use scheduler_core::models::{
    Comparison, Condition, ConditionalWrite, Query, Row, SortOrder, UpdateRequest,
};
use scheduler_core::traits::TableStore;
use scheduler_infrastructure::{InMemoryTableStore, SqliteTableStore};

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn key(task_id: &str) -> Row {
    row(json!({ "task_id": task_id }))
}

async fn sqlite_store() -> SqliteTableStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteTableStore::new(pool, "task_id");
    store.migrate().await.unwrap();
    store
}

async fn stores() -> Vec<(&'static str, Arc<dyn TableStore>)> {
    vec![
        ("memory", Arc::new(InMemoryTableStore::new("task_id"))),
        ("sqlite", Arc::new(sqlite_store().await)),
    ]
}

async fn seed(store: &dyn TableStore) {
    for (task_id, labourer_id, greenfield) in [
        ("a", "some_function", 3000),
        ("b", "some_function", 1000),
        ("c", "some_function", 2000),
        ("d", "other_function", 1500),
    ] {
        store
            .put(
                "tasks",
                &row(json!({
                    "task_id": task_id,
                    "labourer_id": labourer_id,
                    "greenfield": greenfield,
                    "attempts": 0
                })),
            )
            .await
            .unwrap();
    }
}

fn ids(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r["task_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_put_overwrites_and_delete_removes() {
    for (name, store) in stores().await {
        store
            .put("tasks", &row(json!({"task_id": "x", "v": 1})))
            .await
            .unwrap();
        store
            .put("tasks", &row(json!({"task_id": "x", "v": 2})))
            .await
            .unwrap();

        let rows = store.query("tasks", &Query::new()).await.unwrap();
        assert_eq!(rows, vec![row(json!({"task_id": "x", "v": 2}))], "{name}");

        store.delete("tasks", &key("x")).await.unwrap();
        store.delete("tasks", &key("never")).await.unwrap();
        assert_eq!(store.count("tasks", &Query::new()).await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn test_tables_are_isolated() {
    for (name, store) in stores().await {
        store.put("tasks", &row(json!({"task_id": "x"}))).await.unwrap();
        store
            .put("retry_tasks", &row(json!({"task_id": "x", "desired_launch_time": 5})))
            .await
            .unwrap();

        store.delete("tasks", &key("x")).await.unwrap();
        assert_eq!(store.count("tasks", &Query::new()).await.unwrap(), 0, "{name}");
        assert_eq!(
            store.count("retry_tasks", &Query::new()).await.unwrap(),
            1,
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_query_filters_sorts_and_limits() {
    for (name, store) in stores().await {
        seed(store.as_ref()).await;

        let query = Query::new()
            .where_eq("labourer_id", "some_function")
            .filter("greenfield", Comparison::Lt(json!(2500)))
            .sort_by("greenfield", SortOrder::Descending);
        let rows = store.query("tasks", &query).await.unwrap();
        assert_eq!(ids(&rows), vec!["c", "b"], "{name}");

        let oldest = store
            .query(
                "tasks",
                &Query::new()
                    .where_eq("labourer_id", "some_function")
                    .sort_by("greenfield", SortOrder::Ascending)
                    .max_items(1),
            )
            .await
            .unwrap();
        assert_eq!(ids(&oldest), vec!["b"], "{name}");

        let between = store
            .query(
                "tasks",
                &Query::new()
                    .filter("greenfield", Comparison::Between(json!(1500), json!(2000)))
                    .sort_by("greenfield", SortOrder::Ascending),
            )
            .await
            .unwrap();
        assert_eq!(ids(&between), vec!["d", "c"], "{name}");
    }
}

#[tokio::test]
async fn test_count_ignores_max_items() {
    for (name, store) in stores().await {
        seed(store.as_ref()).await;

        let query = Query::new()
            .where_eq("labourer_id", "some_function")
            .filter("greenfield", Comparison::Ge(json!(2000)))
            .max_items(1);
        assert_eq!(store.count("tasks", &query).await.unwrap(), 2, "{name}");
    }
}

#[tokio::test]
async fn test_exists_conditions() {
    for (name, store) in stores().await {
        store
            .put("tasks", &row(json!({"task_id": "x", "completed_at": 10})))
            .await
            .unwrap();
        store.put("tasks", &row(json!({"task_id": "y"}))).await.unwrap();

        let done = store
            .query(
                "tasks",
                &Query::new().filter("completed_at", Comparison::Exists),
            )
            .await
            .unwrap();
        assert_eq!(ids(&done), vec!["x"], "{name}");

        let open = store
            .query(
                "tasks",
                &Query::new().filter("completed_at", Comparison::NotExists),
            )
            .await
            .unwrap();
        assert_eq!(ids(&open), vec!["y"], "{name}");
    }
}

#[tokio::test]
async fn test_conditional_update() {
    for (name, store) in stores().await {
        seed(store.as_ref()).await;

        let request = UpdateRequest::new(key("a"))
            .set("greenfield", 99_999)
            .increment("attempts", 1)
            .condition(Condition::new("task_id", Comparison::Exists))
            .condition(Condition::eq("greenfield", 3000))
            .condition(Condition::eq("attempts", 0));

        assert_eq!(
            store.update("tasks", &request).await.unwrap(),
            ConditionalWrite::Applied,
            "{name}"
        );
        // 同一请求再次执行时 greenfield 已变化
        assert_eq!(
            store.update("tasks", &request).await.unwrap(),
            ConditionalWrite::PreconditionFailed,
            "{name}"
        );

        let rows = store
            .query("tasks", &Query::new().where_eq("task_id", "a"))
            .await
            .unwrap();
        assert_eq!(rows[0]["greenfield"], json!(99_999), "{name}");
        assert_eq!(rows[0]["attempts"], json!(1), "{name}");
        assert_eq!(rows[0]["labourer_id"], json!("some_function"), "{name}");
    }
}

#[tokio::test]
async fn test_conditional_update_on_missing_row() {
    for (name, store) in stores().await {
        let guarded = UpdateRequest::new(key("ghost"))
            .set("completed_at", 5)
            .condition(Condition::new("task_id", Comparison::Exists));
        assert_eq!(
            store.update("tasks", &guarded).await.unwrap(),
            ConditionalWrite::PreconditionFailed,
            "{name}"
        );
        assert_eq!(store.count("tasks", &Query::new()).await.unwrap(), 0, "{name}");

        let upsert = UpdateRequest::new(key("fresh")).increment("attempts", 1);
        assert_eq!(
            store.update("tasks", &upsert).await.unwrap(),
            ConditionalWrite::Applied,
            "{name}"
        );
        let rows = store.query("tasks", &Query::new()).await.unwrap();
        assert_eq!(rows, vec![row(json!({"task_id": "fresh", "attempts": 1}))], "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_claims_only_one_succeeds() {
    for (name, store) in stores().await {
        seed(store.as_ref()).await;

        let claim = || {
            let store = store.clone();
            async move {
                let request = UpdateRequest::new(key("b"))
                    .set("greenfield", 50_000)
                    .increment("attempts", 1)
                    .condition(Condition::eq("greenfield", 1000))
                    .condition(Condition::eq("attempts", 0));
                store.update("tasks", &request).await.unwrap()
            }
        };

        let (first, second) = tokio::join!(claim(), claim());
        let applied = [first, second].iter().filter(|w| w.is_applied()).count();
        assert_eq!(applied, 1, "{name}");
    }
}

#[tokio::test]
async fn test_sqlite_store_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("tasks.db").display()),
        max_connections: 2,
        ..DatabaseConfig::default()
    };

    let store = SqliteTableStore::connect(&config, "task_id").await.unwrap();
    store.health_check().await.unwrap();
    store
        .put("tasks", &row(json!({"task_id": "kept", "greenfield": 1})))
        .await
        .unwrap();
    store.close().await;

    let reopened = SqliteTableStore::connect(&config, "task_id").await.unwrap();
    let rows = reopened.query("tasks", &Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec!["kept"]);
}
