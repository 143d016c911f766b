//! Runs against a real Postgres when `EXTRACTOR_TEST_DB_URL` (or
//! `DATABASE_URL`) is set; otherwise every test returns early.

use chrono::{TimeZone, Utc};
use extractor::model::ExtractedRow;
use extractor::store::{PgSink, RowSink, TableName};
use extractor_core::Error;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

fn database_url() -> Option<String> {
    std::env::var("EXTRACTOR_TEST_DB_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| !url.trim().is_empty())
}

struct TestSchema {
    pool: PgPool,
    sink: PgSink,
    schema: String,
}

impl TestSchema {
    async fn teardown(self) {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

async fn setup() -> Option<TestSchema> {
    let Some(url) = database_url() else {
        eprintln!("skipping: EXTRACTOR_TEST_DB_URL not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    let schema = format!("extractor_test_{}", uuid::Uuid::new_v4().simple());
    let table = TableName::new(&schema, "qb_items").unwrap();
    let sink = PgSink::new(pool.clone(), table, 2);
    sink.ensure_table().await.unwrap();

    Some(TestSchema { pool, sink, schema })
}

fn row(id: &str, name: &str, page_number: u32) -> ExtractedRow {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    ExtractedRow {
        id: id.to_string(),
        payload: json!({ "Id": id, "Name": name }),
        ingested_at: start,
        window_start: start,
        window_end: start + chrono::Duration::days(1),
        page_number,
        page_size: 500,
        request_descriptor: json!({ "query": "SELECT * FROM Item" }),
    }
}

async fn stored_name(t: &TestSchema, id: &str) -> Option<(String, i32)> {
    let sql = format!(
        "SELECT payload->>'Name' AS name, page_number FROM {}.qb_items WHERE id = $1",
        t.schema
    );
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&t.pool)
        .await
        .unwrap()
        .map(|r| (r.get("name"), r.get("page_number")))
}

async fn count(t: &TestSchema) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}.qb_items", t.schema))
        .fetch_one(&t.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn second_upsert_of_same_id_overwrites_the_first() {
    let Some(t) = setup().await else { return };

    assert_eq!(t.sink.upsert(&[row("1", "old", 1)]).await.unwrap(), 1);
    assert_eq!(t.sink.upsert(&[row("1", "new", 4)]).await.unwrap(), 1);

    assert_eq!(count(&t).await, 1);
    assert_eq!(stored_name(&t, "1").await, Some(("new".to_string(), 4)));

    t.teardown().await;
}

#[tokio::test]
async fn batches_span_one_call_and_duplicates_keep_last() {
    let Some(t) = setup().await else { return };

    // batch_size is 2: four distinct ids land in two statements
    let rows = vec![
        row("1", "a", 1),
        row("2", "b", 1),
        row("1", "a2", 2),
        row("3", "c", 2),
        row("4", "d", 3),
    ];
    assert_eq!(t.sink.upsert(&rows).await.unwrap(), 5);

    assert_eq!(count(&t).await, 4);
    assert_eq!(stored_name(&t, "1").await, Some(("a2".to_string(), 2)));
    assert_eq!(stored_name(&t, "4").await, Some(("d".to_string(), 3)));

    t.teardown().await;
}

#[tokio::test]
async fn empty_upsert_touches_nothing() {
    let Some(t) = setup().await else { return };

    assert_eq!(t.sink.upsert(&[]).await.unwrap(), 0);
    assert_eq!(count(&t).await, 0);

    t.teardown().await;
}

#[tokio::test]
async fn ensure_table_is_idempotent() {
    let Some(t) = setup().await else { return };

    t.sink.ensure_table().await.unwrap();
    t.sink.health_check().await.unwrap();

    t.teardown().await;
}

#[tokio::test]
async fn failed_batch_rolls_back_the_whole_call() {
    let Some(t) = setup().await else { return };

    t.sink.upsert(&[row("1", "kept", 1)]).await.unwrap();

    // batch_size is 2: the first batch executes, the second cannot bind
    let rows = vec![
        row("1", "overwritten", 2),
        row("2", "b", 2),
        row("3", "too far", u32::MAX),
    ];
    let err = t.sink.upsert(&rows).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(count(&t).await, 1);
    assert_eq!(stored_name(&t, "1").await, Some(("kept".to_string(), 1)));
    assert_eq!(stored_name(&t, "2").await, None);

    t.teardown().await;
}
