//! Runs against a local Postgres. Start one with
//! `docker run -e POSTGRES_PASSWORD=postgres -p 5432:5432 postgres:16` and pass `--ignored`.

use chrono::Utc;
use etl::destination::Destination;
use etl::destination::memory::MemoryDestination;
use etl::destination::postgres::PostgresDestination;
use etl::error::ErrorKind;
use etl::pipeline::Pipeline;
use etl::schema::{ColumnSchema, ColumnType, TableName, TableSchema};
use etl::source::memory::MemorySource;
use etl::test_utils::fixtures::{person_record, test_pipeline_config, ts};
use etl::types::{BatchToken, Chunk, Watermark};
use etl_config::shared::{IntoConnectOptions, PgConnectionConfig};
use etl_telemetry::init_test_tracing;
use secrecy::SecretString;
use sqlx::PgPool;

fn local_pg_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: "localhost".to_string(),
        port: 5432,
        name: "postgres".to_string(),
        username: "postgres".to_string(),
        password: Some(SecretString::new("postgres".to_string())),
    }
}

/// Returns a schema writing to a table no other test run uses.
fn unique_people_schema() -> TableSchema {
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();

    TableSchema::new(
        TableName::new("dbo", "vw_people"),
        TableName::new(format!("bronze_test_{suffix}"), "people"),
        vec![
            ColumnSchema::new("id", ColumnType::BigInt, false),
            ColumnSchema::new("name", ColumnType::Text, true),
            ColumnSchema::new("modified", ColumnType::Timestamp, false),
        ],
        "id",
        "modified",
    )
    .unwrap()
}

async fn count_rows(pool: &PgPool, schema: &TableSchema) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}",
        schema.target().as_quoted_identifier()
    ))
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn drop_schema(pool: &PgPool, schema: &TableSchema) {
    sqlx::query(&format!(
        "DROP SCHEMA IF EXISTS \"{}\" CASCADE",
        schema.target().schema
    ))
    .execute(pool)
    .await
    .unwrap();
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn missing_table_is_reported_as_such() {
    init_test_tracing();
    let schema = unique_people_schema();
    let mut destination = PostgresDestination::new(local_pg_config(), schema, "dbo.vw_people", false);
    destination.connect().await.unwrap();

    let err = destination.max_modified_ts().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);
    destination.shutdown().await.unwrap();
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn chunk_writes_are_idempotent() {
    init_test_tracing();
    let schema = unique_people_schema();
    let pool = PgPool::connect_with(local_pg_config().with_db()).await.unwrap();

    let mut destination =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", true);
    destination.connect().await.unwrap();
    assert_eq!(destination.max_modified_ts().await.unwrap(), None);

    let records = vec![
        person_record(&schema, 1, "2024-01-10 00:00:00"),
        person_record(&schema, 2, "2024-01-10 00:00:00"),
        person_record(&schema, 3, "2024-01-20 00:00:00"),
    ];
    let chunk = Chunk::new(1, BatchToken::from(20240120000000), records);

    let first = destination.write_chunk(&chunk).await.unwrap();
    let second = destination.write_chunk(&chunk).await.unwrap();

    assert_eq!((first.inserted, first.skipped), (3, 0));
    assert_eq!((second.inserted, second.skipped), (0, 3));
    assert_eq!(count_rows(&pool, &schema).await, 3);
    assert_eq!(
        destination.max_modified_ts().await.unwrap(),
        Some(ts("2024-01-20 00:00:00"))
    );

    let (source_file, batch_id): (String, i64) = sqlx::query_as(&format!(
        "SELECT _bronze_source_file, _bronze_batch_id FROM {} LIMIT 1",
        schema.target().as_quoted_identifier()
    ))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(source_file, "dbo.vw_people");
    assert_eq!(batch_id, 20240120000000);

    destination.shutdown().await.unwrap();
    drop_schema(&pool, &schema).await;
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn pipeline_runs_incrementally_against_postgres() {
    init_test_tracing();
    let schema = unique_people_schema();
    let pool = PgPool::connect_with(local_pg_config().with_db()).await.unwrap();

    let mut source = MemorySource::new(
        schema.clone(),
        vec![
            person_record(&schema, 1, "2024-01-10 00:00:00"),
            person_record(&schema, 2, "2024-01-10 00:00:00"),
            person_record(&schema, 3, "2024-01-20 00:00:00"),
        ],
    );
    let destination =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", true);

    let mut pipeline = Pipeline::new(test_pipeline_config(2, 0), source.clone(), destination);
    let report = pipeline.run().await.unwrap();

    assert!(report.watermark.is_sentinel());
    assert_eq!(report.chunks, 2);
    assert_eq!(report.inserted, 3);

    // We add one newer row and run again, only that row must be loaded.
    source.set_records(vec![
        person_record(&schema, 1, "2024-01-10 00:00:00"),
        person_record(&schema, 2, "2024-01-10 00:00:00"),
        person_record(&schema, 3, "2024-01-20 00:00:00"),
        person_record(&schema, 4, "2024-01-21 00:00:00"),
    ]);
    let destination =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", false);
    let mut pipeline = Pipeline::new(test_pipeline_config(2, 0), source, destination);
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.watermark.value(), ts("2024-01-20 00:00:00"));
    assert_eq!(report.inserted, 1);
    assert_eq!(count_rows(&pool, &schema).await, 4);

    drop_schema(&pool, &schema).await;
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn memory_and_postgres_destinations_agree() {
    init_test_tracing();
    let schema = unique_people_schema();
    let pool = PgPool::connect_with(local_pg_config().with_db()).await.unwrap();

    let records = vec![
        person_record(&schema, 1, "2024-03-01 00:00:00"),
        person_record(&schema, 1, "2024-03-01 00:00:00"),
        person_record(&schema, 2, "2024-03-02 00:00:00"),
    ];
    let chunk = Chunk::new(1, BatchToken::from(20240302000000), records);

    let mut memory = MemoryDestination::new("dbo.vw_people");
    memory.connect().await.unwrap();
    let mut postgres =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", true);
    postgres.connect().await.unwrap();

    let expected = memory.write_chunk(&chunk).await.unwrap();
    let actual = postgres.write_chunk(&chunk).await.unwrap();

    assert_eq!(actual, expected);
    assert_eq!(
        postgres.max_modified_ts().await.unwrap(),
        memory.max_modified_ts().await.unwrap()
    );

    postgres.shutdown().await.unwrap();
    drop_schema(&pool, &schema).await;
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn sub_microsecond_timestamps_are_counted_and_resolved_exactly() {
    init_test_tracing();
    let schema = unique_people_schema();
    let pool = PgPool::connect_with(local_pg_config().with_db()).await.unwrap();

    // A `datetime` value of .003 decodes to 1/300 s, below Postgres precision.
    let records = vec![person_record(&schema, 1, "2024-01-10 10:00:00.0033333")];
    let chunk = Chunk::new(1, BatchToken::from(20240110100000), records);

    let mut memory = MemoryDestination::new("dbo.vw_people");
    memory.connect().await.unwrap();
    let mut postgres =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", true);
    postgres.connect().await.unwrap();

    let expected = memory.write_chunk(&chunk).await.unwrap();
    let actual = postgres.write_chunk(&chunk).await.unwrap();

    assert_eq!((actual.inserted, actual.skipped), (1, 0));
    assert_eq!(actual, expected);

    let watermark = Watermark::from(postgres.max_modified_ts().await.unwrap());
    assert_eq!(watermark.value(), ts("2024-01-10 10:00:00.003333"));
    assert_eq!(watermark.value(), chunk.records()[0].modified_ts());
    assert!(!watermark.admits(chunk.records()[0].modified_ts()));
    postgres.shutdown().await.unwrap();

    // The next run resolves the same watermark and extracts nothing.
    let source = MemorySource::new(schema.clone(), chunk.records().to_vec());
    let destination =
        PostgresDestination::new(local_pg_config(), schema.clone(), "dbo.vw_people", false);
    let mut pipeline = Pipeline::new(test_pipeline_config(10, 0), source, destination);
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.watermark, watermark);
    assert_eq!(report.rows(), 0);
    assert_eq!(count_rows(&pool, &schema).await, 1);

    drop_schema(&pool, &schema).await;
}
