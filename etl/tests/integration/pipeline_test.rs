use etl::destination::Destination;
use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::pipeline::{Pipeline, PipelineState, RunStatus};
use etl::schema::{TableSchema, customer_profile};
use etl::source::memory::MemorySource;
use etl::test_utils::fixtures::{
    customer_record, people_schema, person_record, test_pipeline_config, ts,
};
use etl::types::{BatchToken, Chunk, Identifier, RecordKey, SourceRecord, Watermark};
use etl::watermark::WatermarkResolver;
use etl_telemetry::init_test_tracing;

const SOURCE_FILE: &str = "dbo.vw_people";

fn people(schema: &TableSchema, rows: &[(i64, &str)]) -> Vec<SourceRecord> {
    rows.iter()
        .map(|(id, modified)| person_record(schema, *id, modified))
        .collect()
}

fn create_pipeline(
    source: &MemorySource,
    destination: &MemoryDestination,
    max_size: usize,
) -> Pipeline<MemorySource, MemoryDestination> {
    Pipeline::new(
        test_pipeline_config(max_size, 0),
        source.clone(),
        destination.clone(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn worked_example_loads_two_chunks_and_rerun_is_empty() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(
        schema.clone(),
        people(
            &schema,
            &[
                (3, "2024-01-20 00:00:00"),
                (2, "2024-01-10 00:00:00"),
                (1, "2024-01-10 00:00:00"),
            ],
        ),
    );
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 2);
    let report = pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Complete);
    assert!(report.watermark.is_sentinel());
    assert_eq!(report.chunks, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.next_watermark().value(), ts("2024-01-20 00:00:00"));

    // We check that rows landed in (modified_ts, identifier) order.
    assert_eq!(
        destination.keys().await,
        vec![
            RecordKey::new(ts("2024-01-10 00:00:00"), 1),
            RecordKey::new(ts("2024-01-10 00:00:00"), 2),
            RecordKey::new(ts("2024-01-20 00:00:00"), 3),
        ]
    );
    assert_eq!(destination.committed_chunks().await, 2);

    // We run again, nothing is newer than the watermark.
    let mut pipeline = create_pipeline(&source, &destination, 2);
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.watermark.value(), ts("2024-01-20 00:00:00"));
    assert_eq!(report.chunks, 0);
    assert_eq!(report.rows(), 0);
    assert_eq!(destination.row_count().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_are_stamped_with_lineage_metadata() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema.clone(), people(&schema, &[(1, "2024-01-01 00:00:00")]));
    let destination = MemoryDestination::new(SOURCE_FILE);

    let token = BatchToken::from(20240102030405);
    let mut pipeline = create_pipeline(&source, &destination, 10).with_batch_token(token);
    pipeline.run().await.unwrap();

    let rows = destination.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].batch_token, token);
    assert_eq!(rows[0].source_file, SOURCE_FILE);
}

#[tokio::test(flavor = "multi_thread")]
async fn writing_the_same_chunk_twice_skips_every_row() {
    init_test_tracing();
    let schema = customer_profile().unwrap();
    let records = vec![
        customer_record(&schema, "C001", "2024-02-01 08:00:00"),
        customer_record(&schema, "C002", "2024-02-01 08:00:00"),
        customer_record(&schema, "C003", "2024-02-01 09:00:00"),
    ];
    let mut destination = MemoryDestination::new("dbo.vw_customer_profile_standardized");
    destination.connect().await.unwrap();

    let chunk = Chunk::new(1, BatchToken::from(20240201090000), records);
    let first = destination.write_chunk(&chunk).await.unwrap();
    let rows_after_first = destination.rows().await;
    let second = destination.write_chunk(&chunk).await.unwrap();

    assert_eq!(first.inserted, 3);
    assert_eq!(first.skipped, 0);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(destination.rows().await, rows_after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_keys_within_a_chunk_are_skipped() {
    init_test_tracing();
    let schema = people_schema();
    let record = person_record(&schema, 7, "2024-03-01 00:00:00");
    let mut destination = MemoryDestination::new(SOURCE_FILE);
    destination.connect().await.unwrap();

    let chunk = Chunk::new(
        1,
        BatchToken::from(20240301000000),
        vec![record.clone(), record],
    );
    let summary = destination.write_chunk(&chunk).await.unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(destination.row_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn watermark_follows_committed_rows_across_runs() {
    init_test_tracing();
    let schema = people_schema();
    let mut all_rows = vec![(1, "2024-01-01 00:00:00"), (2, "2024-01-02 00:00:00")];
    let mut source = MemorySource::new(schema.clone(), people(&schema, &all_rows));
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut watermarks = vec![];
    for new_rows in [
        vec![],
        vec![(3, "2024-01-05 00:00:00")],
        vec![],
        vec![(4, "2024-01-04 00:00:00"), (5, "2024-01-09 00:00:00")],
    ] {
        all_rows.extend(new_rows);
        let mut ordered = all_rows.clone();
        ordered.sort_by_key(|(id, modified)| (*modified, *id));
        source.set_records(people(&schema, &ordered));

        let mut pipeline = create_pipeline(&source, &destination, 2);
        let report = pipeline.run().await.unwrap();
        watermarks.push(report.next_watermark());

        let resolved = WatermarkResolver::new(&destination).resolve().await.unwrap();
        let max_committed = destination
            .keys()
            .await
            .into_iter()
            .map(|key| key.modified_ts)
            .max();
        assert_eq!(resolved, Watermark::from(max_committed));
        assert_eq!(resolved, report.next_watermark());
    }

    assert!(watermarks.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(
        watermarks.last().unwrap().value(),
        ts("2024-01-09 00:00:00")
    );
    // Row 4 was modified before the previous watermark, so it is never extracted.
    assert!(
        !destination
            .keys()
            .await
            .iter()
            .any(|key| key.identifier == Identifier::Int(4))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unsorted_source_fails_before_writing_the_offending_chunk() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(
        schema.clone(),
        people(
            &schema,
            &[
                (1, "2024-01-01 00:00:00"),
                (2, "2024-01-02 00:00:00"),
                (3, "2024-01-03 00:00:00"),
                (4, "2024-01-01 12:00:00"),
            ],
        ),
    )
    .with_unsorted_output();
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 2);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(destination.row_count().await, 2);
    assert_eq!(pipeline.report().chunks, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unprovisioned_destination_is_a_cold_start() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema.clone(), people(&schema, &[(1, "1999-12-31 23:59:59")]));
    let destination = MemoryDestination::unprovisioned(SOURCE_FILE).with_provisioning();

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let report = pipeline.run().await.unwrap();

    assert!(report.watermark.is_sentinel());
    assert_eq!(report.inserted, 1);
    assert!(destination.is_provisioned().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_source_against_missing_table_succeeds() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema, vec![]);
    let destination = MemoryDestination::unprovisioned(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let report = pipeline.run().await.unwrap();

    assert!(report.watermark.is_sentinel());
    assert_eq!(report.chunks, 0);
    assert_eq!(destination.write_calls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_leaves_committed_prefix_and_next_run_resumes() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-01 00:00:00"),
            (2, "2024-01-02 00:00:00"),
            (3, "2024-01-03 00:00:00"),
            (4, "2024-01-04 00:00:00"),
            (5, "2024-01-05 00:00:00"),
            (6, "2024-01-06 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema.clone(), records);
    let destination = MemoryDestination::new(SOURCE_FILE).with_write_failure_at(2);

    // We fail the second of three chunks.
    let mut pipeline = create_pipeline(&source, &destination, 2);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert_eq!(RunStatus::from_result(&Err::<(), _>(err)).exit_code(), 1);
    assert_eq!(destination.row_count().await, 2);
    assert_eq!(
        pipeline.report().next_watermark().value(),
        ts("2024-01-02 00:00:00")
    );

    // We rerun without faults and expect only the missing rows to be extracted.
    destination.clear_faults().await;
    let mut pipeline = create_pipeline(&source, &destination, 2);
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.watermark.value(), ts("2024-01-02 00:00:00"));
    assert_eq!(report.inserted, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(destination.row_count().await, 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_chunk_starting_at_the_committed_timestamp_is_flagged() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-10 00:00:00"),
            (2, "2024-01-10 00:00:00"),
            (3, "2024-01-10 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema.clone(), records);
    let destination = MemoryDestination::new(SOURCE_FILE).with_write_failure_at(2);

    let mut pipeline = create_pipeline(&source, &destination, 2);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    let report = pipeline.report();
    assert_eq!(report.next_watermark().value(), ts("2024-01-10 00:00:00"));
    assert_eq!(report.tie_split_ts, Some(ts("2024-01-10 00:00:00")));

    // Row 3 sits at the new watermark, which is exclusive, so the next run never sees it.
    destination.clear_faults().await;
    let mut pipeline = create_pipeline(&source, &destination, 2);
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.rows(), 0);
    assert_eq!(report.tie_split_ts, None);
    assert_eq!(
        destination.keys().await,
        vec![
            RecordKey::new(ts("2024-01-10 00:00:00"), 1),
            RecordKey::new(ts("2024-01-10 00:00:00"), 2),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_chunk_after_a_timestamp_boundary_is_not_flagged() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-10 00:00:00"),
            (2, "2024-01-10 00:00:00"),
            (3, "2024-01-11 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema.clone(), records);
    let destination = MemoryDestination::new(SOURCE_FILE).with_write_failure_at(2);

    let mut pipeline = create_pipeline(&source, &destination, 2);
    pipeline.run().await.unwrap_err();

    assert_eq!(pipeline.report().tie_split_ts, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_limit_failure_rolls_back_the_whole_chunk() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-01 00:00:00"),
            (2, "2024-01-02 00:00:00"),
            (3, "2024-01-03 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema.clone(), records);
    let destination = MemoryDestination::new(SOURCE_FILE).with_write_failure_after_rows(1);

    let mut pipeline = create_pipeline(&source, &destination, 3);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert_eq!(destination.row_count().await, 0);
    assert_eq!(pipeline.report().chunks, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_failure_discards_partial_chunk() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-01 00:00:00"),
            (2, "2024-01-02 00:00:00"),
            (3, "2024-01-03 00:00:00"),
            (4, "2024-01-04 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema, records).with_failure_after(3);
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 2);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(destination.row_count().await, 2);
    assert_eq!(source.close_count(), 1);
    assert_eq!(destination.shutdown_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipelined_run_commits_in_read_order() {
    init_test_tracing();
    let schema = people_schema();
    let rows: Vec<(i64, String)> = (1..=7)
        .map(|id| (id, format!("2024-01-0{id} 00:00:00")))
        .collect();
    let records = rows
        .iter()
        .map(|(id, modified)| person_record(&schema, *id, modified))
        .collect();
    let source = MemorySource::new(schema.clone(), records);
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = Pipeline::new(
        test_pipeline_config(2, 2),
        source.clone(),
        destination.clone(),
    );
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.chunks, 4);
    assert_eq!(report.inserted, 7);
    let ids: Vec<Identifier> = destination
        .keys()
        .await
        .into_iter()
        .map(|key| key.identifier)
        .collect();
    assert_eq!(ids, (1..=7).map(Identifier::Int).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn pipelined_run_reports_source_error_after_earlier_chunks() {
    init_test_tracing();
    let schema = people_schema();
    let records = people(
        &schema,
        &[
            (1, "2024-01-01 00:00:00"),
            (2, "2024-01-02 00:00:00"),
            (3, "2024-01-03 00:00:00"),
            (4, "2024-01-04 00:00:00"),
            (5, "2024-01-05 00:00:00"),
        ],
    );
    let source = MemorySource::new(schema, records).with_failure_after(4);
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = Pipeline::new(
        test_pipeline_config(2, 3),
        source.clone(),
        destination.clone(),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(destination.row_count().await, 4);
    assert_eq!(pipeline.report().chunks, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn resources_are_released_when_destination_connect_fails() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema.clone(), people(&schema, &[(1, "2024-01-01 00:00:00")]));
    let destination = MemoryDestination::new(SOURCE_FILE).with_connect_failure();

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let result = pipeline.run().await;

    assert_eq!(RunStatus::from_result(&result), RunStatus::Failed);
    assert_eq!(
        result.unwrap_err().kind(),
        ErrorKind::DestinationConnectionFailed
    );
    assert_eq!(source.connect_count(), 1);
    assert_eq!(source.close_count(), 1);
    assert!(!source.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn source_connect_failure_fails_run() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema, vec![]).with_connect_failure();
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert_eq!(destination.connect_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn watermark_query_failure_is_fatal() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema.clone(), people(&schema, &[(1, "2024-01-01 00:00:00")]));
    let destination = MemoryDestination::new(SOURCE_FILE).with_watermark_failure();

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
    assert_eq!(destination.row_count().await, 0);
    assert_eq!(source.close_count(), 1);
    assert_eq!(destination.shutdown_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_run_releases_resources() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema.clone(), people(&schema, &[(1, "2024-01-01 00:00:00")]));
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 10);
    let result = pipeline.run().await;

    assert_eq!(RunStatus::from_result(&result).exit_code(), 0);
    assert_eq!(source.close_count(), 1);
    assert!(!destination.is_connected().await);
    assert_eq!(destination.shutdown_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_runs_only_once() {
    init_test_tracing();
    let schema = people_schema();
    let source = MemorySource::new(schema, vec![]);
    let destination = MemoryDestination::new(SOURCE_FILE);

    let mut pipeline = create_pipeline(&source, &destination, 10);
    pipeline.run().await.unwrap();
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(source.connect_count(), 1);
}
