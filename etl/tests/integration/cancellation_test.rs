use std::time::Duration;

use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::pipeline::{Pipeline, PipelineState, RunStatus};
use etl::source::memory::MemorySource;
use etl::test_utils::fixtures::{people_schema, person_record, test_pipeline_config};
use etl_telemetry::init_test_tracing;

fn three_people() -> MemorySource {
    let schema = people_schema();
    let records = vec![
        person_record(&schema, 1, "2024-05-01 00:00:00"),
        person_record(&schema, 2, "2024-05-02 00:00:00"),
        person_record(&schema, 3, "2024-05-03 00:00:00"),
    ];

    MemorySource::new(schema, records)
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_write_cancels_run_and_rolls_back_chunk() {
    init_test_tracing();
    let source = three_people();
    let destination =
        MemoryDestination::new("dbo.vw_people").with_write_delay(Duration::from_secs(5));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(10, 0),
        source.clone(),
        destination.clone(),
    );
    let shutdown_tx = pipeline.shutdown_tx();

    // We request shutdown while the only chunk is still being written.
    let (result, _) = tokio::join!(pipeline.run(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.shutdown();
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RunCanceled);
    assert_eq!(RunStatus::from_result(&Err::<(), _>(err)), RunStatus::Failed);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(destination.row_count().await, 0);
    assert_eq!(destination.committed_chunks().await, 0);
    assert_eq!(source.close_count(), 1);
    assert_eq!(destination.shutdown_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_run_cancels_without_writing() {
    init_test_tracing();
    let source = three_people();
    let destination = MemoryDestination::new("dbo.vw_people");

    let mut pipeline = Pipeline::new(
        test_pipeline_config(10, 0),
        source.clone(),
        destination.clone(),
    );
    pipeline.shutdown();
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RunCanceled);
    assert_eq!(destination.write_calls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_exceeding_deadline_fails_and_releases_resources() {
    init_test_tracing();
    let source = three_people();
    let destination =
        MemoryDestination::new("dbo.vw_people").with_write_delay(Duration::from_secs(5));

    let mut config = test_pipeline_config(1, 0);
    config.run_timeout_secs = Some(1);
    let mut pipeline = Pipeline::new(config, source.clone(), destination.clone());

    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RunDeadlineExceeded);
    assert_eq!(RunStatus::from_result(&Err::<(), _>(err)).exit_code(), 1);
    assert_eq!(destination.row_count().await, 0);
    assert_eq!(source.close_count(), 1);
    assert!(!source.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn pipelined_run_can_be_canceled() {
    init_test_tracing();
    let source = three_people();
    let destination =
        MemoryDestination::new("dbo.vw_people").with_write_delay(Duration::from_millis(300));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(1, 2),
        source.clone(),
        destination.clone(),
    );
    let shutdown_tx = pipeline.shutdown_tx();

    // The first chunk commits, the second is still in flight when shutdown arrives.
    let (result, _) = tokio::join!(pipeline.run(), async {
        tokio::time::sleep(Duration::from_millis(450)).await;
        shutdown_tx.shutdown();
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::RunCanceled);
    assert_eq!(destination.row_count().await, 1);
    assert_eq!(pipeline.report().chunks, 1);
}
