use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::failpoints::{RUN_PIPELINE__AFTER_CHUNK_WRITE, RUN_PIPELINE__AFTER_WATERMARK};
use etl::pipeline::{Pipeline, PipelineState};
use etl::source::memory::MemorySource;
use etl::test_utils::failpoints::FailpointScenario;
use etl::test_utils::fixtures::{people_schema, person_record, test_pipeline_config, ts};
use etl_telemetry::init_test_tracing;

fn five_people() -> MemorySource {
    let schema = people_schema();
    let records = (1..=5)
        .map(|id| person_record(&schema, id, &format!("2024-06-0{id} 00:00:00")))
        .collect();

    MemorySource::new(schema, records)
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_after_committed_chunk_resumes_on_next_run() {
    init_test_tracing();
    let source = five_people();
    let destination = MemoryDestination::new("dbo.vw_people");

    // We fail right after the fourth single-row chunk has been committed.
    let scenario = FailpointScenario::setup(&[(
        RUN_PIPELINE__AFTER_CHUNK_WRITE,
        "3*off->return(write)",
    )]);

    let mut pipeline = Pipeline::new(
        test_pipeline_config(1, 0),
        source.clone(),
        destination.clone(),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(destination.row_count().await, 4);
    assert_eq!(source.close_count(), 1);

    scenario.teardown();

    // We restart and expect only the remaining row to be loaded.
    let mut pipeline = Pipeline::new(
        test_pipeline_config(1, 0),
        source.clone(),
        destination.clone(),
    );
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.watermark.value(), ts("2024-06-04 00:00:00"));
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(destination.row_count().await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_after_watermark_writes_nothing() {
    init_test_tracing();
    let source = five_people();
    let destination = MemoryDestination::new("dbo.vw_people");

    let _scenario = FailpointScenario::setup(&[(RUN_PIPELINE__AFTER_WATERMARK, "return")]);

    let mut pipeline = Pipeline::new(
        test_pipeline_config(2, 0),
        source.clone(),
        destination.clone(),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InjectedFault);
    assert_eq!(destination.write_calls().await, 0);
    assert_eq!(source.close_count(), 1);
    assert_eq!(destination.shutdown_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_fault_in_pipelined_mode_stops_consumer() {
    init_test_tracing();
    let source = five_people();
    let destination = MemoryDestination::new("dbo.vw_people");

    let _scenario = FailpointScenario::setup(&[(
        RUN_PIPELINE__AFTER_CHUNK_WRITE,
        "1*off->return(query)",
    )]);

    let mut pipeline = Pipeline::new(
        test_pipeline_config(2, 2),
        source.clone(),
        destination.clone(),
    );
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(destination.row_count().await, 4);
    assert_eq!(pipeline.report().chunks, 2);
}
