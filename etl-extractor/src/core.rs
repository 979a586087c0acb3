use etl::concurrency::shutdown::ShutdownTx;
use etl::destination::postgres::PostgresDestination;
use etl::pipeline::{Pipeline, RunReport};
use etl::schema::customer_profile;
use etl::source::sql_server::SqlServerSource;
use etl_config::shared::{
    BatchConfig, PgConnectionConfig, PipelineConfig, SqlServerConnectionConfig,
};
use tracing::{debug, info, warn};

use crate::error::ExtractorResult;

/// Runs one extraction of the customer profile view with the provided configuration.
///
/// Shutdown signals received while the run is in progress cancel it. Chunks committed before
/// the signal stay in place and the next run resumes after them.
pub async fn start_extractor_with_config(config: PipelineConfig) -> ExtractorResult<RunReport> {
    info!("starting bronze extractor");

    log_config(&config);

    let schema = customer_profile()?;
    let source_file = schema.source().to_string();
    let source = SqlServerSource::new(config.source.clone(), schema.clone());
    let destination = PostgresDestination::new(
        config.destination.clone(),
        schema,
        source_file,
        config.provision_destination,
    );

    let mut pipeline = Pipeline::new(config, source, destination);

    let shutdown_handle = tokio::spawn(listen_for_shutdown(pipeline.shutdown_tx()));
    let result = pipeline.run().await;

    // The run is over, the listener has nothing left to cancel.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let report = result?;
    info!(
        rows = report.rows(),
        next_watermark = %report.next_watermark(),
        "bronze extractor completed"
    );

    Ok(report)
}

/// Waits for SIGINT or SIGTERM and requests shutdown of the run.
async fn listen_for_shutdown(shutdown_tx: ShutdownTx) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("sigint (ctrl+c) received, canceling extraction run");
                    }
                    _ = sigterm.recv() => {
                        info!("sigterm received, canceling extraction run");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register sigterm handler, listening for ctrl+c only");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("sigint (ctrl+c) received, canceling extraction run");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("sigint (ctrl+c) received, canceling extraction run");
    }

    shutdown_tx.shutdown();
}

fn log_config(config: &PipelineConfig) {
    log_source_config(&config.source);
    log_destination_config(&config.destination, config.provision_destination);
    log_batch_config(&config.batch);
    debug!(run_timeout_secs = ?config.run_timeout_secs, "run config");
}

fn log_source_config(config: &SqlServerConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        encrypt = config.encrypt,
        trust_server_certificate = config.trust_server_certificate,
        "source sql server connection config",
    );
}

fn log_destination_config(config: &PgConnectionConfig, provision: bool) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        provision,
        "destination postgres connection config",
    );
}

fn log_batch_config(config: &BatchConfig) {
    debug!(
        max_size = config.max_size,
        max_prefetch = config.max_prefetch,
        "batch config"
    );
}
