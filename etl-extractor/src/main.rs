//! Bronze extractor binary.
//!
//! Runs one incremental extraction of the customer profile view from SQL Server into the
//! Postgres bronze layer and exits. The exit code is `0` when the run succeeded and `1`
//! otherwise, so a scheduler can retry the whole run.

use std::process::ExitCode;

use tracing::{error, info};

use crate::config::load_extractor_config;
use crate::core::start_extractor_with_config;
use crate::error::ExtractorResult;

mod config;
mod core;
mod error;

fn main() -> ExitCode {
    // A missing `.env` file is fine, variables may come from the process environment.
    let dotenv_path = dotenvy::dotenv().ok();

    let _log_flusher = match etl_telemetry::init_tracing(env!("CARGO_BIN_NAME")) {
        Ok(flusher) => flusher,
        Err(err) => {
            eprintln!("failed to initialize tracing: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "loaded environment file");
    }

    match run() {
        Ok(()) => {
            info!("extractor finished successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(class = %err.class(), kind = ?err.kind(), "{err}");
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> ExtractorResult<()> {
    let config = load_extractor_config()?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_extractor_with_config(config))?;

    Ok(())
}
