//! Generates dbt reference seeds from enumeration definitions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use etl_seeds::{DEFAULT_SKIP_FILES, DEFAULT_STRIP_PREFIX, SeedOptions, generate_seeds};
use tracing::{error, info};

/// Converts enumeration YAML files into CSV seeds.
#[derive(Parser, Debug)]
#[command(name = "generate_seeds")]
#[command(about = "Converts enumeration YAML files into dbt seed CSVs")]
struct Args {
    /// Directory holding the `*.yaml` enumeration files
    #[arg(long, default_value = "enumerations")]
    input_dir: PathBuf,

    /// Directory receiving the generated CSV files, created if missing
    #[arg(long, default_value = "dbt/seeds/reference")]
    output_dir: PathBuf,

    /// File name to skip; replaces the default list when given
    #[arg(long = "skip")]
    skip: Vec<String>,

    /// Text removed from enumeration names to form the CSV file name
    #[arg(long, default_value = DEFAULT_STRIP_PREFIX)]
    strip_prefix: String,
}

impl Args {
    fn into_options(self) -> SeedOptions {
        let skip_files = if self.skip.is_empty() {
            DEFAULT_SKIP_FILES.iter().map(|name| name.to_string()).collect()
        } else {
            self.skip
        };

        SeedOptions {
            input_dir: self.input_dir,
            output_dir: self.output_dir,
            skip_files,
            strip_prefix: self.strip_prefix,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _log_flusher = match etl_telemetry::init_tracing(env!("CARGO_BIN_NAME")) {
        Ok(flusher) => flusher,
        Err(err) => {
            eprintln!("failed to initialize tracing: {err}");
            return ExitCode::FAILURE;
        }
    };

    let options = args.into_options();
    match generate_seeds(&options) {
        Ok(summary) if summary.failed.is_empty() => {
            info!(
                generated = summary.generated.len(),
                output_dir = %options.output_dir.display(),
                "seed generation completed"
            );
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            error!(
                generated = summary.generated.len(),
                failed = summary.failed.len(),
                "seed generation completed with failures"
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = %err, "seed generation failed");
            ExitCode::FAILURE
        }
    }
}
