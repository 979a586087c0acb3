use etl::error::{ErrorClass, ErrorKind, EtlError};
use std::error::Error;
use std::fmt::Write as _;

/// Result type for extractor operations.
pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// Error type for the extractor process.
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// The extraction run failed.
    #[error(transparent)]
    Run(#[from] EtlError),
    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>),
    /// The async runtime could not be started.
    #[error("failed to start the runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ExtractorError {
    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ExtractorError::Config(Box::new(err))
    }

    /// Returns the kind of the failure, mapping process-level errors onto run kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractorError::Run(err) => err.kind(),
            ExtractorError::Config(_) => ErrorKind::ConfigError,
            ExtractorError::Runtime(_) => ErrorKind::IoError,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// Returns `true` when running again without changes can succeed.
    ///
    /// Committed chunks are never extracted twice, so a rerun resumes where this one stopped.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::ConfigError
            | ErrorKind::AuthenticationError
            | ErrorKind::DestinationTableMissing
            | ErrorKind::InvalidState => false,
            _ => true,
        }
    }

    /// Returns a report for terminal output.
    ///
    /// Aggregated run errors list every failure. Single errors list their cause chain.
    pub fn render_report(&self) -> String {
        let mut out = format!(
            "bronze extraction failed ({}, {:?})\n",
            self.class(),
            self.kind()
        );
        let _ = writeln!(out, "error: {self}");

        match self {
            ExtractorError::Run(err) if err.errors().is_some() => {
                for (idx, err) in err.errors().unwrap_or_default().iter().enumerate() {
                    let _ = writeln!(out, "failure {}: [{}] {err}", idx + 1, err.class());
                }
            }
            _ => {
                let mut source = self.source();
                let mut idx = 1usize;
                while let Some(err) = source {
                    let _ = writeln!(out, "cause {idx}: {err}");
                    source = err.source();
                    idx += 1;
                }
            }
        }

        let hint = if self.is_retryable() {
            "rerun to resume after the last committed chunk"
        } else {
            "fix the cause before running again"
        };
        let _ = writeln!(out, "next: {hint}");

        out
    }
}
