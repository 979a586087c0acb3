use std::time::Duration;

use crate::shared::{BatchConfig, PgConnectionConfig, SqlServerConnectionConfig, ValidationError};

/// Configuration for one extraction run.
///
/// Built once at startup and passed by reference to every component. This intentionally does
/// not implement `Serialize` to avoid accidentally leaking passwords into serialized forms.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Connection to the SQL Server holding the source view.
    pub source: SqlServerConnectionConfig,
    /// Connection to the Postgres warehouse holding the bronze table.
    pub destination: PgConnectionConfig,
    /// Chunking configuration.
    pub batch: BatchConfig,
    /// Overall run deadline in seconds. `None` lets the run take as long as it needs.
    pub run_timeout_secs: Option<u64>,
    /// Creates the bronze schema and table when they do not exist yet.
    pub provision_destination: bool,
}

impl PipelineConfig {
    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.destination.validate()?;
        self.batch.validate()?;

        if self.run_timeout_secs == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "run.timeout_secs".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the overall run deadline, if any.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}
