use serde::Deserialize;

use crate::shared::ValidationError;

/// Chunking configuration for an extraction run.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of records per chunk. Each chunk is committed in its own transaction.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Number of chunks that may be read ahead of the writer.
    ///
    /// Zero keeps extraction and loading strictly sequential.
    #[serde(default = "default_batch_max_prefetch")]
    pub max_prefetch: usize,
}

impl BatchConfig {
    /// Default maximum chunk size.
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    /// Default read-ahead, which disables pipelining.
    pub const DEFAULT_MAX_PREFETCH: usize = 0;

    /// Largest accepted chunk size. A whole chunk is held in memory and committed at once.
    pub const MAX_MAX_SIZE: usize = 100_000;

    /// Largest accepted read-ahead, in chunks.
    pub const MAX_MAX_PREFETCH: usize = 64;

    /// Validates batch configuration settings.
    ///
    /// Ensures max_size is within `1..=MAX_MAX_SIZE` and max_prefetch does not exceed
    /// `MAX_MAX_PREFETCH`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 || self.max_size > Self::MAX_MAX_SIZE {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size".to_string(),
                constraint: format!("must be between 1 and {}", Self::MAX_MAX_SIZE),
            });
        }

        if self.max_prefetch > Self::MAX_MAX_PREFETCH {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_prefetch".to_string(),
                constraint: format!("must be at most {}", Self::MAX_MAX_PREFETCH),
            });
        }

        Ok(())
    }

    /// Returns `true` when extraction may run ahead of the writer.
    pub fn is_pipelined(&self) -> bool {
        self.max_prefetch > 0
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_prefetch: default_batch_max_prefetch(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_prefetch() -> usize {
    BatchConfig::DEFAULT_MAX_PREFETCH
}
