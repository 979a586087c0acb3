//! Shared configuration types for the extractor.

mod base;
mod batch;
mod connection;
mod pipeline;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use connection::{
    ETL_EXTRACTOR_OPTIONS, IntoConnectOptions, PgConnectionConfig, PgConnectionOptions,
    SqlServerConnectionConfig,
};
pub use pipeline::PipelineConfig;
