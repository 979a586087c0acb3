//! Configuration for the bronze extractor.
//!
//! Configuration is read once from environment variables into an immutable
//! [`shared::PipelineConfig`] value which is then passed by reference to every component.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_pipeline_config, load_pipeline_config_from};
