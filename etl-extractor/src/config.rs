use etl_config::load_pipeline_config;
use etl_config::shared::PipelineConfig;

use crate::error::{ExtractorError, ExtractorResult};

/// Loads and validates the extractor configuration from the environment.
pub fn load_extractor_config() -> ExtractorResult<PipelineConfig> {
    let config = load_pipeline_config().map_err(ExtractorError::config)?;
    config.validate().map_err(ExtractorError::config)?;

    Ok(config)
}
