use config::Map;
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::shared::{BatchConfig, PgConnectionConfig, PipelineConfig, SqlServerConnectionConfig};

/// Prefix of the variables describing the SQL Server source (`SOURCE_HOST`, ...).
const SOURCE_ENV_PREFIX: &str = "SOURCE";

/// Prefix of the variables describing the Postgres destination (`DEST_HOST`, ...).
const DESTINATION_ENV_PREFIX: &str = "DEST";

/// Prefix of the chunking variables (`BATCH_SIZE`, `BATCH_PREFETCH`).
const BATCH_ENV_PREFIX: &str = "BATCH";

/// Prefix of the run-level variables (`RUN_TIMEOUT_SECS`).
const RUN_ENV_PREFIX: &str = "RUN";

/// Separator between a prefix and the key.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Errors that can occur while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The variables of one section could not be collected.
    #[error("failed to load `{prefix}_*` environment variables: {source}")]
    EnvironmentVariables {
        prefix: &'static str,
        #[source]
        source: config::ConfigError,
    },

    /// The variables of one section were collected but could not be deserialized.
    #[error("invalid `{prefix}_*` environment variables: {source}")]
    Deserialization {
        prefix: &'static str,
        #[source]
        source: config::ConfigError,
    },
}

#[derive(Debug, Deserialize)]
struct SourceVariables {
    host: String,
    #[serde(default = "default_source_port")]
    port: u16,
    #[serde(default = "default_source_db")]
    db: String,
    #[serde(default = "default_source_user")]
    user: String,
    #[serde(default)]
    password: Option<SecretString>,
    #[serde(default)]
    encrypt: bool,
    #[serde(default = "default_trust_cert")]
    trust_cert: bool,
}

#[derive(Debug, Deserialize)]
struct DestinationVariables {
    #[serde(default = "default_destination_host")]
    host: String,
    #[serde(default = "default_destination_port")]
    port: u16,
    #[serde(default = "default_destination_db")]
    db: String,
    #[serde(default = "default_destination_user")]
    user: String,
    #[serde(default)]
    password: Option<SecretString>,
    #[serde(default)]
    provision: bool,
}

#[derive(Debug, Deserialize)]
struct BatchVariables {
    #[serde(default = "default_batch_size")]
    size: usize,
    #[serde(default = "default_batch_prefetch")]
    prefetch: usize,
}

#[derive(Debug, Deserialize)]
struct RunVariables {
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Loads the [`PipelineConfig`] from the process environment.
///
/// Each section is read from its own prefix: `SOURCE_*`, `DEST_*`, `BATCH_*` and `RUN_*`.
/// Empty variables are treated as unset so that defaults apply. Only `SOURCE_HOST` is
/// mandatory.
pub fn load_pipeline_config() -> Result<PipelineConfig, LoadConfigError> {
    build_pipeline_config(None)
}

/// Same as [`load_pipeline_config`] but reads from `vars` instead of the process environment.
pub fn load_pipeline_config_from(
    vars: Map<String, String>,
) -> Result<PipelineConfig, LoadConfigError> {
    build_pipeline_config(Some(vars))
}

fn build_pipeline_config(
    vars: Option<Map<String, String>>,
) -> Result<PipelineConfig, LoadConfigError> {
    let source: SourceVariables = load_section(SOURCE_ENV_PREFIX, vars.as_ref())?;
    let destination: DestinationVariables = load_section(DESTINATION_ENV_PREFIX, vars.as_ref())?;
    let batch: BatchVariables = load_section(BATCH_ENV_PREFIX, vars.as_ref())?;
    let run: RunVariables = load_section(RUN_ENV_PREFIX, vars.as_ref())?;

    Ok(PipelineConfig {
        source: SqlServerConnectionConfig {
            host: source.host,
            port: source.port,
            name: source.db,
            username: source.user,
            password: source.password,
            encrypt: source.encrypt,
            trust_server_certificate: source.trust_cert,
        },
        destination: PgConnectionConfig {
            host: destination.host,
            port: destination.port,
            name: destination.db,
            username: destination.user,
            password: destination.password,
        },
        batch: BatchConfig {
            max_size: batch.size,
            max_prefetch: batch.prefetch,
        },
        run_timeout_secs: run.timeout_secs,
        provision_destination: destination.provision,
    })
}

fn load_section<T>(prefix: &'static str, vars: Option<&Map<String, String>>) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let environment_source = config::Environment::with_prefix(prefix)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .ignore_empty(true)
        .source(vars.cloned());

    let settings = config::Config::builder()
        .add_source(environment_source)
        .build()
        .map_err(|source| LoadConfigError::EnvironmentVariables { prefix, source })?;

    settings
        .try_deserialize::<T>()
        .map_err(|source| LoadConfigError::Deserialization { prefix, source })
}

fn default_source_port() -> u16 {
    SqlServerConnectionConfig::DEFAULT_PORT
}

fn default_source_db() -> String {
    SqlServerConnectionConfig::DEFAULT_NAME.to_string()
}

fn default_source_user() -> String {
    SqlServerConnectionConfig::DEFAULT_USERNAME.to_string()
}

fn default_trust_cert() -> bool {
    true
}

fn default_destination_host() -> String {
    PgConnectionConfig::DEFAULT_HOST.to_string()
}

fn default_destination_port() -> u16 {
    PgConnectionConfig::DEFAULT_PORT
}

fn default_destination_db() -> String {
    PgConnectionConfig::DEFAULT_NAME.to_string()
}

fn default_destination_user() -> String {
    PgConnectionConfig::DEFAULT_USERNAME.to_string()
}

fn default_batch_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_prefetch() -> usize {
    BatchConfig::DEFAULT_MAX_PREFETCH
}
