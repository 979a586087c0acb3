use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgConnectOptions as SqlxConnectOptions, PgSslMode as SqlxSslMode};
use std::sync::LazyLock;
use tiberius::{AuthMethod, Config as TiberiusConfig, EncryptionLevel};

use crate::shared::ValidationError;

const COMMON_DATESTYLE: &str = "ISO";
const COMMON_CLIENT_ENCODING: &str = "UTF8";
const COMMON_TIMEZONE: &str = "UTC";

const APP_NAME_EXTRACTOR: &str = "etl_bronze_extractor";

/// Session settings applied to every destination connection opened by the extractor.
///
/// Statement and idle-in-transaction timeouts bound a single chunk write so that a stuck
/// transaction cannot hold the destination table indefinitely.
pub static ETL_EXTRACTOR_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        datestyle: COMMON_DATESTYLE.to_string(),
        client_encoding: COMMON_CLIENT_ENCODING.to_string(),
        timezone: COMMON_TIMEZONE.to_string(),
        statement_timeout: 300_000,
        lock_timeout: 30_000,
        idle_in_transaction_session_timeout: 60_000,
        application_name: APP_NAME_EXTRACTOR.to_string(),
    });

#[derive(Debug, Clone)]
pub struct PgConnectionOptions {
    pub datestyle: String,
    pub client_encoding: String,
    pub timezone: String,
    pub statement_timeout: u32,
    pub lock_timeout: u32,
    pub idle_in_transaction_session_timeout: u32,
    pub application_name: String,
}

impl PgConnectionOptions {
    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), self.datestyle.clone()),
            ("client_encoding".to_string(), self.client_encoding.clone()),
            ("timezone".to_string(), self.timezone.clone()),
            (
                "statement_timeout".to_string(),
                self.statement_timeout.to_string(),
            ),
            ("lock_timeout".to_string(), self.lock_timeout.to_string()),
            (
                "idle_in_transaction_session_timeout".to_string(),
                self.idle_in_transaction_session_timeout.to_string(),
            ),
            (
                "application_name".to_string(),
                self.application_name.clone(),
            ),
        ]
    }
}

/// Connection settings for the Postgres warehouse that receives bronze rows.
#[derive(Debug, Clone)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
}

impl PgConnectionConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 5432;
    pub const DEFAULT_NAME: &'static str = "dw1";
    pub const DEFAULT_USERNAME: &'static str = "dw_etl_service";

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_not_empty("destination.host", &self.host)?;
        validate_not_empty("destination.name", &self.name)?;
        validate_not_empty("destination.username", &self.username)
    }
}

/// Connection settings for the SQL Server instance exposing the source view.
#[derive(Debug, Clone)]
pub struct SqlServerConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    /// Requests an encrypted channel for the whole session.
    pub encrypt: bool,
    /// Accepts the server certificate without validating its chain.
    pub trust_server_certificate: bool,
}

impl SqlServerConnectionConfig {
    pub const DEFAULT_PORT: u16 = 1433;
    pub const DEFAULT_NAME: &'static str = "operational_db";
    pub const DEFAULT_USERNAME: &'static str = "readonly_user";

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_not_empty("source.host", &self.host)?;
        validate_not_empty("source.name", &self.name)?;
        validate_not_empty("source.username", &self.username)
    }
}

fn validate_not_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }

    Ok(())
}

/// Converts a connection configuration into driver-specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options that reach the server without selecting a database.
    fn without_db(&self) -> Output;
    /// Options that also select the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<SqlxConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> SqlxConnectOptions {
        let mut connect_options = SqlxConnectOptions::new_without_pgpass()
            .host(&self.host)
            .username(&self.username)
            .port(self.port)
            .ssl_mode(SqlxSslMode::Prefer)
            .options(ETL_EXTRACTOR_OPTIONS.to_key_value_pairs());

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        connect_options
    }

    fn with_db(&self) -> SqlxConnectOptions {
        let connect_options: SqlxConnectOptions = self.without_db();
        connect_options.database(&self.name)
    }
}

impl IntoConnectOptions<TiberiusConfig> for SqlServerConnectionConfig {
    fn without_db(&self) -> TiberiusConfig {
        let mut config = TiberiusConfig::new();
        config.host(&self.host);
        config.port(self.port);
        config.application_name(APP_NAME_EXTRACTOR);

        let password = self
            .password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
            .unwrap_or_default();
        config.authentication(AuthMethod::sql_server(&self.username, password));

        if self.trust_server_certificate {
            config.trust_cert();
        }

        // `Off` still encrypts the login packet, `Required` encrypts the whole session.
        if self.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::Off);
        }

        config
    }

    fn with_db(&self) -> TiberiusConfig {
        let mut config: TiberiusConfig = self.without_db();
        config.database(&self.name);
        config
    }
}
