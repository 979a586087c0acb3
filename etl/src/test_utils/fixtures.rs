use chrono::NaiveDateTime;
use etl_config::shared::{
    BatchConfig, PgConnectionConfig, PipelineConfig, SqlServerConnectionConfig,
};

use crate::schema::{ColumnSchema, ColumnType, TableName, TableSchema};
use crate::types::{Cell, SourceRecord};

/// Parses a `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn ts(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .unwrap_or_else(|err| panic!("invalid test timestamp '{value}': {err}"))
}

/// A small schema with an integer identifier, used where the customer profile is too wide.
pub fn people_schema() -> TableSchema {
    TableSchema::new(
        TableName::new("dbo", "vw_people"),
        TableName::new("bronze", "people"),
        vec![
            ColumnSchema::new("id", ColumnType::BigInt, false),
            ColumnSchema::new("name", ColumnType::Text, true),
            ColumnSchema::new("modified", ColumnType::Timestamp, false),
        ],
        "id",
        "modified",
    )
    .expect("people schema is valid")
}

/// Builds a [`people_schema`] record.
pub fn person_record(schema: &TableSchema, id: i64, modified: &str) -> SourceRecord {
    SourceRecord::new(
        schema,
        vec![
            Cell::I64(id),
            Cell::String(format!("person {id}")),
            Cell::Timestamp(ts(modified)),
        ],
    )
    .expect("person record matches the people schema")
}

/// Builds a customer profile record with only the key columns and a last name set.
pub fn customer_record(schema: &TableSchema, customer_id: &str, modified: &str) -> SourceRecord {
    let values = schema
        .columns()
        .iter()
        .map(|column| match column.name.as_str() {
            "customer_id" => Cell::from(customer_id),
            "lastname" => Cell::String(format!("{customer_id} lastname")),
            "last_modified_ts" => Cell::Timestamp(ts(modified)),
            _ => Cell::Null,
        })
        .collect();

    SourceRecord::new(schema, values).expect("customer record matches the customer schema")
}

/// Returns a pipeline configuration pointing at unreachable hosts, for in-memory runs.
pub fn test_pipeline_config(max_size: usize, max_prefetch: usize) -> PipelineConfig {
    PipelineConfig {
        source: SqlServerConnectionConfig {
            host: "mssql.test".to_string(),
            port: SqlServerConnectionConfig::DEFAULT_PORT,
            name: SqlServerConnectionConfig::DEFAULT_NAME.to_string(),
            username: SqlServerConnectionConfig::DEFAULT_USERNAME.to_string(),
            password: None,
            encrypt: false,
            trust_server_certificate: true,
        },
        destination: PgConnectionConfig {
            host: PgConnectionConfig::DEFAULT_HOST.to_string(),
            port: PgConnectionConfig::DEFAULT_PORT,
            name: PgConnectionConfig::DEFAULT_NAME.to_string(),
            username: PgConnectionConfig::DEFAULT_USERNAME.to_string(),
            password: None,
        },
        batch: BatchConfig {
            max_size,
            max_prefetch,
        },
        run_timeout_secs: None,
        provision_destination: false,
    }
}
