use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use etl_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::destination::{Destination, WriteSummary, tally_outcomes};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::schema::{ColumnType, TableSchema, quote_identifier};
use crate::types::{Cell, Chunk, Identifier, RecordKey, SourceRecord};

/// Upper bound for acquiring the destination connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of bind parameters in a single Postgres statement.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

/// Ingestion metadata columns appended to every row.
const LOAD_TS_COLUMN: &str = "_bronze_load_ts";
const SOURCE_FILE_COLUMN: &str = "_bronze_source_file";
const BATCH_ID_COLUMN: &str = "_bronze_batch_id";

/// Number of bound metadata values per row. The load timestamp is computed by the server.
const METADATA_BINDS_PER_ROW: usize = 2;

/// Destination appending records to a Postgres table.
///
/// The destination uses a single pooled connection, so there is exactly one writer per run.
/// Each chunk is inserted in one transaction with `ON CONFLICT DO NOTHING` on the dedup key,
/// and the keys returned by the insert are matched back to the chunk to count what was
/// written and what was skipped.
#[derive(Debug)]
pub struct PostgresDestination {
    config: PgConnectionConfig,
    schema: TableSchema,
    source_file: String,
    provision: bool,
    pool: Option<PgPool>,
}

impl PostgresDestination {
    /// Creates a destination writing rows described by `schema`.
    ///
    /// `source_file` is stamped into the source lineage column of every row. When `provision`
    /// is set, [`Destination::connect`] creates the target schema and table if missing.
    pub fn new(
        config: PgConnectionConfig,
        schema: TableSchema,
        source_file: impl Into<String>,
        provision: bool,
    ) -> Self {
        Self {
            config,
            schema,
            source_file: source_file.into(),
            provision,
            pool: None,
        }
    }

    fn pool(&self) -> EtlResult<&PgPool> {
        match &self.pool {
            Some(pool) => Ok(pool),
            None => {
                bail!(
                    ErrorKind::InvalidState,
                    "Destination is not connected",
                    "connect must be called before using the destination"
                );
            }
        }
    }

    async fn provision_table(&self, pool: &PgPool) -> EtlResult<()> {
        let mut tx = pool.begin().await?;
        for statement in provisioning_statements(&self.schema) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(table = %self.schema.target(), "destination table provisioned");

        Ok(())
    }

    async fn insert_chunk(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        chunk: &Chunk,
    ) -> EtlResult<Vec<RecordKey>> {
        let rows_per_statement = rows_per_statement(&self.schema);
        let mut written = Vec::with_capacity(chunk.len());

        for records in chunk.records().chunks(rows_per_statement) {
            let mut builder = insert_builder(
                &self.schema,
                records,
                &self.source_file,
                chunk.batch_token().into_inner(),
            );

            let rows = builder.build().fetch_all(&mut **tx).await?;
            for row in &rows {
                written.push(key_from_row(&self.schema, row)?);
            }
        }

        Ok(written)
    }
}

impl Destination for PostgresDestination {
    fn name() -> &'static str {
        "postgres"
    }

    async fn connect(&mut self) -> EtlResult<()> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(self.config.with_db())
            .await?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.name,
            "connected to postgres destination"
        );

        if self.provision {
            self.provision_table(&pool).await?;
        }

        self.pool = Some(pool);

        Ok(())
    }

    async fn max_modified_ts(&self) -> EtlResult<Option<NaiveDateTime>> {
        let pool = self.pool()?;
        let sql = max_modified_ts_query(&self.schema);

        let max = match self.schema.modified_ts_column().typ {
            ColumnType::TimestampTz => sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
                .fetch_one(pool)
                .await?
                .map(|value| value.naive_utc()),
            _ => {
                sqlx::query_scalar::<_, Option<NaiveDateTime>>(&sql)
                    .fetch_one(pool)
                    .await?
            }
        };

        Ok(max)
    }

    async fn write_chunk(&self, chunk: &Chunk) -> EtlResult<WriteSummary> {
        let pool = self.pool()?;

        let mut tx = pool.begin().await.map_err(|err| {
            EtlError::from(err)
                .reclassify(ErrorKind::DestinationWriteFailed, "Failed to begin chunk transaction")
        })?;

        let written = match self.insert_chunk(&mut tx, chunk).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, chunk = chunk.ordinal(), "chunk rollback failed");
                }

                return Err(err.reclassify(ErrorKind::DestinationWriteFailed, "Failed to write chunk"));
            }
        };

        tx.commit().await.map_err(|err| {
            EtlError::from(err)
                .reclassify(ErrorKind::DestinationWriteFailed, "Failed to commit chunk")
        })?;

        let outcomes = tally_outcomes(chunk.keys(), written);
        let summary = WriteSummary::from_outcomes(&outcomes);

        debug!(
            chunk = chunk.ordinal(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            "chunk committed"
        );

        Ok(summary)
    }

    async fn shutdown(&mut self) -> EtlResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!("postgres destination pool closed");
        }

        Ok(())
    }
}

/// Number of rows that fit in one insert statement without exceeding the bind limit.
pub fn rows_per_statement(schema: &TableSchema) -> usize {
    let binds_per_row = schema.columns().len() + METADATA_BINDS_PER_ROW;
    (MAX_BIND_PARAMETERS / binds_per_row).max(1)
}

/// Returns the query reading the largest committed modification timestamp.
pub fn max_modified_ts_query(schema: &TableSchema) -> String {
    format!(
        "SELECT MAX({}) FROM {}",
        quote_identifier(&schema.modified_ts_column().name),
        schema.target().as_quoted_identifier()
    )
}

/// Returns the statements creating the target schema and table when missing.
pub fn provisioning_statements(schema: &TableSchema) -> Vec<String> {
    let target = schema.target();

    let mut columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| {
            let null = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "{} {}{null}",
                quote_identifier(&column.name),
                column.typ.sql_type()
            )
        })
        .collect();
    columns.push(format!(
        "{} timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP",
        quote_identifier(LOAD_TS_COLUMN)
    ));
    columns.push(format!("{} text NOT NULL", quote_identifier(SOURCE_FILE_COLUMN)));
    columns.push(format!("{} bigint NOT NULL", quote_identifier(BATCH_ID_COLUMN)));
    columns.push(format!("UNIQUE ({})", dedup_key_columns(schema)));

    vec![
        format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(&target.schema)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            target.as_quoted_identifier(),
            columns.join(", ")
        ),
    ]
}

fn dedup_key_columns(schema: &TableSchema) -> String {
    format!(
        "{}, {}",
        quote_identifier(&schema.identifier_column().name),
        quote_identifier(&schema.modified_ts_column().name)
    )
}

fn insert_builder(
    schema: &TableSchema,
    records: &[SourceRecord],
    source_file: &str,
    batch_id: i64,
) -> QueryBuilder<'static, Postgres> {
    let columns = schema
        .column_names()
        .chain([LOAD_TS_COLUMN, SOURCE_FILE_COLUMN, BATCH_ID_COLUMN])
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({columns}) ",
        schema.target().as_quoted_identifier()
    ));

    builder.push_values(records, |mut row, record| {
        for (cell, column) in record.values().iter().zip(schema.columns()) {
            push_cell(&mut row, cell, column.typ);
        }
        row.push("CURRENT_TIMESTAMP");
        row.push_bind(source_file.to_string());
        row.push_bind(batch_id);
    });

    let key_columns = dedup_key_columns(schema);
    builder.push(format!(
        " ON CONFLICT ({key_columns}) DO NOTHING RETURNING {key_columns}"
    ));

    builder
}

fn push_cell<Sep: Display>(
    row: &mut Separated<'_, 'static, Postgres, Sep>,
    cell: &Cell,
    typ: ColumnType,
) {
    match cell {
        Cell::Null => push_null(row, typ),
        Cell::Bool(value) => {
            row.push_bind(*value);
        }
        Cell::I16(value) => {
            row.push_bind(*value);
        }
        Cell::I32(value) => {
            row.push_bind(*value);
        }
        Cell::I64(value) => {
            row.push_bind(*value);
        }
        Cell::F32(value) => {
            row.push_bind(*value);
        }
        Cell::F64(value) => {
            row.push_bind(*value);
        }
        Cell::Numeric(value) => {
            row.push_bind(value.clone());
        }
        Cell::String(value) => {
            row.push_bind(value.clone());
        }
        Cell::Bytes(value) => {
            row.push_bind(value.clone());
        }
        Cell::Uuid(value) => {
            row.push_bind(*value);
        }
        Cell::Date(value) => {
            row.push_bind(*value);
        }
        Cell::Time(value) => {
            row.push_bind(*value);
        }
        Cell::Timestamp(value) => {
            row.push_bind(*value);
        }
        Cell::TimestampTz(value) => {
            row.push_bind(*value);
        }
    }
}

/// Binds a null typed after the target column so Postgres never has to infer it.
fn push_null<Sep: Display>(row: &mut Separated<'_, 'static, Postgres, Sep>, typ: ColumnType) {
    match typ {
        ColumnType::Text => row.push_bind(None::<String>),
        ColumnType::SmallInt => row.push_bind(None::<i16>),
        ColumnType::Integer => row.push_bind(None::<i32>),
        ColumnType::BigInt => row.push_bind(None::<i64>),
        ColumnType::Numeric => row.push_bind(None::<BigDecimal>),
        ColumnType::Real => row.push_bind(None::<f32>),
        ColumnType::Double => row.push_bind(None::<f64>),
        ColumnType::Boolean => row.push_bind(None::<bool>),
        ColumnType::Date => row.push_bind(None::<NaiveDate>),
        ColumnType::Time => row.push_bind(None::<NaiveTime>),
        ColumnType::Timestamp => row.push_bind(None::<NaiveDateTime>),
        ColumnType::TimestampTz => row.push_bind(None::<DateTime<Utc>>),
        ColumnType::Uuid => row.push_bind(None::<Uuid>),
        ColumnType::Bytes => row.push_bind(None::<Vec<u8>>),
    };
}

fn key_from_row(schema: &TableSchema, row: &PgRow) -> EtlResult<RecordKey> {
    let identifier = match schema.identifier_column().typ {
        ColumnType::SmallInt => Identifier::Int(row.try_get::<i16, _>(0)?.into()),
        ColumnType::Integer => Identifier::Int(row.try_get::<i32, _>(0)?.into()),
        ColumnType::BigInt => Identifier::Int(row.try_get::<i64, _>(0)?),
        ColumnType::Uuid => Identifier::Text(row.try_get::<Uuid, _>(0)?.to_string()),
        _ => Identifier::Text(row.try_get::<String, _>(0)?),
    };

    let modified_ts = match schema.modified_ts_column().typ {
        ColumnType::TimestampTz => row.try_get::<DateTime<Utc>, _>(1)?.naive_utc(),
        _ => row.try_get::<NaiveDateTime, _>(1)?,
    };

    Ok(RecordKey {
        modified_ts,
        identifier,
    })
}
