use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use etl_config::shared::{IntoConnectOptions, SqlServerConnectionConfig};
use futures::{StreamExt, future};
use std::time::Duration;
use tiberius::{Client, ColumnData, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::schema::{ColumnType, TableSchema, quote_bracketed};
use crate::source::{RecordStream, Source};
use crate::types::{Cell, SourceRecord, Watermark};

/// Upper bound for establishing the TCP connection and completing the login.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type SqlServerClient = Client<Compat<TcpStream>>;

/// Source reading change records from a SQL Server view.
///
/// A single parameterized query is issued per run. Rows are decoded lazily as the returned
/// stream is polled, so memory use is bounded by the chunk size of the consumer.
pub struct SqlServerSource {
    config: SqlServerConnectionConfig,
    schema: TableSchema,
    client: Option<SqlServerClient>,
}

impl SqlServerSource {
    pub fn new(config: SqlServerConnectionConfig, schema: TableSchema) -> Self {
        Self {
            config,
            schema,
            client: None,
        }
    }

    async fn open_client(&self) -> EtlResult<SqlServerClient> {
        let config: tiberius::Config = self.config.with_db();

        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|err| {
            etl_error!(
                ErrorKind::SourceConnectionFailed,
                "Failed to connect to SQL Server",
                format!("{}:{}: {err}", self.config.host, self.config.port),
                source: err
            )
        })?;
        tcp.set_nodelay(true)?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|err| {
                let err = EtlError::from(err);
                if err.kind() == ErrorKind::AuthenticationError {
                    err
                } else {
                    err.reclassify(
                        ErrorKind::SourceConnectionFailed,
                        "Failed to log in to SQL Server",
                    )
                }
            })
    }
}

impl Source for SqlServerSource {
    fn name() -> &'static str {
        "sql_server"
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn connect(&mut self) -> EtlResult<()> {
        let client = tokio::time::timeout(CONNECT_TIMEOUT, self.open_client())
            .await
            .map_err(|_| {
                etl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Timed out connecting to SQL Server",
                    format!(
                        "no session with {}:{} after {}s",
                        self.config.host,
                        self.config.port,
                        CONNECT_TIMEOUT.as_secs()
                    )
                )
            })??;

        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.name,
            "connected to sql server source"
        );

        self.client = Some(client);

        Ok(())
    }

    async fn stream(&mut self, watermark: Watermark) -> EtlResult<RecordStream<'_>> {
        let Some(client) = self.client.as_mut() else {
            bail!(
                ErrorKind::InvalidState,
                "Source is not connected",
                "connect must be called before streaming"
            );
        };

        let sql = select_query(&self.schema);
        debug!(query = %sql, watermark = %watermark, "executing extraction query");

        let mut query = Query::new(sql);
        query.bind(watermark.value());

        let rows = query.query(client).await.map_err(|err| {
            EtlError::from(err).reclassify(
                ErrorKind::SourceQueryFailed,
                "Failed to execute the extraction query",
            )
        })?;

        let schema = &self.schema;
        let records = rows.into_row_stream().filter_map(move |row| {
            let record = row
                .map_err(|err| {
                    EtlError::from(err)
                        .reclassify(ErrorKind::SourceQueryFailed, "Failed to read a source row")
                })
                .and_then(|row| record_from_row(schema, row));

            future::ready(admit(record, watermark))
        });

        Ok(records.boxed())
    }

    async fn close(&mut self) -> EtlResult<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            info!("sql server source connection closed");
        }

        Ok(())
    }
}

/// Builds the extraction query for `schema`.
///
/// The single parameter `@P1` is the exclusive lower bound on the modification timestamp.
/// Rows are ordered by the timestamp at microsecond precision, the precision record keys are
/// rounded to, so that two source values sharing a microsecond still sort by identifier.
pub fn select_query(schema: &TableSchema) -> String {
    let columns = schema
        .column_names()
        .map(quote_bracketed)
        .collect::<Vec<_>>()
        .join(", ");
    let modified_ts_column = schema.modified_ts_column();
    let modified_ts = quote_bracketed(&modified_ts_column.name);
    let identifier = quote_bracketed(&schema.identifier_column().name);
    let rounded_type = match modified_ts_column.typ {
        ColumnType::TimestampTz => "datetimeoffset(6)",
        _ => "datetime2(6)",
    };

    format!(
        "SELECT {columns} FROM {} WHERE {modified_ts} > @P1 \
         ORDER BY CAST({modified_ts} AS {rounded_type}), {identifier}",
        schema.source().as_bracketed_identifier()
    )
}

fn record_from_row(schema: &TableSchema, row: Row) -> EtlResult<SourceRecord> {
    let values = row
        .into_iter()
        .map(cell_from_column_data)
        .collect::<EtlResult<Vec<_>>>()?;

    SourceRecord::new(schema, values)
}

/// Drops records already covered by `watermark`.
///
/// The query bound compares raw source precision while keys are rounded to microseconds, so a
/// row rounding down onto the watermark passes the bound but is already loaded. Errors pass.
fn admit(
    record: EtlResult<SourceRecord>,
    watermark: Watermark,
) -> Option<EtlResult<SourceRecord>> {
    match &record {
        Ok(loaded) if !watermark.admits(loaded.modified_ts()) => None,
        _ => Some(record),
    }
}

/// Converts a SQL Server value into a [`Cell`].
pub fn cell_from_column_data(data: ColumnData<'static>) -> EtlResult<Cell> {
    let cell = match &data {
        ColumnData::U8(value) => value
            .map(|value| Cell::I16(value.into()))
            .unwrap_or(Cell::Null),
        ColumnData::I16(value) => value.map(Cell::I16).unwrap_or(Cell::Null),
        ColumnData::I32(value) => value.map(Cell::I32).unwrap_or(Cell::Null),
        ColumnData::I64(value) => value.map(Cell::I64).unwrap_or(Cell::Null),
        ColumnData::F32(value) => value.map(Cell::F32).unwrap_or(Cell::Null),
        ColumnData::F64(value) => value.map(Cell::F64).unwrap_or(Cell::Null),
        ColumnData::Bit(value) => value.map(Cell::Bool).unwrap_or(Cell::Null),
        ColumnData::String(value) => value
            .as_ref()
            .map(|value| Cell::String(value.to_string()))
            .unwrap_or(Cell::Null),
        ColumnData::Guid(value) => value.map(Cell::Uuid).unwrap_or(Cell::Null),
        ColumnData::Binary(value) => value
            .as_ref()
            .map(|value| Cell::Bytes(value.to_vec()))
            .unwrap_or(Cell::Null),
        ColumnData::Numeric(value) => value
            .as_ref()
            .map(|value| {
                Cell::Numeric(BigDecimal::new(
                    BigInt::from(value.value()),
                    i64::from(value.scale()),
                ))
            })
            .unwrap_or(Cell::Null),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            decode::<NaiveDateTime>(&data)?
                .map(Cell::Timestamp)
                .unwrap_or(Cell::Null)
        }
        ColumnData::Date(_) => decode::<NaiveDate>(&data)?
            .map(Cell::Date)
            .unwrap_or(Cell::Null),
        ColumnData::Time(_) => decode::<NaiveTime>(&data)?
            .map(Cell::Time)
            .unwrap_or(Cell::Null),
        ColumnData::DateTimeOffset(_) => decode::<DateTime<FixedOffset>>(&data)?
            .map(|value| Cell::TimestampTz(value.with_timezone(&Utc)))
            .unwrap_or(Cell::Null),
        ColumnData::Xml(_) => {
            bail!(
                ErrorKind::ConversionError,
                "Unsupported source column type",
                "xml columns cannot be extracted"
            );
        }
    };

    Ok(cell)
}

fn decode<'a, T>(data: &'a ColumnData<'static>) -> EtlResult<Option<T>>
where
    T: FromSql<'a>,
{
    T::from_sql(data).map_err(|err| {
        EtlError::from(err).reclassify(
            ErrorKind::ConversionError,
            "Failed to decode a temporal source value",
        )
    })
}
