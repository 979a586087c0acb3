use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Quotes an identifier for Postgres, doubling embedded double quotes.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quotes an identifier for SQL Server, doubling embedded closing brackets.
pub fn quote_bracketed(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

/// A fully qualified table or view name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    /// The schema containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns the name as a quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }

    /// Returns the name as a bracketed SQL Server identifier.
    pub fn as_bracketed_identifier(&self) -> String {
        let quoted_schema = quote_bracketed(&self.schema);
        let quoted_name = quote_bracketed(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Logical type of a column, shared by the source decoder and the destination writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    Double,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Bytes,
}

impl ColumnType {
    /// The Postgres type used when provisioning the destination table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Numeric => "numeric",
            ColumnType::Real => "real",
            ColumnType::Double => "double precision",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Uuid => "uuid",
            ColumnType::Bytes => "bytea",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// Schema metadata for a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> ColumnSchema {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// The shape of an extracted entity: where it is read from, where it is written to, its
/// columns in order, and which columns form the dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    source: TableName,
    target: TableName,
    columns: Vec<ColumnSchema>,
    identifier_index: usize,
    modified_ts_index: usize,
}

impl TableSchema {
    /// Builds a schema, resolving the key columns by name.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when the column list is empty, contains
    /// duplicates, or does not contain a non-null identifier and a non-null timestamp column.
    pub fn new(
        source: TableName,
        target: TableName,
        columns: Vec<ColumnSchema>,
        identifier: &str,
        modified_ts: &str,
    ) -> EtlResult<TableSchema> {
        if columns.is_empty() {
            bail!(ErrorKind::ConfigError, "Table schema has no columns", source.to_string());
        }

        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|other| other.name == column.name) {
                bail!(
                    ErrorKind::ConfigError,
                    "Table schema has a duplicate column",
                    format!("column '{}' appears more than once in {source}", column.name)
                );
            }
        }

        let position = |name: &str| columns.iter().position(|column| column.name == name);

        let Some(identifier_index) = position(identifier) else {
            bail!(
                ErrorKind::ConfigError,
                "Identifier column is not part of the table schema",
                format!("column '{identifier}' not found in {source}")
            );
        };
        let Some(modified_ts_index) = position(modified_ts) else {
            bail!(
                ErrorKind::ConfigError,
                "Modification timestamp column is not part of the table schema",
                format!("column '{modified_ts}' not found in {source}")
            );
        };

        if columns[identifier_index].nullable || columns[modified_ts_index].nullable {
            bail!(
                ErrorKind::ConfigError,
                "Key columns must not be nullable",
                format!("{identifier} and {modified_ts} must be declared NOT NULL")
            );
        }

        if !matches!(
            columns[modified_ts_index].typ,
            ColumnType::Timestamp | ColumnType::TimestampTz
        ) {
            bail!(
                ErrorKind::ConfigError,
                "Modification timestamp column must be a timestamp",
                format!("{modified_ts} is declared as {}", columns[modified_ts_index].typ)
            );
        }

        Ok(Self {
            source,
            target,
            columns,
            identifier_index,
            modified_ts_index,
        })
    }

    pub fn source(&self) -> &TableName {
        &self.source
    }

    pub fn target(&self) -> &TableName {
        &self.target
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn identifier_index(&self) -> usize {
        self.identifier_index
    }

    pub fn modified_ts_index(&self) -> usize {
        self.modified_ts_index
    }

    pub fn identifier_column(&self) -> &ColumnSchema {
        &self.columns[self.identifier_index]
    }

    pub fn modified_ts_column(&self) -> &ColumnSchema {
        &self.columns[self.modified_ts_index]
    }
}
