use chrono::NaiveDateTime;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::TableSchema;
use crate::types::Cell;

/// Stable identifier of a source entity.
///
/// Identifiers are totally ordered so that records can be sorted by
/// (`modified_ts`, `identifier`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Int(i64),
    Text(String),
}

impl Identifier {
    /// Extracts an identifier from a cell. Nulls and non-scalar values are rejected.
    pub fn from_cell(cell: &Cell) -> EtlResult<Self> {
        let identifier = match cell {
            Cell::I16(value) => Identifier::Int((*value).into()),
            Cell::I32(value) => Identifier::Int((*value).into()),
            Cell::I64(value) => Identifier::Int(*value),
            Cell::String(value) => Identifier::Text(value.clone()),
            Cell::Uuid(value) => Identifier::Text(value.to_string()),
            Cell::Null => {
                bail!(ErrorKind::InvalidData, "Record identifier is null");
            }
            other => {
                bail!(
                    ErrorKind::InvalidData,
                    "Record identifier has an unsupported type",
                    other.type_name()
                );
            }
        };

        Ok(identifier)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(value) => write!(f, "{value}"),
            Identifier::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Int(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Text(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Text(value)
    }
}

/// The dedup key of a record: (`modified_ts`, `identifier`).
///
/// The derived ordering compares the timestamp first, which is the extraction order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub modified_ts: NaiveDateTime,
    pub identifier: Identifier,
}

impl RecordKey {
    pub fn new(modified_ts: NaiveDateTime, identifier: impl Into<Identifier>) -> Self {
        Self {
            modified_ts,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.identifier, self.modified_ts)
    }
}

/// One row of the source view.
///
/// Values are stored in table column order and already coerced to the declared column
/// types. The key is derived from the identifier and `modified_ts` columns when the record
/// is built, so every record carries a valid key.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    key: RecordKey,
    values: Vec<Cell>,
}

impl SourceRecord {
    /// Builds a record from raw values in column order.
    pub fn new(schema: &TableSchema, values: Vec<Cell>) -> EtlResult<Self> {
        if values.len() != schema.columns().len() {
            bail!(
                ErrorKind::InvalidData,
                "Record does not match the table schema",
                format!(
                    "expected {} values, got {}",
                    schema.columns().len(),
                    values.len()
                )
            );
        }

        let values = values
            .into_iter()
            .zip(schema.columns())
            .map(|(cell, column)| cell.coerce_to(column.typ))
            .collect::<EtlResult<Vec<_>>>()?;

        let identifier = Identifier::from_cell(&values[schema.identifier_index()])?;
        let modified_ts = match &values[schema.modified_ts_index()] {
            Cell::Timestamp(value) => *value,
            Cell::TimestampTz(value) => value.naive_utc(),
            other => {
                bail!(
                    ErrorKind::InvalidData,
                    "Record modification timestamp is missing",
                    format!(
                        "identifier {identifier} has a {} modification timestamp",
                        other.type_name()
                    )
                );
            }
        };

        Ok(Self {
            key: RecordKey {
                modified_ts,
                identifier,
            },
            values,
        })
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn modified_ts(&self) -> NaiveDateTime {
        self.key.modified_ts
    }

    pub fn identifier(&self) -> &Identifier {
        &self.key.identifier
    }

    /// Returns the values in table column order.
    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }
}
