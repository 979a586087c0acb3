use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc};
use std::fmt;
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::ColumnType;

/// Fractional second digits kept by Postgres temporal types.
pub const TEMPORAL_SUBSEC_DIGITS: u16 = 6;

/// A single typed value read from the source.
///
/// Cells are stored in table column order inside a [`crate::types::SourceRecord`] and are
/// bound as-is into the destination insert statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(BigDecimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns a short name of the value type, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::I16(_) => "i16",
            Cell::I32(_) => "i32",
            Cell::I64(_) => "i64",
            Cell::F32(_) => "f32",
            Cell::F64(_) => "f64",
            Cell::Numeric(_) => "numeric",
            Cell::String(_) => "string",
            Cell::Bytes(_) => "bytes",
            Cell::Uuid(_) => "uuid",
            Cell::Date(_) => "date",
            Cell::Time(_) => "time",
            Cell::Timestamp(_) => "timestamp",
            Cell::TimestampTz(_) => "timestamptz",
        }
    }

    /// Converts the cell into the representation expected by a column of type `typ`.
    ///
    /// Lossless widenings and textual renderings are accepted. Narrowing conversions and
    /// unrelated types fail with [`ErrorKind::ConversionError`]. Times and timestamps are
    /// rounded half up to whole microseconds, so a value reads back from Postgres unchanged.
    pub fn coerce_to(self, typ: ColumnType) -> EtlResult<Cell> {
        let coerced = match (typ, self) {
            (_, Cell::Null) => Cell::Null,

            (ColumnType::Text, Cell::String(value)) => Cell::String(value),
            (ColumnType::Text, Cell::Bytes(_)) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Binary values cannot be stored as text"
                );
            }
            (ColumnType::Text, cell) => Cell::String(cell.to_string()),

            (ColumnType::Boolean, Cell::Bool(value)) => Cell::Bool(value),

            (ColumnType::SmallInt, Cell::I16(value)) => Cell::I16(value),

            (ColumnType::Integer, Cell::I16(value)) => Cell::I32(value.into()),
            (ColumnType::Integer, Cell::I32(value)) => Cell::I32(value),

            (ColumnType::BigInt, Cell::I16(value)) => Cell::I64(value.into()),
            (ColumnType::BigInt, Cell::I32(value)) => Cell::I64(value.into()),
            (ColumnType::BigInt, Cell::I64(value)) => Cell::I64(value),

            (ColumnType::Numeric, Cell::Numeric(value)) => Cell::Numeric(value),
            (ColumnType::Numeric, Cell::I16(value)) => Cell::Numeric(value.into()),
            (ColumnType::Numeric, Cell::I32(value)) => Cell::Numeric(value.into()),
            (ColumnType::Numeric, Cell::I64(value)) => Cell::Numeric(value.into()),

            (ColumnType::Real, Cell::F32(value)) => Cell::F32(value),
            (ColumnType::Double, Cell::F32(value)) => Cell::F64(value.into()),
            (ColumnType::Double, Cell::F64(value)) => Cell::F64(value),

            (ColumnType::Date, Cell::Date(value)) => Cell::Date(value),
            (ColumnType::Date, Cell::Timestamp(value)) => Cell::Date(value.date()),

            (ColumnType::Time, Cell::Time(value)) => {
                Cell::Time(value.round_subsecs(TEMPORAL_SUBSEC_DIGITS))
            }

            (ColumnType::Timestamp, Cell::Timestamp(value)) => {
                Cell::Timestamp(value.round_subsecs(TEMPORAL_SUBSEC_DIGITS))
            }
            (ColumnType::Timestamp, Cell::Date(value)) => {
                Cell::Timestamp(value.and_time(NaiveTime::default()))
            }
            (ColumnType::Timestamp, Cell::TimestampTz(value)) => {
                Cell::Timestamp(value.naive_utc().round_subsecs(TEMPORAL_SUBSEC_DIGITS))
            }

            (ColumnType::TimestampTz, Cell::TimestampTz(value)) => {
                Cell::TimestampTz(value.round_subsecs(TEMPORAL_SUBSEC_DIGITS))
            }
            (ColumnType::TimestampTz, Cell::Timestamp(value)) => {
                Cell::TimestampTz(value.and_utc().round_subsecs(TEMPORAL_SUBSEC_DIGITS))
            }

            (ColumnType::Uuid, Cell::Uuid(value)) => Cell::Uuid(value),

            (ColumnType::Bytes, Cell::Bytes(value)) => Cell::Bytes(value),

            (typ, cell) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Value does not match the column type",
                    format!("cannot store a {} value in a {typ} column", cell.type_name())
                );
            }
        };

        Ok(coerced)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I16(value) => write!(f, "{value}"),
            Cell::I32(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::F32(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::Numeric(value) => write!(f, "{value}"),
            Cell::String(value) => f.write_str(value),
            Cell::Bytes(value) => write!(f, "<{} bytes>", value.len()),
            Cell::Uuid(value) => write!(f, "{value}"),
            Cell::Date(value) => write!(f, "{value}"),
            Cell::Time(value) => write!(f, "{value}"),
            Cell::Timestamp(value) => write!(f, "{value}"),
            Cell::TimestampTz(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::Timestamp(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn integers_render_as_text_for_text_columns() {
        assert_eq!(
            Cell::I32(42).coerce_to(ColumnType::Text).unwrap(),
            Cell::String("42".to_string())
        );
    }

    #[test]
    fn null_is_accepted_by_every_column_type() {
        for typ in [ColumnType::Text, ColumnType::Date, ColumnType::Timestamp] {
            assert_eq!(Cell::Null.coerce_to(typ).unwrap(), Cell::Null);
        }
    }

    #[test]
    fn timestamps_narrow_to_dates() {
        let cell = Cell::Timestamp(timestamp("1985-04-12 00:00:00"));
        assert_eq!(
            cell.coerce_to(ColumnType::Date).unwrap(),
            Cell::Date(NaiveDate::from_ymd_opt(1985, 4, 12).unwrap())
        );
    }

    #[test]
    fn timestamps_round_to_whole_microseconds() {
        // A `datetime` tick of 1/300 s decodes to 3_333_333 ns.
        let tick = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_nano_opt(10, 0, 0, 3_333_333)
            .unwrap();
        let rounded = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_micro_opt(10, 0, 0, 3_333)
            .unwrap();
        assert_eq!(
            Cell::Timestamp(tick).coerce_to(ColumnType::Timestamp).unwrap(),
            Cell::Timestamp(rounded)
        );

        let half = NaiveTime::from_hms_nano_opt(10, 0, 0, 6_666_500).unwrap();
        assert_eq!(
            Cell::Time(half).coerce_to(ColumnType::Time).unwrap(),
            Cell::Time(NaiveTime::from_hms_micro_opt(10, 0, 0, 6_667).unwrap())
        );

        let tz = tick.and_utc();
        assert_eq!(
            Cell::TimestampTz(tz).coerce_to(ColumnType::TimestampTz).unwrap(),
            Cell::TimestampTz(rounded.and_utc())
        );
    }

    #[test]
    fn integers_widen_but_do_not_narrow() {
        assert_eq!(
            Cell::I16(7).coerce_to(ColumnType::BigInt).unwrap(),
            Cell::I64(7)
        );

        let err = Cell::I64(7).coerce_to(ColumnType::SmallInt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn bytes_are_not_rendered_as_text() {
        let err = Cell::Bytes(vec![1, 2]).coerce_to(ColumnType::Text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn optional_values_convert_to_null() {
        assert_eq!(Cell::from(None::<String>), Cell::Null);
        assert_eq!(Cell::from(Some("x")), Cell::String("x".to_string()));
    }
}
