use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// The lower bound for an extraction, exclusive.
///
/// Only source rows whose modification timestamp is strictly greater than the watermark are
/// extracted. An empty destination starts from [`Watermark::sentinel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Watermark(NaiveDateTime);

impl Watermark {
    pub fn new(value: NaiveDateTime) -> Self {
        Self(value)
    }

    /// The cold-start watermark, `1900-01-01 00:00:00`.
    pub fn sentinel() -> Self {
        let value = NaiveDate::from_ymd_opt(1900, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MIN);

        Self(value)
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel()
    }

    /// Returns `true` when a row modified at `ts` lies past the watermark.
    pub fn admits(&self, ts: NaiveDateTime) -> bool {
        ts > self.0
    }

    pub fn value(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<Option<NaiveDateTime>> for Watermark {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map(Watermark::new).unwrap_or_else(Watermark::sentinel)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
