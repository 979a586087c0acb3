use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use std::fmt;

use crate::types::{RecordKey, SourceRecord};

/// Identifier stamped on every row written by one run.
///
/// The token is the run start time rendered as the integer `YYYYMMDDHHMMSS` in UTC. Two runs
/// started within the same second share a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchToken(i64);

impl BatchToken {
    /// Creates a token for a run starting now.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let date = i64::from(at.year()) * 10_000
            + i64::from(at.month()) * 100
            + i64::from(at.day());
        let time = i64::from(at.hour()) * 10_000
            + i64::from(at.minute()) * 100
            + i64::from(at.second());

        Self(date * 1_000_000 + time)
    }

    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl From<i64> for BatchToken {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bounded, ordered group of records written in one destination transaction.
#[derive(Debug, Clone)]
pub struct Chunk {
    ordinal: u64,
    batch_token: BatchToken,
    records: Vec<SourceRecord>,
}

impl Chunk {
    pub fn new(ordinal: u64, batch_token: BatchToken, records: Vec<SourceRecord>) -> Self {
        Self {
            ordinal,
            batch_token,
            records,
        }
    }

    /// 1-based position of the chunk within the run.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn batch_token(&self) -> BatchToken {
        self.batch_token
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_key(&self) -> Option<&RecordKey> {
        self.records.first().map(SourceRecord::key)
    }

    pub fn last_key(&self) -> Option<&RecordKey> {
        self.records.last().map(SourceRecord::key)
    }

    /// Largest modification timestamp in the chunk.
    pub fn max_modified_ts(&self) -> Option<NaiveDateTime> {
        self.records.iter().map(SourceRecord::modified_ts).max()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.records.iter().map(SourceRecord::key)
    }
}
