use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::future::Future;
use std::ops::AddAssign;

use crate::error::EtlResult;
use crate::types::{Chunk, RecordKey};

/// Outcome of inserting one record of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A row with the same dedup key already existed, or appeared earlier in the same chunk.
    SkippedDuplicate,
}

/// Counts of what happened to the records of one or more chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: u64,
    pub skipped: u64,
}

impl WriteSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a InsertOutcome>) -> Self {
        let mut summary = WriteSummary::default();
        for outcome in outcomes {
            match outcome {
                InsertOutcome::Inserted => summary.inserted += 1,
                InsertOutcome::SkippedDuplicate => summary.skipped += 1,
            }
        }

        summary
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.skipped
    }
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Matches the keys reported as written back to the records of a chunk.
///
/// `keys` are the chunk keys in chunk order and `written` the keys the destination reported
/// as inserted. Each reported key accounts for one record, so when a key occurs twice in a
/// chunk only its first occurrence is [`InsertOutcome::Inserted`].
pub fn tally_outcomes<'a>(
    keys: impl IntoIterator<Item = &'a RecordKey>,
    written: impl IntoIterator<Item = RecordKey>,
) -> Vec<InsertOutcome> {
    let mut remaining: HashMap<RecordKey, usize> = HashMap::new();
    for key in written {
        *remaining.entry(key).or_default() += 1;
    }

    keys.into_iter()
        .map(|key| match remaining.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                InsertOutcome::Inserted
            }
            _ => InsertOutcome::SkippedDuplicate,
        })
        .collect()
}

/// Trait for systems that extracted records are appended to.
///
/// Writes are idempotent: a record whose dedup key (`identifier`, `modified_ts`) is already
/// present is skipped rather than rejected. Each chunk is written atomically, so after a
/// failed [`Destination::write_chunk`] none of the chunk's records are visible.
///
/// The trait provides a default no-op [`Destination::shutdown`]. Override it if the
/// destination holds resources that must be released when a run ends.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Opens the connection to the destination, provisioning the target table if configured.
    fn connect(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Returns the largest modification timestamp committed so far, if any.
    ///
    /// A missing target table is reported as [`crate::error::ErrorKind::DestinationTableMissing`].
    fn max_modified_ts(&self) -> impl Future<Output = EtlResult<Option<NaiveDateTime>>> + Send;

    /// Writes one chunk in a single transaction.
    ///
    /// Every record is either inserted or skipped as a duplicate. Any other failure rolls the
    /// whole chunk back and is reported as
    /// [`crate::error::ErrorKind::DestinationWriteFailed`].
    fn write_chunk(&self, chunk: &Chunk) -> impl Future<Output = EtlResult<WriteSummary>> + Send;

    /// Releases the destination's resources.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&mut self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }
}
