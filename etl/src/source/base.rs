use futures::stream::BoxStream;
use std::future::Future;

use crate::error::EtlResult;
use crate::schema::TableSchema;
use crate::types::{SourceRecord, Watermark};

/// Ordered stream of records produced by a [`Source`].
pub type RecordStream<'a> = BoxStream<'a, EtlResult<SourceRecord>>;

/// Trait for systems that change records are extracted from.
///
/// A source yields, for a given [`Watermark`], every record whose modification timestamp is
/// strictly greater than the watermark, ordered ascending by (`modified_ts`, `identifier`).
/// The ordering is load bearing: the destination derives the next run's watermark from the
/// committed rows, so any row skipped or reordered here could be lost for good.
pub trait Source {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Returns the schema of the entity read by this source.
    fn schema(&self) -> &TableSchema;

    /// Opens the connection to the source system.
    fn connect(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Starts extracting every record past `watermark`.
    ///
    /// The returned stream is lazy: records are read as it is polled. An error ends the
    /// stream.
    fn stream(
        &mut self,
        watermark: Watermark,
    ) -> impl Future<Output = EtlResult<RecordStream<'_>>> + Send;

    /// Releases the connection. Calling it on a source that never connected is a no-op.
    fn close(&mut self) -> impl Future<Output = EtlResult<()>> + Send;
}
