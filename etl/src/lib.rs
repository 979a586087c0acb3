//! Incremental extraction of change records from SQL Server into a Postgres bronze table.
//!
//! A run resolves a watermark from what the destination already holds, reads every newer
//! source record ordered by (`modified_ts`, `identifier`), and appends them in chunks. Each
//! chunk is written in its own transaction with duplicate keys skipped, so reruns are safe
//! and a failed run resumes from the last committed chunk.
//!
//! The entry point is [`pipeline::Pipeline`], generic over a [`source::Source`] and a
//! [`destination::Destination`].

pub mod concurrency;
pub mod destination;
pub mod error;
pub mod failpoints;
mod macros;
pub mod pipeline;
pub mod schema;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod watermark;
