//! Sources that change records are extracted from.
//!
//! The [`Source`] trait is implemented by [`sql_server::SqlServerSource`] for production runs
//! and by [`memory::MemorySource`] for tests.

mod base;
pub mod memory;
pub mod sql_server;

pub use base::{RecordStream, Source};
