//! Destinations that extracted records are appended to.
//!
//! The [`Destination`] trait is implemented by [`postgres::PostgresDestination`] for
//! production runs and by [`memory::MemoryDestination`] for tests. Both report per-chunk
//! results as a [`WriteSummary`].

mod base;
pub mod memory;
pub mod postgres;

pub use base::{Destination, InsertOutcome, WriteSummary, tally_outcomes};
