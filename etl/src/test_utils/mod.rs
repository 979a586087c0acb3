//! Helpers shared by unit and integration tests.
//!
//! - [`fixtures`] builds schemas, records and pipeline configurations.
//! - [`failpoints`] scopes `fail` crate failpoints to a single test.
//!
//! In-memory source and destination implementations live next to the real ones, in
//! [`crate::source::memory`] and [`crate::destination::memory`].

pub mod failpoints;
pub mod fixtures;
