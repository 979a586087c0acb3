//! Tracing setup shared by the extractor binaries.

pub mod tracing;

pub use self::tracing::{LogFlusher, TracingError, init_test_tracing, init_tracing};
