//! Concurrency utilities used by extraction runs.
//!
//! The [`shutdown`] module lets signal handlers stop a running extraction cooperatively. The
//! [`stream`] module turns the ordered record stream of a source into bounded chunks.

pub mod shutdown;
pub mod stream;
