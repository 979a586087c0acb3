//! Data types flowing through an extraction run.
//!
//! Records read from the source are made of [`Cell`]s, carry a [`RecordKey`], and are grouped
//! into [`Chunk`]s before being written. The [`Watermark`] bounds what a run extracts.

mod cell;
mod chunk;
mod record;
mod watermark;

pub use cell::*;
pub use chunk::*;
pub use record::*;
pub use watermark::*;
