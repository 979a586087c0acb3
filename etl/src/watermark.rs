use tracing::info;

use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::types::Watermark;

/// Derives the extraction watermark from what the destination already holds.
///
/// The watermark is never persisted: it is the largest committed modification timestamp,
/// read fresh at the start of every run. That makes a run resumable after any failure,
/// since a rolled back chunk leaves no trace that could move the watermark.
#[derive(Debug)]
pub struct WatermarkResolver<'a, D> {
    destination: &'a D,
}

impl<'a, D> WatermarkResolver<'a, D>
where
    D: Destination,
{
    pub fn new(destination: &'a D) -> Self {
        Self { destination }
    }

    /// Returns the watermark for the next extraction.
    ///
    /// An empty or missing target table is a cold start and resolves to
    /// [`Watermark::sentinel`]. Any other failure is returned to the caller.
    pub async fn resolve(&self) -> EtlResult<Watermark> {
        match self.destination.max_modified_ts().await {
            Ok(Some(max)) => {
                let watermark = Watermark::new(max);
                info!(watermark = %watermark, "resolved watermark from destination");

                Ok(watermark)
            }
            Ok(None) => {
                let watermark = Watermark::sentinel();
                info!(
                    watermark = %watermark,
                    "destination table is empty, starting from the beginning"
                );

                Ok(watermark)
            }
            Err(err) if err.kind() == ErrorKind::DestinationTableMissing => {
                let watermark = Watermark::sentinel();
                info!(
                    watermark = %watermark,
                    error = %err,
                    "destination table does not exist yet, starting from the beginning"
                );

                Ok(watermark)
            }
            Err(err) => Err(err),
        }
    }
}
