use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Triggered after a chunk has been committed and before the next one is requested.
pub const RUN_PIPELINE__AFTER_CHUNK_WRITE: &str = "run_pipeline.after_chunk_write";

/// Triggered after the watermark has been resolved and before the source query runs.
pub const RUN_PIPELINE__AFTER_WATERMARK: &str = "run_pipeline.after_watermark";

/// Evaluates the failpoint `name`, returning an error when it is configured to fire.
///
/// The optional failpoint parameter selects the error kind: `write`, `connection` or
/// `query`. Anything else yields [`ErrorKind::InjectedFault`].
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("write") => ErrorKind::DestinationWriteFailed,
            Some("connection") => ErrorKind::DestinationConnectionFailed,
            Some("query") => ErrorKind::SourceQueryFailed,
            _ => ErrorKind::InjectedFault,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
