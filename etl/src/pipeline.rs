use chrono::NaiveDateTime;
use etl_config::shared::PipelineConfig;
use futures::StreamExt;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::stream::ChunkStream;
use crate::destination::{Destination, WriteSummary};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::failpoints::{
    RUN_PIPELINE__AFTER_CHUNK_WRITE, RUN_PIPELINE__AFTER_WATERMARK, etl_fail_point,
};
use crate::source::Source;
use crate::types::{BatchToken, Chunk, Watermark};
use crate::watermark::WatermarkResolver;

/// Lifecycle of a run.
///
/// `Init → Connected → WatermarkResolved → Streaming → (Writing → Streaming)* → Complete`,
/// with `Failed` reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Connected,
    WatermarkResolved,
    Streaming,
    Writing,
    Complete,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Connected => "connected",
            PipelineState::WatermarkResolved => "watermark_resolved",
            PipelineState::Streaming => "streaming",
            PipelineState::Writing => "writing",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        }
    }

    fn is_chunk_loop(&self) -> bool {
        matches!(self, PipelineState::Streaming | PipelineState::Writing)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary outcome of a run, as reported to the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn from_result<T>(result: &EtlResult<T>) -> Self {
        match result {
            Ok(_) => RunStatus::Succeeded,
            Err(_) => RunStatus::Failed,
        }
    }

    /// Process exit code: `0` on success, `1` on failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
        }
    }
}

/// What a run did. Counts are informational and never drive control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub batch_token: BatchToken,
    /// The watermark the run extracted from.
    pub watermark: Watermark,
    /// Number of committed chunks.
    pub chunks: u64,
    pub inserted: u64,
    pub skipped: u64,
    /// Largest modification timestamp among committed chunks.
    pub max_committed_ts: Option<NaiveDateTime>,
    /// Set when a chunk failed to write while starting at `max_committed_ts`. Rows at that
    /// timestamp which were not committed lie at the next watermark and are not extracted again.
    pub tie_split_ts: Option<NaiveDateTime>,
}

impl RunReport {
    fn new(batch_token: BatchToken) -> Self {
        Self {
            batch_token,
            watermark: Watermark::sentinel(),
            chunks: 0,
            inserted: 0,
            skipped: 0,
            max_committed_ts: None,
            tie_split_ts: None,
        }
    }

    fn record_commit(&mut self, chunk: &Chunk, summary: WriteSummary) {
        self.chunks += 1;
        self.inserted += summary.inserted;
        self.skipped += summary.skipped;
        self.max_committed_ts = self.max_committed_ts.max(chunk.max_modified_ts());
    }

    /// Total number of records committed or skipped.
    pub fn rows(&self) -> u64 {
        self.inserted + self.skipped
    }

    /// The watermark the next run will resolve, assuming nothing else writes the table.
    pub fn next_watermark(&self) -> Watermark {
        self.max_committed_ts
            .map(Watermark::new)
            .unwrap_or(self.watermark)
    }
}

/// Rejects records that would break watermark derivation.
///
/// Every record must lie past the run's watermark, and modification timestamps must never
/// decrease across the run. Identifiers are not compared since their collation is owned by
/// the source.
#[derive(Debug)]
struct OrderingGuard {
    watermark: Watermark,
    last: Option<NaiveDateTime>,
}

impl OrderingGuard {
    fn new(watermark: Watermark) -> Self {
        Self {
            watermark,
            last: None,
        }
    }

    fn check(&mut self, chunk: &Chunk) -> EtlResult<()> {
        for record in chunk.records() {
            let ts = record.modified_ts();

            if !self.watermark.admits(ts) {
                bail!(
                    ErrorKind::InvalidData,
                    "Source returned a record at or before the watermark",
                    format!(
                        "record {} in chunk {} was modified at {ts}, watermark is {}",
                        record.identifier(),
                        chunk.ordinal(),
                        self.watermark
                    )
                );
            }

            if let Some(last) = self.last
                && ts < last
            {
                bail!(
                    ErrorKind::InvalidData,
                    "Source returned records out of order",
                    format!(
                        "record {} in chunk {} was modified at {ts}, after a record modified at {last}",
                        record.identifier(),
                        chunk.ordinal()
                    )
                );
            }

            self.last = Some(ts);
        }

        Ok(())
    }
}

/// Incremental extraction from a [`Source`] into a [`Destination`].
///
/// A pipeline performs exactly one run. The run resolves the watermark from the destination,
/// streams every newer source record in order, and writes them chunk by chunk. Each chunk is
/// committed before the next one is written, so a failed run leaves a consistent prefix
/// behind and the next run resumes after it.
#[derive(Debug)]
pub struct Pipeline<S, D> {
    config: Arc<PipelineConfig>,
    source: S,
    destination: D,
    state: PipelineState,
    report: RunReport,
    shutdown_tx: ShutdownTx,
}

impl<S, D> Pipeline<S, D>
where
    S: Source,
    D: Destination,
{
    pub fn new(config: PipelineConfig, source: S, destination: D) -> Self {
        // Receivers are created on demand through `ShutdownTx::subscribe`.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            destination,
            state: PipelineState::Init,
            report: RunReport::new(BatchToken::now()),
            shutdown_tx,
        }
    }

    /// Overrides the batch token generated when the pipeline was created.
    pub fn with_batch_token(mut self, batch_token: BatchToken) -> Self {
        self.report.batch_token = batch_token;
        self
    }

    pub fn batch_token(&self) -> BatchToken {
        self.report.batch_token
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Progress of the run so far. After a failure it describes the committed prefix.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Requests the run to stop. The in-flight chunk, if any, is rolled back.
    pub fn shutdown(&self) {
        info!("shutdown requested for extraction run");
        self.shutdown_tx.shutdown();
    }

    /// Executes the run.
    ///
    /// Source and destination are released before this returns, whatever the outcome. A
    /// failure while releasing them is reported together with the run's own error, and fails
    /// an otherwise successful run.
    pub async fn run(&mut self) -> EtlResult<RunReport> {
        if self.state != PipelineState::Init {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline has already run",
                format!("pipeline is in state {}", self.state)
            );
        }

        info!(
            batch_token = %self.report.batch_token,
            source = S::name(),
            destination = D::name(),
            batch_size = self.config.batch.max_size,
            prefetch = self.config.batch.max_prefetch,
            "starting extraction run"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let run_timeout = self.config.run_timeout();

        let result = {
            let execution = self.execute();
            let bounded = async {
                match run_timeout {
                    Some(limit) => tokio::time::timeout(limit, execution)
                        .await
                        .unwrap_or_else(|_| Err(deadline_exceeded(limit))),
                    None => execution.await,
                }
            };

            tokio::select! {
                biased;

                _ = shutdown_rx.wait() => Err(etl_error!(
                    ErrorKind::RunCanceled,
                    "Extraction run was canceled",
                    "shutdown was requested before the run completed"
                )),
                result = bounded => result,
            }
        };

        let result = match (result, self.release().await) {
            (Ok(()), Ok(())) => Ok(self.report.clone()),
            (Ok(()), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => Err(vec![err, release_err].into()),
        };

        match &result {
            Ok(report) => {
                transition(&mut self.state, PipelineState::Complete);
                info!(
                    batch_token = %report.batch_token,
                    watermark = %report.watermark,
                    chunks = report.chunks,
                    inserted = report.inserted,
                    skipped = report.skipped,
                    next_watermark = %report.next_watermark(),
                    "extraction run completed"
                );
            }
            Err(err) => {
                transition(&mut self.state, PipelineState::Failed);
                error!(
                    batch_token = %self.report.batch_token,
                    chunks = self.report.chunks,
                    inserted = self.report.inserted,
                    skipped = self.report.skipped,
                    error_class = %err.class(),
                    error = %err,
                    "extraction run failed"
                );
            }
        }

        result
    }

    async fn execute(&mut self) -> EtlResult<()> {
        let Self {
            config,
            source,
            destination,
            state,
            report,
            ..
        } = self;

        source.connect().await?;
        destination.connect().await?;
        transition(state, PipelineState::Connected);

        let watermark = WatermarkResolver::new(&*destination).resolve().await?;
        report.watermark = watermark;
        transition(state, PipelineState::WatermarkResolved);

        etl_fail_point(RUN_PIPELINE__AFTER_WATERMARK)?;

        let records = source.stream(watermark).await?;
        let chunks = ChunkStream::wrap(records, config.batch.max_size, report.batch_token);
        transition(state, PipelineState::Streaming);

        let mut loader = ChunkLoader {
            destination: &*destination,
            guard: OrderingGuard::new(watermark),
            state,
            report,
        };

        if config.batch.is_pipelined() {
            load_pipelined(chunks, config.batch.max_prefetch, &mut loader).await
        } else {
            load_sequential(chunks, &mut loader).await
        }
    }

    async fn release(&mut self) -> EtlResult<()> {
        let mut errors = vec![];

        if let Err(err) = self.source.close().await {
            errors.push(err);
        }
        if let Err(err) = self.destination.shutdown().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        debug!("extraction run resources released");

        Ok(())
    }
}

/// Writes chunks in order and keeps the run state and report current.
struct ChunkLoader<'a, D> {
    destination: &'a D,
    guard: OrderingGuard,
    state: &'a mut PipelineState,
    report: &'a mut RunReport,
}

impl<D> ChunkLoader<'_, D>
where
    D: Destination,
{
    async fn load(&mut self, chunk: Chunk) -> EtlResult<()> {
        self.guard.check(&chunk)?;

        transition(self.state, PipelineState::Writing);

        let summary = match self.destination.write_chunk(&chunk).await {
            Ok(summary) => summary,
            Err(err) => {
                self.warn_on_tie_split(&chunk);
                return Err(err);
            }
        };

        self.report.record_commit(&chunk, summary);

        info!(
            chunk = chunk.ordinal(),
            rows = chunk.len(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            max_modified_ts = ?chunk.max_modified_ts(),
            "chunk committed"
        );
        if summary.skipped > 0 {
            warn!(
                chunk = chunk.ordinal(),
                skipped = summary.skipped,
                "skipped duplicate rows already present in the destination"
            );
        }

        etl_fail_point(RUN_PIPELINE__AFTER_CHUNK_WRITE)?;

        transition(self.state, PipelineState::Streaming);

        Ok(())
    }

    fn warn_on_tie_split(&mut self, chunk: &Chunk) {
        let Some(first) = chunk.first_key() else {
            return;
        };

        if self.report.max_committed_ts == Some(first.modified_ts) {
            self.report.tie_split_ts = Some(first.modified_ts);
            warn!(
                chunk = chunk.ordinal(),
                modified_ts = %first.modified_ts,
                "failed chunk shares its first timestamp with the last committed chunk, \
                 rows with that timestamp may be skipped by the next run"
            );
        }
    }
}

async fn load_sequential<C, D>(chunks: C, loader: &mut ChunkLoader<'_, D>) -> EtlResult<()>
where
    C: futures::Stream<Item = EtlResult<Chunk>>,
    D: Destination,
{
    let mut chunks = pin!(chunks);

    while let Some(chunk) = chunks.next().await {
        loader.load(chunk?).await?;
    }

    Ok(())
}

/// Reads up to `prefetch` chunks ahead while the previous one is being written.
///
/// Chunks are written in the order they were read. A source error is delivered after every
/// chunk read before it.
async fn load_pipelined<C, D>(
    chunks: C,
    prefetch: usize,
    loader: &mut ChunkLoader<'_, D>,
) -> EtlResult<()>
where
    C: futures::Stream<Item = EtlResult<Chunk>>,
    D: Destination,
{
    let (tx, mut rx) = mpsc::channel::<EtlResult<Chunk>>(prefetch.max(1));

    let producer = async move {
        let mut chunks = pin!(chunks);

        while let Some(item) = chunks.next().await {
            let failed = item.is_err();

            // The consumer stopped, nothing left to read for.
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    };

    let consumer = async move {
        while let Some(item) = rx.recv().await {
            loader.load(item?).await?;
        }

        Ok::<(), EtlError>(())
    };

    let ((), result) = tokio::join!(producer, consumer);

    result
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    if state.is_chunk_loop() && next.is_chunk_loop() {
        debug!(from = %state, to = %next, "pipeline state transition");
    } else {
        info!(from = %state, to = %next, "pipeline state transition");
    }

    *state = next;
}

fn deadline_exceeded(limit: Duration) -> EtlError {
    etl_error!(
        ErrorKind::RunDeadlineExceeded,
        "Extraction run exceeded its deadline",
        format!("run did not complete within {}s", limit.as_secs())
    )
}
