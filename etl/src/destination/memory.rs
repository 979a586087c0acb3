use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::{Destination, WriteSummary, tally_outcomes};
use crate::error::{ErrorKind, EtlResult};
use crate::types::{BatchToken, Cell, Chunk, RecordKey, SourceRecord};

/// A row as stored by [`MemoryDestination`], with its ingestion metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: RecordKey,
    pub values: Vec<Cell>,
    pub load_ts: DateTime<Utc>,
    pub source_file: String,
    pub batch_token: BatchToken,
}

#[derive(Debug, Default)]
struct Faults {
    fail_connect: bool,
    fail_watermark: bool,
    fail_at_write: Option<u64>,
    fail_after_rows: Option<usize>,
    write_delay: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    rows: BTreeMap<RecordKey, StoredRow>,
    provisioned: bool,
    provision_on_connect: bool,
    connected: bool,
    connects: usize,
    shutdowns: usize,
    write_calls: u64,
    committed_chunks: u64,
    faults: Faults,
}

/// In-memory destination for tests and local development.
///
/// [`MemoryDestination`] applies the same rules as a real destination: rows are keyed by
/// (`modified_ts`, `identifier`), duplicates are skipped, and a chunk is either committed as a
/// whole or not at all. Faults can be injected to exercise failure paths of a run.
///
/// Clones share the same storage, so a test can keep a handle to inspect what a pipeline
/// wrote.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    source_file: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates an empty, provisioned destination.
    pub fn new(source_file: impl Into<String>) -> Self {
        let inner = Inner {
            rows: BTreeMap::new(),
            provisioned: true,
            provision_on_connect: false,
            connected: false,
            connects: 0,
            shutdowns: 0,
            write_calls: 0,
            committed_chunks: 0,
            faults: Faults::default(),
        };

        Self {
            source_file: source_file.into(),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Creates a destination whose target table does not exist yet.
    pub fn unprovisioned(source_file: impl Into<String>) -> Self {
        let destination = Self::new(source_file);
        destination.update(|inner| inner.provisioned = false);

        destination
    }

    /// Creates the target table on connect when it is missing.
    pub fn with_provisioning(self) -> Self {
        self.update(|inner| inner.provision_on_connect = true);
        self
    }

    /// Makes [`Destination::connect`] fail with [`ErrorKind::DestinationConnectionFailed`].
    pub fn with_connect_failure(self) -> Self {
        self.update(|inner| inner.faults.fail_connect = true);
        self
    }

    /// Makes [`Destination::max_modified_ts`] fail with [`ErrorKind::DestinationQueryFailed`].
    pub fn with_watermark_failure(self) -> Self {
        self.update(|inner| inner.faults.fail_watermark = true);
        self
    }

    /// Makes the `n`-th call to [`Destination::write_chunk`] fail (1-based).
    pub fn with_write_failure_at(self, n: u64) -> Self {
        self.update(|inner| inner.faults.fail_at_write = Some(n));
        self
    }

    /// Makes the write that would commit more than `rows` rows in total fail.
    pub fn with_write_failure_after_rows(self, rows: usize) -> Self {
        self.update(|inner| inner.faults.fail_after_rows = Some(rows));
        self
    }

    /// Delays every write before it commits.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.update(|inner| inner.faults.write_delay = Some(delay));
        self
    }

    /// Clears all injected faults, keeping the stored rows.
    pub async fn clear_faults(&self) {
        let mut inner = self.inner.lock().await;
        inner.faults = Faults::default();
    }

    /// Stores `records` as if they had been committed by an earlier run.
    pub async fn seed(&self, records: &[SourceRecord], batch_token: BatchToken) {
        let mut inner = self.inner.lock().await;
        let load_ts = Utc::now();
        for record in records {
            inner
                .rows
                .entry(record.key().clone())
                .or_insert_with(|| StoredRow {
                    key: record.key().clone(),
                    values: record.values().to_vec(),
                    load_ts,
                    source_file: self.source_file.clone(),
                    batch_token,
                });
        }
        inner.provisioned = true;
    }

    /// Returns all stored rows ordered by key.
    pub async fn rows(&self) -> Vec<StoredRow> {
        let inner = self.inner.lock().await;
        inner.rows.values().cloned().collect()
    }

    pub async fn keys(&self) -> Vec<RecordKey> {
        let inner = self.inner.lock().await;
        inner.rows.keys().cloned().collect()
    }

    pub async fn row_count(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_provisioned(&self) -> bool {
        self.inner.lock().await.provisioned
    }

    pub async fn connect_count(&self) -> usize {
        self.inner.lock().await.connects
    }

    pub async fn shutdown_count(&self) -> usize {
        self.inner.lock().await.shutdowns
    }

    pub async fn write_calls(&self) -> u64 {
        self.inner.lock().await.write_calls
    }

    pub async fn committed_chunks(&self) -> u64 {
        self.inner.lock().await.committed_chunks
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    // Builder helpers run before the destination is shared, so the lock is always free.
    fn update(&self, f: impl FnOnce(&mut Inner)) {
        if let Ok(mut inner) = self.inner.try_lock() {
            f(&mut inner);
        }
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.connects += 1;

        if inner.faults.fail_connect {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Failed to connect to the destination",
                "connection refused by memory destination"
            );
        }

        if !inner.provisioned && inner.provision_on_connect {
            info!("provisioning memory destination table");
            inner.provisioned = true;
        }

        inner.connected = true;

        Ok(())
    }

    async fn max_modified_ts(&self) -> EtlResult<Option<NaiveDateTime>> {
        let inner = self.inner.lock().await;

        if inner.faults.fail_watermark {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Destination query failed",
                "permission denied for memory destination table"
            );
        }

        if !inner.provisioned {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                "memory destination table was never provisioned"
            );
        }

        Ok(inner.rows.keys().map(|key| key.modified_ts).max())
    }

    async fn write_chunk(&self, chunk: &Chunk) -> EtlResult<WriteSummary> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.write_calls += 1;
            inner.faults.write_delay
        };

        // A write cancelled while sleeping has staged nothing, which is a rollback.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;

        if !inner.provisioned {
            bail!(
                ErrorKind::DestinationWriteFailed,
                "Failed to write chunk",
                "memory destination table was never provisioned"
            );
        }

        if inner.faults.fail_at_write == Some(inner.write_calls) {
            bail!(
                ErrorKind::DestinationWriteFailed,
                "Failed to write chunk",
                format!("injected failure on write {}", inner.write_calls)
            );
        }

        let mut staged: BTreeMap<RecordKey, StoredRow> = BTreeMap::new();
        let mut written = Vec::new();
        let load_ts = Utc::now();
        for record in chunk.records() {
            if inner.rows.contains_key(record.key()) || staged.contains_key(record.key()) {
                continue;
            }

            staged.insert(
                record.key().clone(),
                StoredRow {
                    key: record.key().clone(),
                    values: record.values().to_vec(),
                    load_ts,
                    source_file: self.source_file.clone(),
                    batch_token: chunk.batch_token(),
                },
            );
            written.push(record.key().clone());
        }

        if let Some(limit) = inner.faults.fail_after_rows
            && inner.rows.len() + staged.len() > limit
        {
            bail!(
                ErrorKind::DestinationWriteFailed,
                "Failed to write chunk",
                format!("injected failure after {limit} rows")
            );
        }

        let outcomes = tally_outcomes(chunk.keys(), written);
        inner.rows.append(&mut staged);
        inner.committed_chunks += 1;

        Ok(WriteSummary::from_outcomes(&outcomes))
    }

    async fn shutdown(&mut self) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.connected {
            inner.connected = false;
            inner.shutdowns += 1;
        }

        Ok(())
    }
}
