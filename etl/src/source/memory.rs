use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::schema::TableSchema;
use crate::source::{RecordStream, Source};
use crate::types::{SourceRecord, Watermark};

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
    connected: AtomicBool,
}

/// In-memory source for tests and local development.
///
/// [`MemorySource`] holds its records in memory and honours the same contract as a real
/// source: only records past the watermark are yielded, in (`modified_ts`, `identifier`)
/// order. Faults can be injected to exercise failure paths of a run.
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: TableSchema,
    records: Vec<SourceRecord>,
    fail_connect: bool,
    fail_after: Option<usize>,
    preserve_order: bool,
    counters: Arc<Counters>,
}

impl MemorySource {
    /// Creates a source serving `records`.
    pub fn new(schema: TableSchema, records: Vec<SourceRecord>) -> Self {
        Self {
            schema,
            records,
            fail_connect: false,
            fail_after: None,
            preserve_order: false,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Makes [`Source::connect`] fail with [`ErrorKind::SourceConnectionFailed`].
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Makes the record stream fail with [`ErrorKind::SourceQueryFailed`] after `rows` rows.
    pub fn with_failure_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    /// Yields records in insertion order instead of sorting them.
    ///
    /// Used to simulate a source that breaks the ordering contract.
    pub fn with_unsorted_output(mut self) -> Self {
        self.preserve_order = true;
        self
    }

    /// Replaces the served records, keeping counters and injected faults.
    pub fn set_records(&mut self, records: Vec<SourceRecord>) {
        self.records = records;
    }

    pub fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.counters.connected.load(Ordering::SeqCst)
    }
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Failed to connect to the source",
                "connection refused by memory source"
            );
        }

        self.counters.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn stream(&mut self, watermark: Watermark) -> EtlResult<RecordStream<'_>> {
        if !self.is_connected() {
            bail!(
                ErrorKind::InvalidState,
                "Source is not connected",
                "connect must be called before streaming"
            );
        }

        let mut records: Vec<SourceRecord> = self
            .records
            .iter()
            .filter(|record| watermark.admits(record.modified_ts()))
            .cloned()
            .collect();
        if !self.preserve_order {
            records.sort_by(|a, b| a.key().cmp(b.key()));
        }

        info!(
            watermark = %watermark,
            rows = records.len(),
            "memory source streaming records"
        );

        let mut items: Vec<EtlResult<SourceRecord>> = records.into_iter().map(Ok).collect();
        if let Some(rows) = self.fail_after
            && rows <= items.len()
        {
            items.truncate(rows);
            items.push(Err(etl_error!(
                ErrorKind::SourceQueryFailed,
                "Source stream failed",
                format!("memory source failed after {rows} rows")
            )));
        }

        Ok(futures::stream::iter(items).boxed())
    }

    async fn close(&mut self) -> EtlResult<()> {
        if self.counters.connected.swap(false, Ordering::SeqCst) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }
}
