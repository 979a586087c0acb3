use core::pin::Pin;
use core::task::{Context, Poll};
use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tracing::debug;

use crate::error::EtlResult;
use crate::types::{BatchToken, Chunk, SourceRecord};

/// Upper bound on the records reserved up front for a chunk. Larger chunks grow on demand.
const MAX_RESERVED_RECORDS: usize = 1024;

pin_project! {
    /// A stream adapter that groups records into [`Chunk`]s of at most `chunk_size` rows.
    ///
    /// Chunks are numbered from 1 in the order they are emitted and carry the run's batch
    /// token. N records produce exactly ceil(N / `chunk_size`) chunks.
    ///
    /// When the inner stream yields an error, the partially filled chunk is dropped, the error
    /// is emitted once and the stream ends. Chunks emitted before the error stay valid.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct ChunkStream<S> {
        #[pin]
        stream: S,
        records: Vec<SourceRecord>,
        chunk_size: usize,
        batch_token: BatchToken,
        next_ordinal: u64,
        ended: bool,
    }
}

impl<S> ChunkStream<S>
where
    S: Stream<Item = EtlResult<SourceRecord>>,
{
    /// Creates a new [`ChunkStream`]. A `chunk_size` of zero is treated as one.
    pub fn wrap(stream: S, chunk_size: usize, batch_token: BatchToken) -> Self {
        let chunk_size = chunk_size.max(1);

        ChunkStream {
            stream,
            records: Vec::with_capacity(chunk_size.min(MAX_RESERVED_RECORDS)),
            chunk_size,
            batch_token,
            next_ordinal: 1,
            ended: false,
        }
    }
}

impl<S> Stream for ChunkStream<S>
where
    S: Stream<Item = EtlResult<SourceRecord>>,
{
    type Item = EtlResult<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.ended {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(record)) => {
                    if this.records.is_empty() {
                        this.records
                            .reserve((*this.chunk_size).min(MAX_RESERVED_RECORDS));
                    }

                    this.records.push(record);

                    if this.records.len() >= *this.chunk_size {
                        let records = std::mem::take(this.records);
                        return Poll::Ready(Some(Ok(next_chunk(
                            this.next_ordinal,
                            *this.batch_token,
                            records,
                        ))));
                    }
                }
                Some(Err(err)) => {
                    if !this.records.is_empty() {
                        debug!(
                            discarded_records = this.records.len(),
                            "source failed, discarding partially filled chunk"
                        );
                        this.records.clear();
                    }

                    *this.ended = true;

                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    *this.ended = true;

                    if this.records.is_empty() {
                        return Poll::Ready(None);
                    }

                    let records = std::mem::take(this.records);
                    return Poll::Ready(Some(Ok(next_chunk(
                        this.next_ordinal,
                        *this.batch_token,
                        records,
                    ))));
                }
            }
        }
    }
}

fn next_chunk(ordinal: &mut u64, batch_token: BatchToken, records: Vec<SourceRecord>) -> Chunk {
    let chunk = Chunk::new(*ordinal, batch_token, records);
    *ordinal += 1;

    chunk
}
