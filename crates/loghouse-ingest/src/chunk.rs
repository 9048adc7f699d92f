//! Per-Kind Chunk Buffering
//!
//! Events accumulate in memory per kind and flush to a partition file when
//! either the row threshold or the approximate byte threshold is reached.
//! Hitting a threshold exactly triggers a flush; the next event starts the
//! next chunk. A final partial chunk is flushed at end of input.

use loghouse_core::event::{EventKind, NormalizedEvent};
use loghouse_core::Error as CoreError;

use crate::error::IngestResult;

/// Why a buffer wants flushing after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSignal {
    None,
    RowLimit,
    ByteLimit,
}

/// Row buffer for one event kind.
pub struct ChunkBuffer {
    kind: EventKind,
    events: Vec<NormalizedEvent>,
    approx_bytes: usize,
    max_rows: usize,
    max_bytes: usize,
}

impl ChunkBuffer {
    pub fn new(kind: EventKind, max_rows: usize, max_bytes: usize) -> Self {
        ChunkBuffer {
            kind,
            events: Vec::new(),
            approx_bytes: 0,
            max_rows,
            max_bytes,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn rows(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event of the buffer's kind and report whether a flush is
    /// due.
    pub fn append(&mut self, event: NormalizedEvent) -> IngestResult<FlushSignal> {
        if event.kind() != self.kind {
            return Err(CoreError::KindMismatch {
                expected: self.kind.dir_name().to_string(),
                actual: event.kind().dir_name().to_string(),
            }
            .into());
        }
        self.approx_bytes += event.estimated_size();
        self.events.push(event);

        if self.events.len() >= self.max_rows {
            Ok(FlushSignal::RowLimit)
        } else if self.approx_bytes >= self.max_bytes {
            Ok(FlushSignal::ByteLimit)
        } else {
            Ok(FlushSignal::None)
        }
    }

    /// Drain the buffered events, resetting the buffer for the next chunk.
    pub fn take_chunk(&mut self) -> Vec<NormalizedEvent> {
        self.approx_bytes = 0;
        std::mem::take(&mut self.events)
    }
}
