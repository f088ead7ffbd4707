//! stretch-worker: the `ConversionProcessor` interface and its two
//! implementations — a real off-thread pool (`WorkerPool`) and a
//! synchronous fallback (`MainThreadProcessor`) for hosts that cannot spawn
//! threads. The `Conversion Scheduler` (spec §4.4) is generic over either.

mod main_thread;
mod pool;

pub use main_thread::MainThreadProcessor;
pub use pool::WorkerPool;

use std::time::Instant;

use stretch_core::Sample;

/// A response from a conversion processor, delivered to the scheduler via
/// the injected callbacks (spec §4.3).
#[derive(Debug, Clone)]
pub enum ProcessorResponse {
    Result {
        chunk_index: usize,
        channels: Vec<Vec<Sample>>,
        output_length: usize,
    },
    Cancelled {
        chunk_index: usize,
    },
    Error {
        chunk_index: usize,
        message: String,
    },
}

/// Shared interface implemented by both the off-thread worker pool and the
/// main-thread fallback processor (spec §4.4, §9 "Main-thread processor").
pub trait ConversionProcessor: Send + Sync {
    /// Assign a conversion to any free slot. Returns `false` if there was no
    /// free slot, the processor has been terminated, or the request was
    /// deferred pending an unacknowledged cancel for the same chunk.
    fn post_convert(
        &self,
        chunk_index: usize,
        channels: Vec<Vec<Sample>>,
        tempo: f64,
        sample_rate: u32,
    ) -> bool;

    /// Best-effort cancellation hint for a specific chunk.
    fn cancel_chunk(&self, chunk_index: usize);

    /// Best-effort cancellation hint for whatever is currently in flight.
    fn cancel_current(&self);

    /// True if any slot is currently converting.
    fn is_busy(&self) -> bool;

    /// True if at least one slot is free to accept work.
    fn has_capacity(&self) -> bool;

    /// Chunk index currently in flight, if any (spec §4.3
    /// `getCurrentChunkIndex`). For a multi-slot pool this is whichever
    /// in-flight chunk was dispatched first.
    fn current_chunk_index(&self) -> Option<usize>;

    /// Timestamp of the most recently dispatched conversion still in
    /// flight, across all slots (spec §4.3 `getLastPostTime`).
    fn last_post_time(&self) -> Option<Instant>;

    /// Timestamp at which `chunk_index` was dispatched, if it is currently
    /// in flight (spec §4.3 `getPostTimeForChunk`).
    fn post_time_for_chunk(&self, chunk_index: usize) -> Option<Instant>;

    /// Drain any completed responses and invoke the registered callbacks.
    /// Called once per cooperative tick from the main thread (spec §5).
    fn poll(&self);

    /// Idempotently release all resources; further operations are no-ops.
    fn terminate(&self);
}
