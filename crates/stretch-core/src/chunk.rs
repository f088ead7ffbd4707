//! The chunk table data model (spec §3).

use crate::Sample;

/// Lifecycle state of a single chunk's conversion (spec §3, I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    #[default]
    Pending,
    Queued,
    Converting,
    Ready,
    Evicted,
    Failed,
}

/// One partition of the source buffer, with overlap regions on either side
/// for cross-fading against its neighbours once converted (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub index: usize,
    pub input_start_sample: usize,
    pub input_end_sample: usize,
    pub overlap_before: usize,
    pub overlap_after: usize,
    pub state: ChunkState,
    /// Per-channel converted output. `Some` iff `state == Ready` (invariant
    /// I2); cleared on evict, tempo change, or dispose.
    pub output_buffer: Option<Vec<Vec<Sample>>>,
    pub output_length: usize,
    pub priority: f64,
    pub retry_count: u32,
}

impl Chunk {
    pub fn nominal_input_len(&self) -> usize {
        self.input_end_sample.saturating_sub(self.input_start_sample)
    }

    /// Nominal (non-overlap) range this chunk owns exclusively — used to
    /// verify invariant I1 (tiling without gap or double-cover).
    pub fn nominal_range(&self) -> (usize, usize) {
        (
            self.input_start_sample + self.overlap_before,
            self.input_end_sample - self.overlap_after,
        )
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChunkState::Ready
    }

    /// Mark this chunk ready with freshly converted output (I2).
    pub fn set_ready(&mut self, output: Vec<Vec<Sample>>, length: usize) {
        self.output_length = length;
        self.output_buffer = Some(output);
        self.state = ChunkState::Ready;
    }

    /// Evict this chunk's output, freeing the backing allocation (I2).
    pub fn evict(&mut self) {
        self.output_buffer = None;
        self.output_length = 0;
        self.state = ChunkState::Evicted;
    }

    /// Reset to `pending` for re-conversion (seek re-entry, tempo change).
    pub fn reset_to_pending(&mut self) {
        self.output_buffer = None;
        self.output_length = 0;
        self.state = ChunkState::Pending;
        self.retry_count = 0;
    }
}

/// Ordered sequence of chunks covering `[0, total_samples)`.
#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
}

impl ChunkTable {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self { chunks: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.chunks.iter_mut()
    }

    pub fn ready_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_ready()).count()
    }

    pub fn converting_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Converting)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Failed)
            .count()
    }

    /// Chunk covering a given source sample, clamped to the last chunk past
    /// the end of the source (spec §4.2).
    pub fn chunk_at_sample(&self, sample: usize) -> Option<usize> {
        if self.chunks.is_empty() {
            return None;
        }
        for chunk in &self.chunks {
            let (start, end) = chunk.nominal_range();
            if sample >= start && sample < end {
                return Some(chunk.index);
            }
        }
        Some(self.chunks.len() - 1)
    }

    /// Chunk covering a given time in seconds.
    pub fn chunk_at_time(&self, time_sec: f64, sample_rate: u32) -> Option<usize> {
        let sample = (time_sec * sample_rate as f64).max(0.0) as usize;
        self.chunk_at_sample(sample)
    }

    /// Verify invariant I1: consecutive chunks tile the source without gap
    /// or double-cover. Exposed for tests and debug assertions, not used on
    /// the hot path.
    pub fn verify_tiling(&self) -> bool {
        for pair in self.chunks.windows(2) {
            let (_, current_end) = pair[0].nominal_range();
            let (next_start, _) = pair[1].nominal_range();
            if current_end != next_start {
                return false;
            }
        }
        true
    }
}
