//! The Conversion Scheduler (spec §4.4): owns the chunk table and a
//! min-heap priority queue over one Worker Manager (or main-thread
//! fallback), both satisfying `ConversionProcessor`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use stretch_core::{ChunkState, ChunkTable, SourceBuffer, MAX_CHUNK_RETRIES};
use stretch_worker::ConversionProcessor;

use crate::cache::{ChunkSnapshot, TempoCache};
use crate::error::{SchedulerError, SchedulerResult};
use crate::mailbox::{ProcessorEvent, ProcessorMailbox};

const TEMPO_EQUALITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub keep_ahead_chunks: usize,
    pub keep_behind_chunks: usize,
    pub cancel_distance_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            keep_ahead_chunks: 5,
            keep_behind_chunks: 3,
            cancel_distance_threshold: 2,
        }
    }
}

/// Float priority wrapped for `BinaryHeap`, which requires `Ord`. Priorities
/// are always either a small non-negative integer distance or `+inf`
/// (chunks outside the active window are never pushed), so `total_cmp` never
/// has to reconcile NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapKey(f64);

impl Eq for HeapKey {}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

type OnChunkReady = Box<dyn FnMut(usize)>;
type OnChunkFailed = Box<dyn FnMut(usize, String)>;

pub struct ConversionScheduler<P: ConversionProcessor> {
    chunks: ChunkTable,
    heap: BinaryHeap<std::cmp::Reverse<(HeapKey, usize)>>,
    processor: Arc<P>,
    mailbox: Arc<ProcessorMailbox>,
    config: SchedulerConfig,
    playhead: usize,
    tempo: f64,
    previous_tempo_cache: Option<TempoCache>,
    disposed: bool,
    all_dead: bool,
    on_chunk_ready: OnChunkReady,
    on_chunk_failed: OnChunkFailed,
}

impl<P: ConversionProcessor> ConversionScheduler<P> {
    pub fn new(
        chunks: ChunkTable,
        initial_tempo: f64,
        processor: Arc<P>,
        mailbox: Arc<ProcessorMailbox>,
        config: SchedulerConfig,
        on_chunk_ready: impl FnMut(usize) + 'static,
        on_chunk_failed: impl FnMut(usize, String) + 'static,
    ) -> Self {
        Self {
            chunks,
            heap: BinaryHeap::new(),
            processor,
            mailbox,
            config,
            playhead: 0,
            tempo: initial_tempo,
            previous_tempo_cache: None,
            disposed: false,
            all_dead: false,
            on_chunk_ready: Box::new(on_chunk_ready),
            on_chunk_failed: Box::new(on_chunk_failed),
        }
    }

    pub fn chunk_table(&self) -> &ChunkTable {
        &self.chunks
    }

    /// Look up a single chunk, for hosts that want status without pulling
    /// the whole table.
    pub fn chunk(&self, index: usize) -> SchedulerResult<&stretch_core::Chunk> {
        self.chunks
            .get(index)
            .ok_or(SchedulerError::ChunkOutOfRange(index))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn current_tempo(&self) -> f64 {
        self.tempo
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn has_previous_tempo_cache(&self) -> bool {
        self.previous_tempo_cache.is_some()
    }

    /// True once the processor has reported every slot dead (spec §6 error
    /// taxonomy "worker-unavailable"). Sticky: a dead pool never recovers.
    pub fn is_worker_unavailable(&self) -> bool {
        self.all_dead
    }

    /// Start the scheduler against the playhead's starting chunk and fill
    /// every free worker slot.
    pub fn start(&mut self, playhead_chunk: usize, source: &SourceBuffer) {
        if self.disposed {
            return;
        }
        self.set_playhead(playhead_chunk);
        self.fill_capacity(source);
    }

    /// Drain the processor's response mailbox and react to each event in
    /// arrival order, then let `poll()` on the processor itself run (so an
    /// off-thread pool can drain its channel).
    pub fn poll(&mut self, source: &SourceBuffer) {
        self.processor.poll();
        if self.disposed {
            return;
        }
        for event in self.mailbox.drain() {
            if self.disposed {
                break;
            }
            match event {
                ProcessorEvent::Result {
                    chunk_index,
                    channels,
                    output_length,
                } => self.handle_result(chunk_index, channels, output_length, source),
                ProcessorEvent::Cancelled { chunk_index } => {
                    self.handle_cancelled(chunk_index, source)
                }
                ProcessorEvent::Error {
                    chunk_index,
                    message,
                } => self.handle_error(chunk_index, message, source),
                ProcessorEvent::AllDead => {
                    log::error!("stretch-scheduler: all worker slots are dead");
                    self.all_dead = true;
                }
            }
        }
    }

    fn handle_result(
        &mut self,
        chunk_index: usize,
        channels: Vec<Vec<stretch_core::Sample>>,
        output_length: usize,
        source: &SourceBuffer,
    ) {
        let Some(chunk) = self.chunks.get_mut(chunk_index) else {
            return;
        };
        if chunk.state != ChunkState::Converting {
            log::debug!("stretch-scheduler: stale result for chunk {chunk_index}, discarding");
            return;
        }
        chunk.set_ready(channels, output_length);
        (self.on_chunk_ready)(chunk_index);
        self.dispatch_one(source);
    }

    fn handle_cancelled(&mut self, chunk_index: usize, source: &SourceBuffer) {
        if let Some(chunk) = self.chunks.get_mut(chunk_index) {
            if chunk.state == ChunkState::Converting {
                chunk.state = ChunkState::Pending;
                if let Some(distance) = self.window_distance(chunk_index) {
                    self.heap
                        .push(std::cmp::Reverse((HeapKey(distance as f64), chunk_index)));
                }
            }
        }
        self.dispatch_one(source);
    }

    fn handle_error(&mut self, chunk_index: usize, message: String, source: &SourceBuffer) {
        let Some(chunk) = self.chunks.get_mut(chunk_index) else {
            return;
        };
        chunk.retry_count += 1;
        if chunk.retry_count < MAX_CHUNK_RETRIES {
            chunk.state = ChunkState::Pending;
            if let Some(distance) = self.window_distance(chunk_index) {
                self.heap
                    .push(std::cmp::Reverse((HeapKey(distance as f64), chunk_index)));
            }
            self.dispatch_one(source);
        } else {
            chunk.state = ChunkState::Failed;
            (self.on_chunk_failed)(chunk_index, message);
        }
    }

    pub fn handle_seek(&mut self, new_chunk_idx: usize, source: &SourceBuffer) {
        if self.disposed {
            return;
        }
        self.set_playhead(new_chunk_idx);

        let threshold = self.config.cancel_distance_threshold as i64;
        let playhead = self.playhead as i64;
        let to_cancel: Vec<usize> = self
            .chunks
            .iter()
            .filter(|c| c.state == ChunkState::Converting)
            .filter(|c| (c.index as i64 - playhead).abs() > threshold)
            .map(|c| c.index)
            .collect();
        for idx in to_cancel {
            self.processor.cancel_chunk(idx);
        }

        self.fill_capacity(source);
    }

    pub fn handle_tempo_change(&mut self, new_tempo: f64, source: &SourceBuffer) {
        if self.disposed {
            return;
        }

        let mut snapshot = HashMap::new();
        for chunk in self.chunks.iter() {
            if chunk.is_ready() {
                if let Some(buffer) = &chunk.output_buffer {
                    snapshot.insert(
                        chunk.index,
                        ChunkSnapshot {
                            output_buffer: buffer.clone(),
                            output_length: chunk.output_length,
                        },
                    );
                }
            }
        }
        self.previous_tempo_cache = Some(TempoCache::new(self.tempo, snapshot));

        self.processor.cancel_current();

        let playhead = self.playhead as i64;
        let keep_behind = self.config.keep_behind_chunks as i64;
        let keep_ahead = self.config.keep_ahead_chunks as i64;
        for chunk in self.chunks.iter_mut() {
            let diff = chunk.index as i64 - playhead;
            let in_window = diff >= -keep_behind && diff <= keep_ahead;
            if in_window {
                chunk.reset_to_pending();
            } else if chunk.state != ChunkState::Evicted {
                chunk.evict();
            }
        }

        self.tempo = new_tempo;
        self.recompute_priorities();
        self.fill_capacity(source);
    }

    /// Restore the previous-tempo cache if it matches the current tempo
    /// (spec §4.4 "restorePreviousTempo"). Leaves the cache untouched (and
    /// returns `false`) if it does not match, so a later matching call can
    /// still succeed.
    pub fn restore_previous_tempo(&mut self) -> bool {
        let matches_current = self
            .previous_tempo_cache
            .as_ref()
            .map(|cache| (cache.tempo() - self.tempo).abs() < TEMPO_EQUALITY_EPSILON)
            .unwrap_or(false);
        if !matches_current {
            return false;
        }
        let cache = self.previous_tempo_cache.take().expect("checked above");
        for (chunk_index, snapshot) in cache.into_chunks() {
            if let Some(chunk) = self.chunks.get_mut(chunk_index) {
                chunk.set_ready(snapshot.output_buffer, snapshot.output_length);
            }
        }
        self.recompute_priorities();
        true
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.processor.cancel_current();
        self.heap.clear();
        self.previous_tempo_cache = None;
        self.chunks = ChunkTable::empty();
    }

    fn set_playhead(&mut self, new_playhead: usize) {
        self.playhead = new_playhead;
        self.requeue_reentering_window();
        self.evict_outside_window();
        self.recompute_priorities();
    }

    fn window_distance(&self, chunk_index: usize) -> Option<usize> {
        let diff = chunk_index as i64 - self.playhead as i64;
        let keep_behind = self.config.keep_behind_chunks as i64;
        let keep_ahead = self.config.keep_ahead_chunks as i64;
        if diff >= -keep_behind && diff <= keep_ahead {
            Some(diff.unsigned_abs() as usize)
        } else {
            None
        }
    }

    fn requeue_reentering_window(&mut self) {
        let playhead = self.playhead as i64;
        let keep_behind = self.config.keep_behind_chunks as i64;
        let keep_ahead = self.config.keep_ahead_chunks as i64;
        for chunk in self.chunks.iter_mut() {
            let diff = chunk.index as i64 - playhead;
            let in_window = diff >= -keep_behind && diff <= keep_ahead;
            if in_window && chunk.state == ChunkState::Evicted {
                chunk.reset_to_pending();
            }
        }
    }

    fn evict_outside_window(&mut self) {
        let playhead = self.playhead as i64;
        let keep_behind = self.config.keep_behind_chunks as i64;
        let keep_ahead = self.config.keep_ahead_chunks as i64;
        for chunk in self.chunks.iter_mut() {
            let diff = chunk.index as i64 - playhead;
            let in_window = diff >= -keep_behind && diff <= keep_ahead;
            // Converting chunks are left alone here: forcing them to
            // Evicted would race the worker still holding that input, and
            // I3 (one converting-per-slot) is the processor's job to
            // uphold, not the chunk table's. `handle_seek` cancels them
            // instead; the eventual cancel ack resolves their state.
            if !in_window && chunk.state != ChunkState::Evicted && chunk.state != ChunkState::Converting {
                chunk.evict();
            }
        }
    }

    fn recompute_priorities(&mut self) {
        self.heap.clear();
        let playhead = self.playhead as i64;
        let keep_behind = self.config.keep_behind_chunks as i64;
        let keep_ahead = self.config.keep_ahead_chunks as i64;
        for chunk in self.chunks.iter_mut() {
            let diff = chunk.index as i64 - playhead;
            let in_window = diff >= -keep_behind && diff <= keep_ahead;
            chunk.priority = if in_window {
                diff.unsigned_abs() as f64
            } else {
                f64::INFINITY
            };
            if in_window && matches!(chunk.state, ChunkState::Pending | ChunkState::Queued) {
                self.heap
                    .push(std::cmp::Reverse((HeapKey(chunk.priority), chunk.index)));
            }
        }
    }

    /// Pop the minimum-priority pending/queued chunk and post it for
    /// conversion if a slot is free. Returns `true` if a chunk was
    /// dispatched.
    pub fn dispatch_next(&mut self, source: &SourceBuffer) -> SchedulerResult<bool> {
        if self.disposed {
            return Err(SchedulerError::AlreadyDisposed);
        }
        Ok(self.dispatch_one(source))
    }

    fn dispatch_one(&mut self, source: &SourceBuffer) -> bool {
        if self.disposed || !self.processor.has_capacity() {
            return false;
        }
        while let Some(std::cmp::Reverse((key, idx))) = self.heap.pop() {
            let still_pending = self
                .chunks
                .get(idx)
                .map(|c| matches!(c.state, ChunkState::Pending | ChunkState::Queued))
                .unwrap_or(false);
            if !still_pending {
                continue;
            }

            let (start, end) = {
                let chunk = self.chunks.get(idx).expect("checked above");
                (chunk.input_start_sample, chunk.input_end_sample)
            };
            let channels = source.extract_range(start, end);

            if let Some(chunk) = self.chunks.get_mut(idx) {
                chunk.state = ChunkState::Converting;
            }

            let posted = self
                .processor
                .post_convert(idx, channels, self.tempo, source.sample_rate());
            if posted {
                return true;
            }

            if let Some(chunk) = self.chunks.get_mut(idx) {
                chunk.state = ChunkState::Pending;
            }
            self.heap.push(std::cmp::Reverse((key, idx)));
            return false;
        }
        false
    }

    fn fill_capacity(&mut self, source: &SourceBuffer) {
        while self.processor.has_capacity() {
            if !self.dispatch_one(source) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use stretch_worker::ProcessorResponse;

    /// Single-slot fake processor. Tests drive completion by calling the
    /// `on_result`/`on_error` closures captured from the mailbox directly,
    /// then flip `free` to simulate the slot becoming available again —
    /// mirroring how `WorkerPool::free_slot_state` runs just before the
    /// callback fires.
    struct FakeProcessor {
        free: AtomicBool,
        posted: StdMutex<Vec<usize>>,
        cancelled: StdMutex<std::collections::HashSet<usize>>,
    }

    impl FakeProcessor {
        fn new() -> Self {
            Self {
                free: AtomicBool::new(true),
                posted: StdMutex::new(Vec::new()),
                cancelled: StdMutex::new(std::collections::HashSet::new()),
            }
        }
    }

    impl ConversionProcessor for FakeProcessor {
        fn post_convert(
            &self,
            chunk_index: usize,
            _channels: Vec<Vec<stretch_core::Sample>>,
            _tempo: f64,
            _sample_rate: u32,
        ) -> bool {
            if !self.free.swap(false, Ordering::AcqRel) {
                return false;
            }
            self.posted.lock().unwrap().push(chunk_index);
            true
        }

        fn cancel_chunk(&self, chunk_index: usize) {
            self.cancelled.lock().unwrap().insert(chunk_index);
        }

        fn cancel_current(&self) {}

        fn is_busy(&self) -> bool {
            !self.free.load(Ordering::Acquire)
        }

        fn has_capacity(&self) -> bool {
            self.free.load(Ordering::Acquire)
        }

        fn current_chunk_index(&self) -> Option<usize> {
            self.posted.lock().unwrap().last().copied()
        }

        fn last_post_time(&self) -> Option<std::time::Instant> {
            None
        }

        fn post_time_for_chunk(&self, _chunk_index: usize) -> Option<std::time::Instant> {
            None
        }

        fn poll(&self) {}

        fn terminate(&self) {}
    }

    fn make_source(total_samples: usize) -> SourceBuffer {
        SourceBuffer::new(vec![vec![0.0; total_samples]], 44100).unwrap()
    }

    fn make_table(chunk_count: usize, chunk_len: usize) -> ChunkTable {
        stretch_dsp::split(
            chunk_count * chunk_len,
            44100,
            chunk_len as f64 / 44100.0,
            0.0,
        )
    }

    fn make_scheduler(
        chunk_count: usize,
        chunk_len: usize,
        config: SchedulerConfig,
    ) -> (
        ConversionScheduler<FakeProcessor>,
        Arc<FakeProcessor>,
        Arc<ProcessorMailbox>,
        SourceBuffer,
        Arc<StdMutex<Vec<usize>>>,
        Arc<StdMutex<Vec<(usize, String)>>>,
    ) {
        let table = make_table(chunk_count, chunk_len);
        let source = make_source(chunk_count * chunk_len);
        let processor = Arc::new(FakeProcessor::new());
        let mailbox = ProcessorMailbox::new();

        let ready_log = Arc::new(StdMutex::new(Vec::new()));
        let failed_log = Arc::new(StdMutex::new(Vec::new()));
        let ready_log_inner = Arc::clone(&ready_log);
        let failed_log_inner = Arc::clone(&failed_log);

        let scheduler = ConversionScheduler::new(
            table,
            1.0,
            Arc::clone(&processor),
            Arc::clone(&mailbox),
            config,
            move |idx| ready_log_inner.lock().unwrap().push(idx),
            move |idx, msg| failed_log_inner.lock().unwrap().push((idx, msg)),
        );

        (scheduler, processor, mailbox, source, ready_log, failed_log)
    }

    #[test]
    fn start_dispatches_first_chunk() {
        let (mut scheduler, processor, _mailbox, source, _ready, _failed) =
            make_scheduler(4, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);
        assert_eq!(*processor.posted.lock().unwrap(), vec![0]);
        assert_eq!(
            scheduler.chunk_table().get(0).unwrap().state,
            ChunkState::Converting
        );
    }

    #[test]
    fn result_marks_ready_and_feeds_next_slot() {
        let (mut scheduler, processor, mailbox, source, ready_log, _failed) =
            make_scheduler(4, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);

        let (on_result, _on_error, _on_all_dead) = mailbox.callbacks();
        on_result(ProcessorResponse::Result {
            chunk_index: 0,
            channels: vec![vec![0.0; 4096]],
            output_length: 4096,
        });
        processor.free.store(true, Ordering::Release);

        scheduler.poll(&source);

        assert_eq!(*ready_log.lock().unwrap(), vec![0]);
        assert!(scheduler.chunk_table().get(0).unwrap().is_ready());
        // The freed slot should have been used for the next pending chunk.
        assert_eq!(*processor.posted.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn stale_result_after_tempo_change_is_discarded() {
        let (mut scheduler, _processor, mailbox, source, ready_log, _failed) =
            make_scheduler(4, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);
        assert_eq!(
            scheduler.chunk_table().get(0).unwrap().state,
            ChunkState::Converting
        );

        // Tempo change resets in-window chunks to pending; the original
        // in-flight conversion's result, once it eventually arrives, must
        // be discarded rather than mistakenly marking the chunk ready.
        scheduler.handle_tempo_change(2.0, &source);
        assert_eq!(
            scheduler.chunk_table().get(0).unwrap().state,
            ChunkState::Pending
        );

        let (on_result, _on_error, _on_all_dead) = mailbox.callbacks();
        on_result(ProcessorResponse::Result {
            chunk_index: 0,
            channels: vec![vec![0.0; 4096]],
            output_length: 4096,
        });
        scheduler.poll(&source);

        assert!(ready_log.lock().unwrap().is_empty());
        assert!(!scheduler.chunk_table().get(0).unwrap().is_ready());
    }

    #[test]
    fn error_retries_then_fails_after_cap() {
        let (mut scheduler, processor, mailbox, source, _ready, failed_log) =
            make_scheduler(2, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);

        let (_on_result, on_error, _on_all_dead) = mailbox.callbacks();
        for attempt in 0..stretch_core::MAX_CHUNK_RETRIES {
            processor.free.store(true, Ordering::Release);
            on_error(0, format!("boom {attempt}"));
            scheduler.poll(&source);
        }

        assert_eq!(
            scheduler.chunk_table().get(0).unwrap().state,
            ChunkState::Failed
        );
        assert_eq!(failed_log.lock().unwrap().len(), 1);
    }

    #[test]
    fn tempo_change_snapshots_ready_chunks_and_restores() {
        let (mut scheduler, processor, mailbox, source, _ready, _failed) =
            make_scheduler(2, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);

        let (on_result, _on_error, _on_all_dead) = mailbox.callbacks();
        on_result(ProcessorResponse::Result {
            chunk_index: 0,
            channels: vec![vec![1.0; 4096]],
            output_length: 4096,
        });
        processor.free.store(true, Ordering::Release);
        scheduler.poll(&source);
        assert!(scheduler.chunk_table().get(0).unwrap().is_ready());

        scheduler.handle_tempo_change(2.0, &source);
        assert!(!scheduler.chunk_table().get(0).unwrap().is_ready());
        assert!(scheduler.has_previous_tempo_cache());

        // Tempo not back to the cached value: restore must refuse.
        assert!(!scheduler.restore_previous_tempo());

        scheduler.tempo = 1.0;
        assert!(scheduler.restore_previous_tempo());
        assert!(scheduler.chunk_table().get(0).unwrap().is_ready());
        assert!(!scheduler.has_previous_tempo_cache());
    }

    #[test]
    fn seek_evicts_outside_window_and_requeues_reentry() {
        let config = SchedulerConfig {
            keep_ahead_chunks: 1,
            keep_behind_chunks: 1,
            cancel_distance_threshold: 0,
        };
        let (mut scheduler, _processor, _mailbox, source, _ready, _failed) =
            make_scheduler(6, 4096, config);
        scheduler.start(0, &source);
        // The single fake slot only ever took chunk 0; chunk 1 stays pending.
        assert_eq!(
            scheduler.chunk_table().get(1).unwrap().state,
            ChunkState::Pending
        );

        scheduler.handle_seek(4, &source);
        // Chunk 1 is now 3 away from the playhead, outside the window.
        assert_eq!(
            scheduler.chunk_table().get(1).unwrap().state,
            ChunkState::Evicted
        );

        scheduler.handle_seek(0, &source);
        // Chunk 1 re-enters the window and must be requeued, not left evicted.
        assert_eq!(
            scheduler.chunk_table().get(1).unwrap().state,
            ChunkState::Pending
        );
    }

    #[test]
    fn all_dead_event_marks_worker_unavailable() {
        let (mut scheduler, _processor, mailbox, source, _ready, _failed) =
            make_scheduler(2, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);
        assert!(!scheduler.is_worker_unavailable());

        let (_on_result, _on_error, on_all_dead) = mailbox.callbacks();
        on_all_dead();
        scheduler.poll(&source);

        assert!(scheduler.is_worker_unavailable());
    }

    #[test]
    fn dispose_is_idempotent_and_empties_chunk_table() {
        let (mut scheduler, _processor, _mailbox, source, _ready, _failed) =
            make_scheduler(3, 4096, SchedulerConfig::default());
        scheduler.start(0, &source);
        scheduler.dispose();
        scheduler.dispose();
        assert!(scheduler.chunk_table().is_empty());
        assert!(scheduler.is_disposed());
    }
}
