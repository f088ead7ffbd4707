//! Off-thread worker pool (spec §4.3).
//!
//! Each slot owns a dedicated OS thread and a `crossbeam_channel` request
//! pipe; responses flow back over one shared channel and are drained by
//! `poll()` on the main thread, matching the cooperative run-to-completion
//! model in spec §5 (the only real parallelism lives in the worker threads
//! themselves, which share nothing mutable with the caller beyond the
//! request/response channels). Grounded on `rf-audio`'s use of a dedicated
//! background thread per concern (the recording-flush thread in
//! `AudioEngine::start`), generalized here to a fixed-size pool.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use stretch_core::Sample;
use stretch_dsp::stretch;

use crate::{ConversionProcessor, ProcessorResponse};

enum WorkerRequest {
    Convert {
        chunk_index: usize,
        channels: Vec<Vec<Sample>>,
        tempo: f64,
        sample_rate: u32,
    },
    Terminate,
}

enum InternalResponse {
    Result {
        slot: usize,
        chunk_index: usize,
        channels: Vec<Vec<Sample>>,
        output_length: usize,
    },
    Cancelled {
        slot: usize,
        chunk_index: usize,
    },
    Error {
        slot: usize,
        chunk_index: usize,
        message: String,
    },
    /// Injected by a test harness (or, in principle, a supervising thread
    /// that observed a real panic) to drive the crash/respawn path without
    /// requiring an actual thread panic — see SPEC_FULL.md §4.3.
    Crashed {
        slot: usize,
    },
}

#[derive(Default)]
struct PendingConvert {
    chunk_index: usize,
    channels: Vec<Vec<Sample>>,
    tempo: f64,
    sample_rate: u32,
}

struct Slot {
    request_tx: Mutex<Option<Sender<WorkerRequest>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    busy: AtomicBool,
    current_chunk: Mutex<Option<usize>>,
    post_time: Mutex<Option<Instant>>,
    crash_count: AtomicU32,
    dead: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            request_tx: Mutex::new(None),
            thread: Mutex::new(None),
            busy: AtomicBool::new(false),
            current_chunk: Mutex::new(None),
            post_time: Mutex::new(None),
            crash_count: AtomicU32::new(0),
            dead: AtomicBool::new(false),
        }
    }
}

type OnResult = Box<dyn Fn(ProcessorResponse) + Send + Sync>;
type OnError = Box<dyn Fn(usize, String) + Send + Sync>;
type OnAllDead = Box<dyn Fn() + Send + Sync>;

/// Pool of off-main-thread converters (spec §4.3).
pub struct WorkerPool {
    slots: Vec<Slot>,
    max_crashes: u32,
    terminated: AtomicBool,
    response_rx: Receiver<InternalResponse>,
    response_tx: Sender<InternalResponse>,
    cancelled_chunks: Mutex<HashSet<usize>>,
    deferred: Mutex<VecDeque<PendingConvert>>,
    on_result: OnResult,
    on_error: OnError,
    on_all_dead: OnAllDead,
    all_dead_fired: AtomicBool,
}

impl WorkerPool {
    /// Builds a pool of `pool_size` worker threads. If the OS refuses to
    /// spawn one of them, any threads already spawned are torn down and the
    /// underlying `io::Error` is returned rather than panicking the host
    /// process — callers can fall back to `MainThreadProcessor` or otherwise
    /// surface the failure.
    pub fn new(
        pool_size: usize,
        max_crashes: u32,
        on_result: OnResult,
        on_error: OnError,
        on_all_dead: OnAllDead,
    ) -> std::io::Result<Arc<Self>> {
        let (response_tx, response_rx) = unbounded();
        let mut slots = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            slots.push(Slot::new());
        }

        let pool = Arc::new(Self {
            slots,
            max_crashes,
            terminated: AtomicBool::new(false),
            response_rx,
            response_tx,
            cancelled_chunks: Mutex::new(HashSet::new()),
            deferred: Mutex::new(VecDeque::new()),
            on_result,
            on_error,
            on_all_dead,
            all_dead_fired: AtomicBool::new(false),
        });

        for index in 0..pool_size {
            if let Err(err) = pool.spawn_slot(index) {
                pool.terminate();
                return Err(err);
            }
        }
        Ok(pool)
    }

    fn spawn_slot(&self, index: usize) -> std::io::Result<()> {
        let (request_tx, request_rx) = unbounded::<WorkerRequest>();
        let response_tx = self.response_tx.clone();

        let handle = std::thread::Builder::new()
            .name(format!("stretch-worker-{index}"))
            .spawn(move || worker_loop(index, request_rx, response_tx))?;

        *self.slots[index].request_tx.lock() = Some(request_tx);
        *self.slots[index].thread.lock() = Some(handle);
        Ok(())
    }

    /// Test-only hook: inject a crash response for `slot` without actually
    /// panicking the worker thread (see SPEC_FULL.md §4.3).
    pub fn inject_crash_for_test(&self, slot: usize) {
        let _ = self.response_tx.send(InternalResponse::Crashed { slot });
    }

    fn free_slot_index(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| !s.dead.load(Ordering::Acquire) && !s.busy.load(Ordering::Acquire))
    }

    fn dispatch_to_slot(&self, slot_index: usize, pending: PendingConvert) {
        let slot = &self.slots[slot_index];
        let tx = slot.request_tx.lock().clone();
        let Some(tx) = tx else {
            return;
        };
        slot.busy.store(true, Ordering::Release);
        *slot.current_chunk.lock() = Some(pending.chunk_index);
        *slot.post_time.lock() = Some(Instant::now());

        if tx
            .send(WorkerRequest::Convert {
                chunk_index: pending.chunk_index,
                channels: pending.channels,
                tempo: pending.tempo,
                sample_rate: pending.sample_rate,
            })
            .is_err()
        {
            // Channel disconnected: the worker thread died between the
            // capacity check and this send. Treat as an immediate crash.
            self.handle_crash(slot_index);
        }
    }

    fn free_slot_state(&self, slot_index: usize) {
        let slot = &self.slots[slot_index];
        slot.busy.store(false, Ordering::Release);
        *slot.current_chunk.lock() = None;
        *slot.post_time.lock() = None;
    }

    fn handle_crash(&self, slot_index: usize) {
        let slot = &self.slots[slot_index];
        let failed_chunk = slot.current_chunk.lock().take();
        *slot.post_time.lock() = None;
        slot.busy.store(false, Ordering::Release);

        let crashes = slot.crash_count.fetch_add(1, Ordering::AcqRel) + 1;
        let respawned = crashes < self.max_crashes && self.spawn_slot(slot_index).is_ok();
        if respawned {
            log::warn!("stretch-worker slot {slot_index} crashed ({crashes}/{}), respawning", self.max_crashes);
            if let Some(chunk_index) = failed_chunk {
                (self.on_error)(chunk_index, format!("worker slot {slot_index} crashed"));
            }
        } else {
            log::error!("stretch-worker slot {slot_index} exceeded max crashes or failed to respawn, marking dead");
            slot.dead.store(true, Ordering::Release);
            if let Some(chunk_index) = failed_chunk {
                (self.on_error)(chunk_index, format!("worker slot {slot_index} dead"));
            }
            if self.slots.iter().all(|s| s.dead.load(Ordering::Acquire))
                && !self.all_dead_fired.swap(true, Ordering::AcqRel)
            {
                (self.on_all_dead)();
            }
        }
    }

    fn try_redispatch_deferred(&self) {
        let pending_list: Vec<PendingConvert> = {
            let mut deferred = self.deferred.lock();
            deferred.drain(..).collect()
        };

        let mut still_pending = VecDeque::new();
        for pending in pending_list {
            let is_cancelled = self.cancelled_chunks.lock().contains(&pending.chunk_index);
            if is_cancelled {
                still_pending.push_back(pending);
                continue;
            }
            match self.free_slot_index() {
                Some(slot) => self.dispatch_to_slot(slot, pending),
                None => still_pending.push_back(pending),
            }
        }
        *self.deferred.lock() = still_pending;
    }
}

fn worker_loop(index: usize, request_rx: Receiver<WorkerRequest>, response_tx: Sender<InternalResponse>) {
    log::debug!("stretch-worker {index} started");
    for request in request_rx.iter() {
        match request {
            WorkerRequest::Convert {
                chunk_index,
                channels,
                tempo,
                sample_rate,
            } => {
                let output = stretch(&channels, tempo, sample_rate);
                let response = InternalResponse::Result {
                    slot: index,
                    chunk_index,
                    channels: output.channels,
                    output_length: output.output_length,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
            WorkerRequest::Terminate => break,
        }
    }
    log::debug!("stretch-worker {index} stopped");
}

impl ConversionProcessor for WorkerPool {
    fn post_convert(
        &self,
        chunk_index: usize,
        channels: Vec<Vec<Sample>>,
        tempo: f64,
        sample_rate: u32,
    ) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }

        if self.cancelled_chunks.lock().contains(&chunk_index) {
            self.deferred.lock().push_back(PendingConvert {
                chunk_index,
                channels,
                tempo,
                sample_rate,
            });
            return false;
        }

        match self.free_slot_index() {
            Some(slot) => {
                self.dispatch_to_slot(
                    slot,
                    PendingConvert {
                        chunk_index,
                        channels,
                        tempo,
                        sample_rate,
                    },
                );
                true
            }
            None => false,
        }
    }

    fn cancel_chunk(&self, chunk_index: usize) {
        self.cancelled_chunks.lock().insert(chunk_index);
    }

    fn cancel_current(&self) {
        for slot in &self.slots {
            if let Some(chunk_index) = *slot.current_chunk.lock() {
                self.cancelled_chunks.lock().insert(chunk_index);
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.slots.iter().any(|s| s.busy.load(Ordering::Acquire))
    }

    fn has_capacity(&self) -> bool {
        self.free_slot_index().is_some()
    }

    fn current_chunk_index(&self) -> Option<usize> {
        self.slots
            .iter()
            .filter_map(|s| {
                let chunk = *s.current_chunk.lock();
                let post_time = *s.post_time.lock();
                chunk.zip(post_time)
            })
            .min_by_key(|(_, post_time)| *post_time)
            .map(|(chunk, _)| chunk)
    }

    fn last_post_time(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|s| *s.post_time.lock()).max()
    }

    fn post_time_for_chunk(&self, chunk_index: usize) -> Option<Instant> {
        self.slots.iter().find_map(|s| {
            let chunk = *s.current_chunk.lock();
            let post_time = *s.post_time.lock();
            if chunk == Some(chunk_index) {
                post_time
            } else {
                None
            }
        })
    }

    fn poll(&self) {
        while let Ok(response) = self.response_rx.try_recv() {
            match response {
                InternalResponse::Result {
                    slot,
                    chunk_index,
                    channels,
                    output_length,
                } => {
                    self.free_slot_state(slot);
                    let was_cancelled = self.cancelled_chunks.lock().remove(&chunk_index);
                    if was_cancelled {
                        (self.on_result)(ProcessorResponse::Cancelled { chunk_index });
                    } else {
                        (self.on_result)(ProcessorResponse::Result {
                            chunk_index,
                            channels,
                            output_length,
                        });
                    }
                    self.try_redispatch_deferred();
                }
                InternalResponse::Cancelled { slot, chunk_index } => {
                    self.free_slot_state(slot);
                    self.cancelled_chunks.lock().remove(&chunk_index);
                    (self.on_result)(ProcessorResponse::Cancelled { chunk_index });
                    self.try_redispatch_deferred();
                }
                InternalResponse::Error {
                    slot,
                    chunk_index,
                    message,
                } => {
                    self.free_slot_state(slot);
                    self.cancelled_chunks.lock().remove(&chunk_index);
                    (self.on_error)(chunk_index, message);
                    self.try_redispatch_deferred();
                }
                InternalResponse::Crashed { slot } => {
                    self.handle_crash(slot);
                    self.try_redispatch_deferred();
                }
            }
        }
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("stretch-worker pool terminating");
        for slot in &self.slots {
            if let Some(tx) = slot.request_tx.lock().take() {
                let _ = tx.send(WorkerRequest::Terminate);
            }
            if let Some(handle) = slot.thread.lock().take() {
                let _ = handle.join();
            }
            *slot.post_time.lock() = None;
            slot.busy.store(false, Ordering::Release);
        }
        self.cancelled_chunks.lock().clear();
        self.deferred.lock().clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn make_pool(pool_size: usize, max_crashes: u32) -> (Arc<WorkerPool>, mpsc::Receiver<ProcessorResponse>, mpsc::Receiver<(usize, String)>, mpsc::Receiver<()>) {
        let (result_tx, result_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        let (dead_tx, dead_rx) = mpsc::channel();
        let pool = WorkerPool::new(
            pool_size,
            max_crashes,
            Box::new(move |r| {
                let _ = result_tx.send(r);
            }),
            Box::new(move |idx, msg| {
                let _ = error_tx.send((idx, msg));
            }),
            Box::new(move || {
                let _ = dead_tx.send(());
            }),
        )
        .expect("failed to spawn test worker pool");
        (pool, result_rx, error_rx, dead_rx)
    }

    #[test]
    fn current_chunk_index_and_post_time_track_in_flight_work() {
        let (pool, result_rx, _error_rx, _dead_rx) = make_pool(1, 2);
        assert_eq!(pool.current_chunk_index(), None);
        assert!(pool.last_post_time().is_none());

        assert!(pool.post_convert(5, vec![vec![0.0; 4096]], 1.0, 44100));
        assert_eq!(pool.current_chunk_index(), Some(5));
        assert!(pool.last_post_time().is_some());
        assert!(pool.post_time_for_chunk(5).is_some());
        assert!(pool.post_time_for_chunk(6).is_none());

        for _ in 0..200 {
            pool.poll();
            if result_rx.try_recv().is_ok() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(pool.current_chunk_index(), None);
        assert!(pool.post_time_for_chunk(5).is_none());
        pool.terminate();
    }

    #[test]
    fn dispatches_and_resolves() {
        let (pool, result_rx, _error_rx, _dead_rx) = make_pool(2, 2);
        let channels = vec![vec![0.0; 4096]];
        assert!(pool.post_convert(0, channels, 1.5, 44100));
        // Wait for the worker thread to respond.
        let mut got = false;
        for _ in 0..200 {
            pool.poll();
            if let Ok(ProcessorResponse::Result { chunk_index, .. }) = result_rx.try_recv() {
                assert_eq!(chunk_index, 0);
                got = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(got, "expected a result response");
        pool.terminate();
    }

    #[test]
    fn no_free_slot_returns_false() {
        let (pool, _r, _e, _d) = make_pool(1, 2);
        assert!(pool.post_convert(0, vec![vec![0.0; 4096]], 1.0, 44100));
        // Slot is immediately busy until the worker replies; a second post
        // should fail to find a free slot.
        assert!(!pool.post_convert(1, vec![vec![0.0; 4096]], 1.0, 44100));
        pool.terminate();
    }

    #[test]
    fn terminate_is_idempotent_and_silences_future_calls() {
        let (pool, _r, _e, _d) = make_pool(1, 2);
        pool.terminate();
        pool.terminate();
        assert!(!pool.post_convert(0, vec![vec![0.0; 10]], 1.0, 44100));
    }

    #[test]
    fn crash_respawns_until_cap_then_dies() {
        // max_crashes = 2: first crash (count=1 < 2) respawns; second crash
        // (count=2 >= 2) marks the slot dead and, with only one slot total,
        // fires onAllDead exactly once.
        let (pool, _r, error_rx, dead_rx) = make_pool(1, 2);
        pool.post_convert(7, vec![vec![0.0; 4096]], 1.0, 44100);
        pool.inject_crash_for_test(0);
        pool.poll();
        assert!(matches!(error_rx.try_recv(), Ok((7, _))));
        assert!(dead_rx.try_recv().is_err());

        pool.post_convert(8, vec![vec![0.0; 4096]], 1.0, 44100);
        pool.inject_crash_for_test(0);
        pool.poll();
        assert!(matches!(error_rx.try_recv(), Ok((8, _))));
        assert!(dead_rx.try_recv().is_ok(), "expected onAllDead after reaching the crash cap");
        pool.terminate();
    }
}
