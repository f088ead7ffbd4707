//! Synchronous main-thread fallback processor (spec §9).
//!
//! For hosts that cannot spawn off-thread workers, `stretch()` runs inline
//! but work is still handed off via a one-shot deferred queue so the caller
//! retains the "post now, observe later via poll()" shape the scheduler
//! relies on, and so `terminate()` can drop queued work before it runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use stretch_core::Sample;
use stretch_dsp::stretch;

use crate::{ConversionProcessor, ProcessorResponse};

struct QueuedConvert {
    chunk_index: usize,
    channels: Vec<Vec<Sample>>,
    tempo: f64,
    sample_rate: u32,
}

type OnResult = Box<dyn Fn(ProcessorResponse) + Send + Sync>;

/// Runs conversions synchronously on whatever thread calls `poll()`, with a
/// single logical "slot" (spec §9: "runs `stretch` synchronously but yields
/// control via a zero-delay deferred task"). `stretch()` cannot itself fail,
/// so unlike `WorkerPool` there is no error callback to wire up.
pub struct MainThreadProcessor {
    terminated: AtomicBool,
    busy: AtomicBool,
    queue: Mutex<VecDeque<QueuedConvert>>,
    cancelled: Mutex<std::collections::HashSet<usize>>,
    post_time: Mutex<Option<Instant>>,
    on_result: OnResult,
}

impl MainThreadProcessor {
    pub fn new(on_result: OnResult) -> Arc<Self> {
        Arc::new(Self {
            terminated: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(std::collections::HashSet::new()),
            post_time: Mutex::new(None),
            on_result,
        })
    }
}

impl ConversionProcessor for MainThreadProcessor {
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
        if self.busy.load(Ordering::Acquire) {
            return false;
        }
        self.busy.store(true, Ordering::Release);
        *self.post_time.lock() = Some(Instant::now());
        self.queue.lock().push_back(QueuedConvert {
            chunk_index,
            channels,
            tempo,
            sample_rate,
        });
        true
    }

    fn cancel_chunk(&self, chunk_index: usize) {
        self.cancelled.lock().insert(chunk_index);
    }

    fn cancel_current(&self) {
        if let Some(front) = self.queue.lock().front() {
            self.cancelled.lock().insert(front.chunk_index);
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn has_capacity(&self) -> bool {
        !self.busy.load(Ordering::Acquire) && !self.terminated.load(Ordering::Acquire)
    }

    fn current_chunk_index(&self) -> Option<usize> {
        self.queue.lock().front().map(|job| job.chunk_index)
    }

    fn last_post_time(&self) -> Option<Instant> {
        *self.post_time.lock()
    }

    fn post_time_for_chunk(&self, chunk_index: usize) -> Option<Instant> {
        if self.current_chunk_index() == Some(chunk_index) {
            *self.post_time.lock()
        } else {
            None
        }
    }

    fn poll(&self) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        let next = self.queue.lock().pop_front();
        let Some(job) = next else {
            return;
        };

        let was_cancelled = self.cancelled.lock().remove(&job.chunk_index);
        self.busy.store(false, Ordering::Release);
        *self.post_time.lock() = None;

        if self.terminated.load(Ordering::Acquire) {
            return;
        }

        if was_cancelled {
            (self.on_result)(ProcessorResponse::Cancelled {
                chunk_index: job.chunk_index,
            });
            return;
        }

        let output = stretch(&job.channels, job.tempo, job.sample_rate);
        (self.on_result)(ProcessorResponse::Result {
            chunk_index: job.chunk_index,
            channels: output.channels,
            output_length: output.output_length,
        });
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.lock().clear();
        self.cancelled.lock().clear();
        self.busy.store(false, Ordering::Release);
        *self.post_time.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn synchronous_conversion_round_trips() {
        let (tx, rx) = mpsc::channel();
        let proc = MainThreadProcessor::new(Box::new(move |r| {
            let _ = tx.send(r);
        }));
        assert!(proc.post_convert(0, vec![vec![0.0; 4096]], 1.5, 44100));
        assert!(!proc.has_capacity());
        proc.poll();
        match rx.try_recv().unwrap() {
            ProcessorResponse::Result { chunk_index, .. } => assert_eq!(chunk_index, 0),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(proc.has_capacity());
    }

    #[test]
    fn cancel_before_poll_yields_cancelled() {
        let (tx, rx) = mpsc::channel();
        let proc = MainThreadProcessor::new(Box::new(move |r| {
            let _ = tx.send(r);
        }));
        proc.post_convert(0, vec![vec![0.0; 4096]], 1.5, 44100);
        proc.cancel_chunk(0);
        proc.poll();
        match rx.try_recv().unwrap() {
            ProcessorResponse::Cancelled { chunk_index } => assert_eq!(chunk_index, 0),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn tracks_current_chunk_and_post_time_until_polled() {
        let proc = MainThreadProcessor::new(Box::new(|_| {}));
        assert_eq!(proc.current_chunk_index(), None);
        assert!(proc.last_post_time().is_none());

        proc.post_convert(3, vec![vec![0.0; 4096]], 1.0, 44100);
        assert_eq!(proc.current_chunk_index(), Some(3));
        assert!(proc.post_time_for_chunk(3).is_some());
        assert!(proc.post_time_for_chunk(4).is_none());

        proc.poll();
        assert_eq!(proc.current_chunk_index(), None);
        assert!(proc.last_post_time().is_none());
    }

    #[test]
    fn terminate_silences_future_calls() {
        let proc = MainThreadProcessor::new(Box::new(|_| {}));
        proc.terminate();
        assert!(!proc.post_convert(0, vec![vec![0.0; 10]], 1.0, 44100));
        proc.poll(); // no-op, must not panic
    }
}
