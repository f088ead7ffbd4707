//! Bridges a `ConversionProcessor`'s push-style callbacks to the scheduler's
//! pull-style `poll()` cycle (spec §4.4, §5 "Ordering guarantees").
//!
//! `WorkerPool`/`MainThreadProcessor` invoke their callbacks the moment a
//! response is drained from the worker channel, which may race the
//! scheduler's own cooperative tick. Funnelling everything through a shared,
//! lock-protected queue gives the scheduler a single synchronisation point:
//! `poll()` drains the mailbox and processes events in arrival order (O1).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use stretch_core::Sample;
use stretch_worker::ProcessorResponse;

#[derive(Debug)]
pub enum ProcessorEvent {
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
    AllDead,
}

type OnResult = Box<dyn Fn(ProcessorResponse) + Send + Sync>;
type OnError = Box<dyn Fn(usize, String) + Send + Sync>;
type OnAllDead = Box<dyn Fn() + Send + Sync>;

pub struct ProcessorMailbox {
    queue: Mutex<VecDeque<ProcessorEvent>>,
}

impl ProcessorMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Build the `onResult`/`onError`/`onAllDead` callbacks a
    /// `ConversionProcessor` expects at construction time, all funnelling
    /// into this mailbox.
    pub fn callbacks(self: &Arc<Self>) -> (OnResult, OnError, OnAllDead) {
        let for_result = Arc::clone(self);
        let on_result: OnResult = Box::new(move |response| {
            let event = match response {
                ProcessorResponse::Result {
                    chunk_index,
                    channels,
                    output_length,
                } => ProcessorEvent::Result {
                    chunk_index,
                    channels,
                    output_length,
                },
                ProcessorResponse::Cancelled { chunk_index } => {
                    ProcessorEvent::Cancelled { chunk_index }
                }
                ProcessorResponse::Error {
                    chunk_index,
                    message,
                } => ProcessorEvent::Error {
                    chunk_index,
                    message,
                },
            };
            for_result.queue.lock().push_back(event);
        });

        let for_error = Arc::clone(self);
        let on_error: OnError = Box::new(move |chunk_index, message| {
            for_error
                .queue
                .lock()
                .push_back(ProcessorEvent::Error { chunk_index, message });
        });

        let for_dead = Arc::clone(self);
        let on_all_dead: OnAllDead = Box::new(move || {
            for_dead.queue.lock().push_back(ProcessorEvent::AllDead);
        });

        (on_result, on_error, on_all_dead)
    }

    pub fn drain(&self) -> Vec<ProcessorEvent> {
        self.queue.lock().drain(..).collect()
    }
}
