//! stretch-scheduler: the Conversion Scheduler (spec §4.4) — a priority
//! queue over the chunk table, generic over whatever `ConversionProcessor`
//! the host provides (an off-thread `stretch-worker::WorkerPool` or its
//! main-thread fallback).

mod cache;
mod error;
mod mailbox;
mod scheduler;

pub use cache::{ChunkSnapshot, TempoCache};
pub use error::{SchedulerError, SchedulerResult};
pub use mailbox::{ProcessorEvent, ProcessorMailbox};
pub use scheduler::{ConversionScheduler, SchedulerConfig};
