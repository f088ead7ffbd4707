use thiserror::Error;

use stretch_core::CoreError;
use stretch_player::PlayerError;
use stretch_scheduler::SchedulerError;

/// The engine's own error taxonomy (spec §6 "Error taxonomy"), plus the
/// lower crates' errors it can propagate unchanged.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Player(#[from] PlayerError),

    /// All worker slots are dead. Fatal: the engine transitions to `ended`
    /// and every subsequent call becomes a no-op.
    #[error("all worker slots are dead")]
    WorkerUnavailable,

    /// A single chunk exhausted its retry budget. Non-fatal: the chunk is
    /// marked `failed` and playback continues past it.
    #[error("chunk {index} failed: {message}")]
    ChunkFailed { index: usize, message: String },

    /// The worker subsystem could not be constructed at all. Catastrophic:
    /// the engine must transition to `ended` on its next cooperative tick.
    #[error("engine initialisation failed: {0}")]
    InitFailure(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
