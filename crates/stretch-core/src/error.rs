//! Core error type, shared by every crate that builds on `stretch-core`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid sample rate: {0} (must be >= 8000)")]
    InvalidSampleRate(u32),

    #[error("source buffer has no channels")]
    NoChannels,

    #[error("channels have mismatched lengths")]
    ChannelLengthMismatch,

    #[error("invalid tempo: {0} (must be in (0.01, 4.0])")]
    InvalidTempo(f64),

    #[error("invalid chunk duration: {0}")]
    InvalidChunkDuration(f64),
}

pub type CoreResult<T> = Result<T, CoreError>;
