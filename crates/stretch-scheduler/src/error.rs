use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("chunk index {0} out of range")]
    ChunkOutOfRange(usize),

    #[error("scheduler already disposed")]
    AlreadyDisposed,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
