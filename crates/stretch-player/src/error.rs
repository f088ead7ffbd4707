use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("voice buffer has no channels")]
    EmptyBuffer,
}

pub type PlayerResult<T> = Result<T, PlayerError>;
