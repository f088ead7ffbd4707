//! Gapless chunk-to-chunk audio playback: the consumer side of the
//! stretched-playback pipeline. Schedules at most two voices at a time and
//! crosses over between them on either the audio clock or a wall-clock
//! fallback timer.

mod clock;
mod error;
mod player;
mod voice;

pub use clock::{AudioClock, TimerHandle, TimerHost};
pub use error::{PlayerError, PlayerResult};
pub use player::{ChunkPlayer, PlayerConfig};
pub use voice::{GainCurve, Voice, VoiceBuffer, VoiceFactory};
