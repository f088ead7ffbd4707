//! A voice is a single scheduled playback instance: an output buffer, a
//! gain node, and a start time on the audio clock (spec §4.5).

use std::sync::Arc;

use stretch_core::Sample;

use crate::error::{PlayerError, PlayerResult};

/// The converted samples behind a single voice, plus the sample rate needed
/// to turn sample offsets into seconds.
#[derive(Debug, Clone)]
pub struct VoiceBuffer {
    pub channels: Arc<Vec<Vec<Sample>>>,
    pub sample_rate: u32,
}

impl VoiceBuffer {
    pub fn new(channels: Arc<Vec<Vec<Sample>>>, sample_rate: u32) -> PlayerResult<Self> {
        if channels.is_empty() {
            return Err(PlayerError::EmptyBuffer);
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    pub fn duration_sec(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// A gain automation to apply to a voice's gain node. The Hann-ramp variant
/// models the spec's "linearly-rising Hann half-curve" crossfades; hosts
/// backed by a real audio graph translate this into an `AudioParam`
/// automation curve or equivalent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainCurve {
    Constant(f64),
    HannRamp {
        start_time: f64,
        duration_sec: f64,
        from: f64,
        to: f64,
    },
}

/// One scheduled playback instance in the host's audio graph.
pub trait Voice: Send {
    fn apply_gain_curve(&self, curve: GainCurve);
    fn stop(&self);

    /// Register (or clear, with `None`) the one-shot end-of-buffer
    /// notification. Must be cleared before `stop` so a stale event never
    /// fires after the voice is torn down (spec §4.5 "handler `onended`
    /// cleared so stale end events are ignored").
    fn set_onended(&self, callback: Option<Box<dyn FnOnce() + Send>>);
}

/// Creates voices against the host's destination/through chain (spec §4.5
/// "optional linear `through` chain of audio nodes between voice gain and
/// destination" — wiring that chain is the factory's job, not the player's).
pub trait VoiceFactory: Send + Sync {
    type Voice: Voice;

    fn create_voice(
        &self,
        buffer: &VoiceBuffer,
        offset_in_buffer: usize,
        start_time: f64,
    ) -> Self::Voice;
}
