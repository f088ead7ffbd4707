//! Sample and source-buffer types.

/// A single audio sample. `f64` throughout for the same reason `rf-core`
/// keeps DSP math in `f64`: the WSOLA search accumulates cross-correlation
/// sums across many frames and half-precision error compounds there.
pub type Sample = f64;

/// A decoded, multi-channel, fixed-size source buffer. Immutable for the
/// lifetime of the engine that owns it (spec §3).
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl SourceBuffer {
    /// Construct a source buffer from per-channel sample vectors. All
    /// channels must have equal length; `sample_rate` must be >= 8000 per
    /// spec §3.
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Result<Self, crate::CoreError> {
        if sample_rate < 8000 {
            return Err(crate::CoreError::InvalidSampleRate(sample_rate));
        }
        if channels.is_empty() {
            return Err(crate::CoreError::NoChannels);
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(crate::CoreError::ChannelLengthMismatch);
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn total_samples(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn duration_sec(&self) -> f64 {
        self.total_samples() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Extract a half-open sample range `[start, end)` for every channel,
    /// clamped to the buffer bounds. Used by the scheduler to pull a
    /// chunk's input (including its overlap regions) before dispatch.
    pub fn extract_range(&self, start: usize, end: usize) -> Vec<Vec<Sample>> {
        let total = self.total_samples();
        let start = start.min(total);
        let end = end.min(total).max(start);
        self.channels
            .iter()
            .map(|c| c[start..end].to_vec())
            .collect()
    }
}
