//! Engine configuration (spec §6 "Engine factory inputs"), following the
//! teacher's `Default` + explicit-builder pattern for settings structs.

use stretch_core::CoreError;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub tempo: f64,
    pub loop_playback: bool,
    pub offset_sec: f64,
    pub crossfade_sec: f64,
    pub keep_ahead_chunks: usize,
    pub keep_behind_chunks: usize,
    pub chunk_duration_sec: f64,
    pub overlap_sec: f64,
    pub resume_sec: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tempo: 1.0,
            loop_playback: false,
            offset_sec: 0.0,
            crossfade_sec: 0.1,
            keep_ahead_chunks: 5,
            keep_behind_chunks: 3,
            chunk_duration_sec: 8.0,
            overlap_sec: 0.2,
            resume_sec: 10.0,
        }
    }
}

impl EngineOptions {
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptionsBuilder {
    options: EngineOptionsInner,
}

/// Wraps `Option<T>` per field so the builder can fall back to
/// `EngineOptions::default()` for anything the caller never touched.
#[derive(Debug, Clone, Default)]
struct EngineOptionsInner {
    tempo: Option<f64>,
    loop_playback: Option<bool>,
    offset_sec: Option<f64>,
    crossfade_sec: Option<f64>,
    keep_ahead_chunks: Option<usize>,
    keep_behind_chunks: Option<usize>,
    chunk_duration_sec: Option<f64>,
    overlap_sec: Option<f64>,
    resume_sec: Option<f64>,
}

impl EngineOptionsBuilder {
    pub fn tempo(mut self, tempo: f64) -> Self {
        self.options.tempo = Some(tempo);
        self
    }

    pub fn loop_playback(mut self, loop_playback: bool) -> Self {
        self.options.loop_playback = Some(loop_playback);
        self
    }

    pub fn offset_sec(mut self, offset_sec: f64) -> Self {
        self.options.offset_sec = Some(offset_sec);
        self
    }

    pub fn crossfade_sec(mut self, crossfade_sec: f64) -> Self {
        self.options.crossfade_sec = Some(crossfade_sec);
        self
    }

    pub fn keep_ahead_chunks(mut self, n: usize) -> Self {
        self.options.keep_ahead_chunks = Some(n);
        self
    }

    pub fn keep_behind_chunks(mut self, n: usize) -> Self {
        self.options.keep_behind_chunks = Some(n);
        self
    }

    pub fn chunk_duration_sec(mut self, sec: f64) -> Self {
        self.options.chunk_duration_sec = Some(sec);
        self
    }

    pub fn overlap_sec(mut self, sec: f64) -> Self {
        self.options.overlap_sec = Some(sec);
        self
    }

    pub fn resume_sec(mut self, sec: f64) -> Self {
        self.options.resume_sec = Some(sec);
        self
    }

    /// Finalize the options, validating `tempo` against spec §6's
    /// `(0.01, 4.0]` range (`CoreError::InvalidTempo`).
    pub fn build(self) -> Result<EngineOptions, CoreError> {
        let defaults = EngineOptions::default();
        let tempo = stretch_core::validate_tempo(self.options.tempo.unwrap_or(defaults.tempo))?;
        Ok(EngineOptions {
            tempo,
            loop_playback: self.options.loop_playback.unwrap_or(defaults.loop_playback),
            offset_sec: self.options.offset_sec.unwrap_or(defaults.offset_sec),
            crossfade_sec: self.options.crossfade_sec.unwrap_or(defaults.crossfade_sec),
            keep_ahead_chunks: self
                .options
                .keep_ahead_chunks
                .unwrap_or(defaults.keep_ahead_chunks),
            keep_behind_chunks: self
                .options
                .keep_behind_chunks
                .unwrap_or(defaults.keep_behind_chunks),
            chunk_duration_sec: self
                .options
                .chunk_duration_sec
                .unwrap_or(defaults.chunk_duration_sec),
            overlap_sec: self.options.overlap_sec.unwrap_or(defaults.overlap_sec),
            resume_sec: self.options.resume_sec.unwrap_or(defaults.resume_sec),
        })
    }
}
