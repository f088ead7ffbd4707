//! Read-only status/snapshot types (spec §6 "Engine operations"). Built
//! fresh on each call from the engine's owned state, the same cheap-snapshot
//! discipline the teacher's `AudioEngine` uses for its atomic
//! `TransportPosition`/`MeterData` so a host can poll every frame without
//! contending a lock held across DSP or event work.

use crate::events::BufferHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Buffering,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStatus {
    pub tempo: f64,
    pub duration_sec: f64,
    pub current_position_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStatus {
    pub total: usize,
    pub ready: usize,
    pub converting: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub phase: Phase,
    pub playback: PlaybackStatus,
    pub conversion: ConversionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub tempo: f64,
    pub converting: usize,
    pub conversion_progress: f64,
    pub buffer_health: BufferHealth,
    pub ahead_seconds: f64,
    pub buffering: bool,
    pub current_chunk_index: usize,
    pub total_chunks: usize,
}
