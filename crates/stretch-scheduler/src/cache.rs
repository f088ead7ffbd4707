//! Previous-tempo cache (spec §4.4 "Tempo change").
//!
//! A single snapshot of every `ready` chunk's output at the tempo that was
//! current just before the most recent tempo change. `restorePreviousTempo`
//! lets the engine undo a tempo change for free when the host round-trips
//! back to the same value before the new conversions would have mattered.

use std::collections::HashMap;

use stretch_core::Sample;

#[derive(Debug, Clone)]
pub struct ChunkSnapshot {
    pub output_buffer: Vec<Vec<Sample>>,
    pub output_length: usize,
}

#[derive(Debug, Clone)]
pub struct TempoCache {
    tempo: f64,
    chunks: HashMap<usize, ChunkSnapshot>,
}

impl TempoCache {
    pub fn new(tempo: f64, chunks: HashMap<usize, ChunkSnapshot>) -> Self {
        Self { tempo, chunks }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn get(&self, chunk_index: usize) -> Option<&ChunkSnapshot> {
        self.chunks.get(&chunk_index)
    }

    pub fn into_chunks(self) -> HashMap<usize, ChunkSnapshot> {
        self.chunks
    }
}
