//! stretch-dsp: the pure-function DSP core — WSOLA time-stretching and the
//! deterministic chunk splitter.
//!
//! Both entry points are pure functions with no shared mutable state, so the
//! worker pool can call `stretch` from any thread without synchronization,
//! matching how `rf-dsp::timestretch` keeps its processors free of
//! cross-call aliasing beyond an explicit `&mut self` for reusable scratch
//! buffers.

mod splitter;
mod wsola;

pub use splitter::split;
pub use wsola::{stretch, StretchOutput};
