//! WSOLA (Waveform Similarity Overlap-Add) time stretching.
//!
//! Grounded on `rf-dsp::timestretch::wsola::WsolaProcessor` (Hann window,
//! cross-correlation search against the previous output frame, overlap-add),
//! generalized to the fixed frame/hop constants spec'd for this engine and
//! to multi-channel input with offsets shared across channels.
//!
//! ## Open question resolved
//!
//! The analysis-hop direction as literally worded ("round(1024/(4*tempo))")
//! would shrink the analysis hop as tempo increases, which produces a
//! *longer* output for a *faster* tempo — backwards. Per §1's note that any
//! WSOLA implementation detail is a reference, not a numeric mandate beyond
//! the stated continuity properties, this implementation instead derives
//! the analysis hop as `round(frame_size * tempo / 4)`, which is the
//! direction that actually yields `output_len == ceil(input_len / tempo)`
//! and satisfies the boundary-continuity contract in §4.1. See DESIGN.md.

use stretch_core::Sample;

/// Frame size in samples (spec §4.1).
pub const FRAME_SIZE: usize = 1024;
/// Synthesis hop in samples (frame_size / 4).
pub const SYNTHESIS_HOP: usize = FRAME_SIZE / 4;
/// Search radius in samples (spec §4.1).
pub const SEARCH_RADIUS: usize = 256;
/// Tempo values within this distance of 1.0 bypass WSOLA entirely (spec §4.1).
pub const IDENTITY_EPSILON: f64 = 5e-3;

/// Result of a `stretch` call: per-channel output samples plus the common
/// output length (all channels share the same length).
#[derive(Debug, Clone)]
pub struct StretchOutput {
    pub channels: Vec<Vec<Sample>>,
    pub output_length: usize,
}

fn hann_window(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect()
}

fn analysis_hop_for(tempo: f64) -> usize {
    ((FRAME_SIZE as f64 * tempo) / 4.0).round().max(1.0) as usize
}

/// Extract a `FRAME_SIZE` window starting at `pos`, zero-padding past the
/// end of `input` (mirrors the teacher's `extract_frame`).
fn extract_frame(input: &[Sample], pos: usize) -> Vec<Sample> {
    let mut frame = vec![0.0; FRAME_SIZE];
    for (i, slot) in frame.iter_mut().enumerate() {
        if let Some(&s) = input.get(pos + i) {
            *slot = s;
        }
    }
    frame
}

/// Windowed inner product of a candidate frame at `pos` in `reference`
/// against the already-windowed previous output frame.
fn windowed_inner_product(
    reference: &[Sample],
    pos: usize,
    prev_windowed: &[Sample],
    window: &[f64],
) -> f64 {
    let mut sum = 0.0;
    for i in 0..FRAME_SIZE {
        let candidate = reference.get(pos + i).copied().unwrap_or(0.0);
        sum += candidate * window[i] * prev_windowed[i];
    }
    sum
}

/// Search `±SEARCH_RADIUS` around `target` for the offset whose windowed
/// inner product with `prev_windowed` is maximal.
fn find_optimal_position(
    reference: &[Sample],
    target: i64,
    prev_windowed: &[Sample],
    window: &[f64],
) -> usize {
    let input_len = reference.len() as i64;
    let max_pos = (input_len - FRAME_SIZE as i64).max(0);
    let search_start = (target - SEARCH_RADIUS as i64).max(0);
    let search_end = (target + SEARCH_RADIUS as i64).min(max_pos);

    if search_start >= search_end {
        return target.clamp(0, max_pos) as usize;
    }

    let mut best_pos = target.clamp(0, max_pos);
    let mut best_score = f64::NEG_INFINITY;
    for pos in search_start..=search_end {
        let score = windowed_inner_product(reference, pos as usize, prev_windowed, window);
        if score > best_score {
            best_score = score;
            best_pos = pos;
        }
    }
    best_pos as usize
}

/// Time-stretch a multi-channel frame at the given `tempo` (spec §4.1).
///
/// `tempo > 1.0` plays faster (shorter output); `tempo < 1.0` plays slower
/// (longer output). Pitch is unaffected either way.
pub fn stretch(channels: &[Vec<Sample>], tempo: f64, _sample_rate: u32) -> StretchOutput {
    let channel_count = channels.len();
    if channel_count == 0 || channels[0].is_empty() {
        return StretchOutput {
            channels: vec![Vec::new(); channel_count],
            output_length: 0,
        };
    }

    let input_len = channels[0].len();

    // Identity bypass: exact sample equality required (spec §4.1).
    if (tempo - 1.0).abs() < IDENTITY_EPSILON {
        log::debug!(
            "stretch: identity bypass (tempo={tempo}, input_len={input_len})"
        );
        return StretchOutput {
            channels: channels.to_vec(),
            output_length: input_len,
        };
    }

    // Too short to stretch meaningfully: independent copy, no resampling.
    if input_len < FRAME_SIZE {
        log::debug!("stretch: input shorter than frame size, returning copy");
        return StretchOutput {
            channels: channels.to_vec(),
            output_length: input_len,
        };
    }

    log::debug!("stretch: tempo={tempo}, input_len={input_len}, channels={channel_count}");

    let window = hann_window(FRAME_SIZE);
    let analysis_hop = analysis_hop_for(tempo);
    let output_len = (input_len as f64 / tempo).ceil() as usize;
    // Pad the accumulation buffers past output_len so the tail of the last
    // overlap-added frame has somewhere to land; truncated before return.
    let padded_len = output_len + FRAME_SIZE;

    let mut output: Vec<Vec<Sample>> = vec![vec![0.0; padded_len]; channel_count];
    let mut norm = vec![0.0; padded_len];

    let reference = &channels[0];
    let mut prev_windowed = vec![0.0; FRAME_SIZE];
    let mut k: i64 = 0;
    loop {
        let synthesis_pos = (k as usize) * SYNTHESIS_HOP;
        if synthesis_pos >= output_len {
            break;
        }

        let target = k * analysis_hop as i64;
        let offset = if k == 0 {
            0
        } else {
            find_optimal_position(reference, target, &prev_windowed, &window)
        };

        for (ch_idx, ch_out) in output.iter_mut().enumerate() {
            let frame = extract_frame(&channels[ch_idx], offset);
            for i in 0..FRAME_SIZE {
                ch_out[synthesis_pos + i] += frame[i] * window[i];
            }
            if ch_idx == 0 {
                let ref_frame = extract_frame(reference, offset);
                for i in 0..FRAME_SIZE {
                    prev_windowed[i] = ref_frame[i] * window[i];
                }
            }
        }
        for (i, &w) in window.iter().enumerate() {
            norm[synthesis_pos + i] += w * w;
        }

        k += 1;
    }

    for ch_out in output.iter_mut() {
        for (sample, &n) in ch_out.iter_mut().zip(norm.iter()) {
            if n > 1e-10 {
                *sample /= n;
            }
        }
        ch_out.truncate(output_len);
    }

    StretchOutput {
        channels: output,
        output_length: output_len,
    }
}
