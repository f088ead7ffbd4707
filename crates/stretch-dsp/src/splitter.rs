//! Deterministic chunk splitter (spec §4.2).

use stretch_core::{Chunk, ChunkTable};

/// Split a source of `total_samples` into fixed-duration chunks with a
/// small overlap region on interior boundaries. Pure function: the same
/// inputs always produce the same table.
pub fn split(
    total_samples: usize,
    sample_rate: u32,
    chunk_duration_sec: f64,
    overlap_duration_sec: f64,
) -> ChunkTable {
    if total_samples == 0 {
        return ChunkTable::empty();
    }

    let chunk_samples = (chunk_duration_sec * sample_rate as f64).round().max(1.0) as usize;
    let overlap_samples = (overlap_duration_sec * sample_rate as f64).round() as usize;

    let chunk_count = total_samples.div_ceil(chunk_samples);
    let mut chunks = Vec::with_capacity(chunk_count);

    for index in 0..chunk_count {
        let nominal_start = index * chunk_samples;
        let nominal_end = ((index + 1) * chunk_samples).min(total_samples);

        let overlap_before = if index == 0 { 0 } else { overlap_samples };
        let overlap_after = if index == chunk_count - 1 {
            0
        } else {
            overlap_samples
        };

        let input_start_sample = nominal_start.saturating_sub(overlap_before);
        let input_end_sample = (nominal_end + overlap_after).min(total_samples);

        chunks.push(Chunk {
            index,
            input_start_sample,
            input_end_sample,
            overlap_before,
            overlap_after,
            ..Default::default()
        });
    }

    let table = ChunkTable::new(chunks);
    debug_assert!(table.verify_tiling(), "chunk splitter violated I1 tiling");
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_no_chunks() {
        let table = split(0, 44100, 8.0, 0.2);
        assert!(table.is_empty());
    }

    #[test]
    fn single_chunk_source() {
        let table = split(44100 * 4, 44100, 8.0, 0.2);
        assert_eq!(table.len(), 1);
        let c = table.get(0).unwrap();
        assert_eq!(c.overlap_before, 0);
        assert_eq!(c.overlap_after, 0);
    }

    #[test]
    fn exact_multiple_source() {
        // 3 * 8s chunks exactly.
        let total = (44100.0 * 8.0) as usize * 3;
        let table = split(total, 44100, 8.0, 0.2);
        assert_eq!(table.len(), 3);
        assert!(table.verify_tiling());
        assert_eq!(table.get(0).unwrap().overlap_before, 0);
        assert_eq!(table.get(2).unwrap().overlap_after, 0);
        let overlap_samples = (0.2 * 44100.0).round() as usize;
        assert_eq!(table.get(1).unwrap().overlap_before, overlap_samples);
        assert_eq!(table.get(1).unwrap().overlap_after, overlap_samples);
    }

    #[test]
    fn tiles_without_gap_or_overlap_i1() {
        let total = 44100 * 24 + 17; // not an exact multiple
        let table = split(total, 44100, 8.0, 0.2);
        assert!(table.verify_tiling());
        let (_, last_end) = table.get(table.len() - 1).unwrap().nominal_range();
        assert_eq!(last_end, total);
    }

    #[test]
    fn lookup_by_sample_and_time() {
        let total = 44100 * 24; // 3 chunks of 8s
        let table = split(total, 44100, 8.0, 0.2);
        assert_eq!(table.chunk_at_sample(0), Some(0));
        assert_eq!(table.chunk_at_sample(44100 * 9), Some(1));
        assert_eq!(table.chunk_at_time(16.5, 44100), Some(2));
        // Past-the-end clamps to the last chunk.
        assert_eq!(table.chunk_at_sample(total + 1000), Some(2));
    }
}
