use criterion::{criterion_group, criterion_main, Criterion};
use stretch_dsp::stretch;

fn sine(len: usize, freq: f64, sample_rate: f64) -> Vec<f64> {
    (0..len)
        .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
        .collect()
}

fn bench_stretch(c: &mut Criterion) {
    let input = sine(44100 * 8, 440.0, 44100.0);
    let mut group = c.benchmark_group("wsola_stretch");
    for tempo in [0.5, 1.0, 1.5, 2.0] {
        group.bench_function(format!("tempo_{tempo}"), |b| {
            b.iter(|| stretch(&[input.clone()], tempo, 44100))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stretch);
criterion_main!(benches);
