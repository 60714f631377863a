//! Benchmarks for the per-frame mixing hot path
//!
//! Run with: cargo bench --bench mix

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use voice_mixbus::audio::{encode_pcm, MemorySource};
use voice_mixbus::config::ResamplerQuality;
use voice_mixbus::mixer::{Layer, LayerOptions};
use voice_mixbus::{PcmFormat, TrackDescriptor};

const BUS: PcmFormat = PcmFormat::voice_default();
const FRAME_MS: u32 = 20;

fn looping_layer(native: PcmFormat, quality: ResamplerQuality) -> Layer {
    let track = TrackDescriptor::new("bench.wav").unwrap().with_volume(0.8);
    // One second of tone, looped
    let source = MemorySource::sine(440.0, 0.5, native.sample_rate as usize, native);
    let mut options = LayerOptions::new(BUS);
    options.loop_override = Some(true);
    options.quality = quality;
    Layer::from_source(track, Box::new(source), options).unwrap()
}

/// Sum one frame from every layer and encode it, as the bus does
fn mix_frame(layers: &mut [Layer], mix: &mut [f32], scratch: &mut [f32], out: &mut [u8]) -> usize {
    mix.fill(0.0);
    for layer in layers.iter_mut() {
        let count = layer.read(scratch);
        for (acc, sample) in mix.iter_mut().zip(&scratch[..count]) {
            *acc += *sample;
        }
        black_box(layer.check_ended());
    }
    encode_pcm(mix, &BUS, out)
}

fn bench_mix_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix_frame");
    let samples = BUS.samples_per_frame(FRAME_MS);

    for layer_count in [1usize, 4, 16].iter() {
        let mut layers: Vec<Layer> = (0..*layer_count)
            .map(|_| looping_layer(BUS, ResamplerQuality::Medium))
            .collect();
        let mut mix = vec![0.0f32; samples];
        let mut scratch = vec![0.0f32; samples];
        let mut out = vec![0u8; BUS.frame_bytes(FRAME_MS)];

        group.bench_with_input(
            BenchmarkId::from_parameter(layer_count),
            layer_count,
            |b, _| {
                b.iter(|| black_box(mix_frame(&mut layers, &mut mix, &mut scratch, &mut out)));
            },
        );
    }

    group.finish();
}

fn bench_resample_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_44k1_mono");
    let native = PcmFormat::new(44100, 1, 16);
    let samples = BUS.samples_per_frame(FRAME_MS);

    for (name, quality) in [
        ("low", ResamplerQuality::Low),
        ("medium", ResamplerQuality::Medium),
        ("high", ResamplerQuality::High),
    ] {
        let mut layer = looping_layer(native, quality);
        let mut out = vec![0.0f32; samples];

        group.bench_function(name, |b| {
            b.iter(|| black_box(layer.read(&mut out)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mix_layers, bench_resample_quality);
criterion_main!(benches);
