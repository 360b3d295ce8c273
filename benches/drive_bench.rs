use std::time::Duration;

use codec_harness::{
    CapturePolicy, ClipSource, DecodeDriver, DriverEngine, EosPolicy, LoopbackCodec,
    LoopbackConfig, MediaFormat, ScheduleMode,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn run_decode(mode: ScheduleMode, frames: usize, frame_size: usize) {
    let source = ClipSource::synthetic(frames, frame_size, 33_000);
    let mut engine = DriverEngine::new(
        LoopbackCodec::new(LoopbackConfig::default()),
        DecodeDriver::new(source).with_capture(CapturePolicy::Checksum),
    );
    engine
        .configure(
            &MediaFormat::audio("audio/raw", 2, 48_000),
            mode,
            EosPolicy::SeparateBuffer,
            false,
        )
        .expect("configure should succeed in benchmark");
    engine.start().expect("start should succeed in benchmark");
    engine
        .drive_to_eos()
        .expect("run should complete in benchmark");
    engine.stop().expect("stop should succeed in benchmark");
}

fn drive_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("drive_loopback");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(2));

    let frame_size = 1024usize;
    for (label, mode) in [
        ("callback", ScheduleMode::Callback),
        ("poll", ScheduleMode::Poll),
    ] {
        for frames in [64usize, 512] {
            group.throughput(Throughput::Bytes((frames * frame_size) as u64));
            group.bench_with_input(
                BenchmarkId::new(label, format!("frames_{frames}")),
                &frames,
                |b, &frames| {
                    b.iter(|| run_decode(mode, frames, frame_size));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, drive_benchmark);
criterion_main!(benches);
