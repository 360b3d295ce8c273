use clap::Parser;
use codec_harness::{
    BufferFlags, BufferQueueCodec, CapturePolicy, ClipSource, DecodeDriver, DriverEngine,
    EncodeDriver, EosPolicy, FormatDelta, LoopbackCodec, LoopbackConfig, MediaFormat, MemorySink,
    ScheduleMode,
};

#[derive(Parser, Debug)]
#[command(about = "Run the loopback conformance scenarios and report each verdict")]
struct Args {
    #[arg(long, default_value_t = 64)]
    frames: usize,
    #[arg(long, default_value_t = 256)]
    frame_size: usize,
    #[arg(long, default_value_t = 33_000)]
    pts_step_us: i64,
    #[arg(long, default_value_t = 0)]
    reorder_window: usize,
    #[arg(long, default_value_t = false)]
    eos_with_last_frame: bool,
}

impl Args {
    fn eos_policy(&self) -> EosPolicy {
        if self.eos_with_last_frame {
            EosPolicy::WithLastFrame
        } else {
            EosPolicy::SeparateBuffer
        }
    }
}

fn audio_format() -> MediaFormat {
    MediaFormat::audio("audio/raw", 2, 48_000)
}

fn video_format() -> MediaFormat {
    MediaFormat::video("video/raw", 176, 144, 30).with_bitrate(512_000)
}

fn decode_run(
    args: &Args,
    mode: ScheduleMode,
) -> anyhow::Result<DriverEngine<LoopbackCodec, DecodeDriver<ClipSource>>> {
    let config = LoopbackConfig {
        reorder_window: args.reorder_window,
        ..LoopbackConfig::default()
    };
    let source = ClipSource::synthetic(args.frames, args.frame_size, args.pts_step_us);
    let mut engine = DriverEngine::new(
        LoopbackCodec::new(config),
        DecodeDriver::new(source).with_capture(CapturePolicy::Checksum),
    );
    engine.configure(&audio_format(), mode, args.eos_policy(), false)?;
    engine.start()?;
    engine.drive_to_eos()?;
    engine.stop()?;
    Ok(engine)
}

fn decode_equivalence(args: &Args) -> anyhow::Result<()> {
    let callback = decode_run(args, ScheduleMode::Callback)?;
    let poll = decode_run(args, ScheduleMode::Poll)?;
    anyhow::ensure!(
        callback.recorder().matches(poll.recorder()),
        "callback and poll runs diverged"
    );
    anyhow::ensure!(
        callback.output_count() == args.frames,
        "callback run dropped output buffers: {} of {}",
        callback.output_count(),
        args.frames
    );
    Ok(())
}

fn encode_pts_identity(args: &Args) -> anyhow::Result<()> {
    let data: Vec<u8> = (0..10 * args.frame_size).map(|i| (i % 253) as u8).collect();
    let variant = EncodeDriver::new(&video_format(), data, args.frame_size)
        .with_pts_step(args.pts_step_us)
        .with_capture(CapturePolicy::Checksum);
    let mut engine = DriverEngine::new(LoopbackCodec::new(LoopbackConfig::default()), variant);
    engine.configure(&video_format(), ScheduleMode::Callback, args.eos_policy(), true)?;
    engine.start()?;
    engine.drive_to_eos()?;
    engine.stop()?;
    anyhow::ensure!(
        engine.recorder().is_out_pts_identical_to_in_pts(false),
        "encoder did not preserve the input timestamps"
    );
    anyhow::ensure!(
        engine.recorder().is_pts_strictly_increasing(i64::MIN),
        "encoder output timestamps are not strictly increasing"
    );
    Ok(())
}

fn flush_mid_stream(args: &Args) -> anyhow::Result<()> {
    let source = ClipSource::synthetic(args.frames, args.frame_size, args.pts_step_us);
    let mut engine = DriverEngine::new(
        LoopbackCodec::new(LoopbackConfig::default()),
        DecodeDriver::new(source).with_capture(CapturePolicy::Checksum),
    );
    engine.configure(
        &audio_format(),
        ScheduleMode::Callback,
        EosPolicy::SeparateBuffer,
        false,
    )?;
    engine.start()?;
    let fed = engine.feed_and_drain(args.frames / 2)?;
    let watermark = engine
        .recorder()
        .out_pts()
        .iter()
        .copied()
        .max()
        .unwrap_or(i64::MIN);
    engine.flush(watermark)?;
    engine.recorder_mut().clear();
    engine.drive_to_eos()?;
    engine.stop()?;

    let mut reference = DriverEngine::new(
        LoopbackCodec::new(LoopbackConfig::default()),
        DecodeDriver::new(ClipSource::synthetic(
            args.frames,
            args.frame_size,
            args.pts_step_us,
        ))
        .with_capture(CapturePolicy::Checksum),
    );
    reference.variant_mut().source_mut().skip(fed);
    reference.configure(
        &audio_format(),
        ScheduleMode::Poll,
        EosPolicy::SeparateBuffer,
        false,
    )?;
    reference.start()?;
    reference.drive_to_eos()?;

    anyhow::ensure!(
        engine.recorder().matches(reference.recorder()),
        "post-flush run diverged from a fresh run over the tail"
    );
    anyhow::ensure!(
        engine
            .recorder()
            .is_pts_strictly_increasing(engine.pts_watermark()),
        "post-flush output fell below the flush watermark"
    );
    Ok(())
}

fn only_eos() -> anyhow::Result<()> {
    let mut engine = DriverEngine::new(
        LoopbackCodec::new(LoopbackConfig::default()),
        DecodeDriver::new(ClipSource::new()).with_capture(CapturePolicy::Checksum),
    );
    engine.configure(
        &audio_format(),
        ScheduleMode::Poll,
        EosPolicy::SeparateBuffer,
        false,
    )?;
    engine.start()?;
    engine.drive_to_eos()?;
    anyhow::ensure!(
        engine.saw_output_eos() && engine.output_count() == 0,
        "an empty stream must round-trip the end-of-stream marker and nothing else"
    );
    Ok(())
}

fn parameter_deltas() -> anyhow::Result<()> {
    let frame_size = 64usize;
    let variant = EncodeDriver::new(&video_format(), vec![7u8; 6 * frame_size], frame_size)
        .with_sink(MemorySink::new());
    let mut engine = DriverEngine::new(LoopbackCodec::new(LoopbackConfig::default()), variant);
    engine.configure(
        &video_format(),
        ScheduleMode::Poll,
        EosPolicy::SeparateBuffer,
        true,
    )?;
    engine.start()?;
    engine.feed_and_drain(3)?;
    engine.apply_delta(&FormatDelta::key_frame())?;
    engine.apply_delta(&FormatDelta::bitrate(768_000))?;
    engine.drive_to_eos()?;
    let bitrate = engine.codec_mut().output_format()?.bitrate;
    anyhow::ensure!(
        bitrate == Some(768_000),
        "bitrate delta did not reach the output format: {bitrate:?}"
    );
    let sink = engine.into_variant().into_sink();
    let keys = sink
        .samples()
        .iter()
        .filter(|(_, info)| info.flags.contains(BufferFlags::KEY_FRAME))
        .count();
    anyhow::ensure!(
        keys == 2,
        "expected the automatic first key frame plus one requested, saw {keys}"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut failures = 0usize;
    for (name, result) in [
        ("decode-equivalence", decode_equivalence(&args)),
        ("encode-pts-identity", encode_pts_identity(&args)),
        ("flush-mid-stream", flush_mid_stream(&args)),
        ("only-eos", only_eos()),
        ("parameter-deltas", parameter_deltas()),
    ] {
        match result {
            Ok(()) => println!("{name}: ok"),
            Err(err) => {
                failures += 1;
                println!("{name}: FAILED: {err}");
            }
        }
    }
    anyhow::ensure!(failures == 0, "{failures} scenario(s) failed");
    Ok(())
}
