use crate::contract::{BufferFlags, BufferInfo, BufferQueueCodec};
use crate::engine::{CodecVariant, DriveContext, DriverError, EosPolicy};
use crate::source::SampleSource;

// What to keep of the produced output. Checksum is the default for
// comparing two runs; Memory when the bytes themselves are needed, e.g. for
// an rms comparison against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    Skip,
    Memory,
    Checksum,
}

// Decode side: feeds coded access units from a source, records what the
// codec produces.
pub struct DecodeDriver<S: SampleSource> {
    source: S,
    csd: Vec<Vec<u8>>,
    csd_cursor: usize,
    capture: CapturePolicy,
    render: bool,
}

impl<S: SampleSource> DecodeDriver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            csd: Vec::new(),
            csd_cursor: 0,
            capture: CapturePolicy::Skip,
            render: false,
        }
    }

    #[must_use]
    pub fn with_capture(mut self, capture: CapturePolicy) -> Self {
        self.capture = capture;
        self
    }

    // Surface-style release: hand produced buffers to the renderer instead
    // of discarding them.
    #[must_use]
    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    // Codec-specific setup data, submitted before the stream and again
    // after every flush.
    #[must_use]
    pub fn with_csd(mut self, csd: Vec<Vec<u8>>) -> Self {
        self.csd = csd;
        self
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn capture_output<C: BufferQueueCodec>(
        &self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
        info: &BufferInfo,
    ) -> Result<(), DriverError> {
        match self.capture {
            CapturePolicy::Skip => {}
            CapturePolicy::Memory => {
                let buf = cx.codec.output_buffer(index)?;
                cx.recorder.save_to_memory(buf, info);
            }
            CapturePolicy::Checksum => {
                let buf = cx.codec.output_buffer(index)?;
                cx.recorder.save_checksum(buf, info);
            }
        }
        Ok(())
    }
}

impl<C: BufferQueueCodec, S: SampleSource> CodecVariant<C> for DecodeDriver<S> {
    fn enqueue_input(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
    ) -> Result<(), DriverError> {
        let Some(sample) = self.source.current() else {
            return cx.queue_eos(index);
        };
        let dst = cx.codec.input_buffer(index)?;
        let size = self.source.read_into(dst);
        let mut flags = sample.flags;
        let more = self.source.advance();
        if !more && cx.eos_policy() == EosPolicy::WithLastFrame {
            flags |= BufferFlags::END_OF_STREAM;
            cx.mark_input_eos();
        }
        log::trace!("input: id {index}, size {size}, pts {}us, flags {flags}", sample.pts_us);
        cx.codec
            .queue_input_buffer(index, 0, size, sample.pts_us, flags)?;
        // Setup data and partial chunks are not access units; only whole
        // data frames count.
        if size > 0
            && !flags.contains(BufferFlags::CODEC_CONFIG)
            && !flags.contains(BufferFlags::PARTIAL_FRAME)
        {
            cx.recorder.save_in_pts(sample.pts_us);
            cx.note_input_queued();
        }
        Ok(())
    }

    fn dequeue_output(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
        info: &BufferInfo,
    ) -> Result<(), DriverError> {
        if info.flags.contains(BufferFlags::END_OF_STREAM) {
            cx.mark_output_eos();
        }
        log::trace!("output: id {index}, {info}");
        if info.size > 0 && !info.flags.contains(BufferFlags::CODEC_CONFIG) {
            self.capture_output(cx, index, info)?;
            cx.recorder.save_out_pts(info.pts_us);
            cx.note_output_received();
        }
        cx.codec.release_output_buffer(index, self.render)?;
        Ok(())
    }

    fn pending_preamble(&self) -> usize {
        self.csd.len() - self.csd_cursor
    }

    fn next_preamble(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
    ) -> Result<(), DriverError> {
        let Some(blob) = self.csd.get(self.csd_cursor) else {
            return Ok(());
        };
        let dst = cx.codec.input_buffer(index)?;
        let n = blob.len().min(dst.len());
        dst[..n].copy_from_slice(&blob[..n]);
        cx.codec
            .queue_input_buffer(index, 0, n, 0, BufferFlags::CODEC_CONFIG)?;
        self.csd_cursor += 1;
        Ok(())
    }

    // Setup data must be resubmitted after a flush.
    fn on_flush(&mut self, _resume_pts_us: i64) {
        self.csd_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MediaFormat;
    use crate::engine::{DriverEngine, ScheduleMode};
    use crate::loopback::{LoopbackCodec, LoopbackConfig};
    use crate::source::ClipSource;

    #[test]
    fn csd_preamble_count_and_flush_rewind() {
        let mut driver = DecodeDriver::new(ClipSource::new())
            .with_csd(vec![vec![0, 0, 1], vec![0, 0, 2]]);
        assert_eq!(
            <DecodeDriver<_> as CodecVariant<LoopbackCodec>>::pending_preamble(&driver),
            2
        );
        driver.csd_cursor = 2;
        assert_eq!(
            <DecodeDriver<_> as CodecVariant<LoopbackCodec>>::pending_preamble(&driver),
            0
        );
        <DecodeDriver<_> as CodecVariant<LoopbackCodec>>::on_flush(&mut driver, 0);
        assert_eq!(
            <DecodeDriver<_> as CodecVariant<LoopbackCodec>>::pending_preamble(&driver),
            2
        );
    }

    #[test]
    fn memory_capture_preserves_the_decoded_bytes() {
        let mut source = ClipSource::new();
        source.push(vec![1, 2, 3], 0, BufferFlags::KEY_FRAME);
        source.push(vec![4, 5], 33_000, BufferFlags::NONE);

        let mut engine = DriverEngine::new(
            LoopbackCodec::new(LoopbackConfig::default()),
            DecodeDriver::new(source)
                .with_capture(CapturePolicy::Memory)
                .with_render(true),
        );
        engine
            .configure(
                &MediaFormat::audio("audio/raw", 1, 8_000),
                ScheduleMode::Poll,
                EosPolicy::SeparateBuffer,
                false,
            )
            .expect("configure should succeed");
        engine.start().expect("start should succeed");
        engine.drive_to_eos().expect("run should complete");

        assert_eq!(engine.recorder().payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(engine.recorder().out_pts(), &[0, 33_000]);
        assert_eq!(engine.input_count(), 2);
        assert_eq!(engine.output_count(), 2);
    }

    #[test]
    fn last_frame_carries_eos_under_that_policy() {
        let source = ClipSource::synthetic(3, 16, 1_000);
        let mut engine = DriverEngine::new(
            LoopbackCodec::new(LoopbackConfig::default()),
            DecodeDriver::new(source).with_capture(CapturePolicy::Checksum),
        );
        engine
            .configure(
                &MediaFormat::audio("audio/raw", 1, 8_000),
                ScheduleMode::Poll,
                EosPolicy::WithLastFrame,
                false,
            )
            .expect("configure should succeed");
        engine.start().expect("start should succeed");
        engine.drive_to_eos().expect("run should complete");

        // All three frames still come out; no empty trailer was needed.
        assert_eq!(engine.output_count(), 3);
        assert_eq!(engine.input_count(), 3);
        assert!(engine.saw_output_eos());
    }
}
