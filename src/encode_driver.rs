use crate::contract::{BufferFlags, BufferInfo, BufferQueueCodec, MediaFormat, StreamKind};
use crate::decode_driver::CapturePolicy;
use crate::engine::{CodecVariant, DriveContext, DriverError, EosPolicy};
use crate::source::{NullSink, SampleSink};

// Encode side: chunks a raw payload into fixed-size input buffers and
// generates the timestamps itself, audio from the byte position and video
// from the frame index.
pub struct EncodeDriver<K: SampleSink = NullSink> {
    data: Vec<u8>,
    frame_size: usize,
    kind: StreamKind,
    pts_step_us: i64,
    submitted: usize,
    frames_fed: usize,
    base_pts_us: i64,
    bytes_base: usize,
    capture: CapturePolicy,
    sink: K,
}

impl EncodeDriver<NullSink> {
    pub fn new(format: &MediaFormat, data: Vec<u8>, frame_size: usize) -> Self {
        let pts_step_us = match format.kind {
            StreamKind::Video { frame_rate, .. } => 1_000_000 / i64::from(frame_rate.max(1)),
            StreamKind::Audio { .. } => 0,
        };
        Self {
            data,
            frame_size,
            kind: format.kind,
            pts_step_us,
            submitted: 0,
            frames_fed: 0,
            base_pts_us: 0,
            bytes_base: 0,
            capture: CapturePolicy::Checksum,
            sink: NullSink,
        }
    }
}

impl<K: SampleSink> EncodeDriver<K> {
    #[must_use]
    pub fn with_capture(mut self, capture: CapturePolicy) -> Self {
        self.capture = capture;
        self
    }

    // Overrides the frame-rate-derived video timestamp step.
    #[must_use]
    pub fn with_pts_step(mut self, pts_step_us: i64) -> Self {
        self.pts_step_us = pts_step_us;
        self
    }

    // Coded output also goes here, e.g. to feed a decode pass afterwards.
    #[must_use]
    pub fn with_sink<K2: SampleSink>(self, sink: K2) -> EncodeDriver<K2> {
        EncodeDriver {
            data: self.data,
            frame_size: self.frame_size,
            kind: self.kind,
            pts_step_us: self.pts_step_us,
            submitted: self.submitted,
            frames_fed: self.frames_fed,
            base_pts_us: self.base_pts_us,
            bytes_base: self.bytes_base,
            capture: self.capture,
            sink,
        }
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    fn next_pts(&self) -> i64 {
        match self.kind {
            StreamKind::Video { .. } => self.base_pts_us + self.frames_fed as i64 * self.pts_step_us,
            StreamKind::Audio {
                channels,
                sample_rate_hz,
            } => {
                // 16-bit samples.
                let bytes = (self.submitted - self.bytes_base) as i64;
                self.base_pts_us
                    + bytes * 1_000_000 / (2 * i64::from(channels) * i64::from(sample_rate_hz))
            }
        }
    }
}

impl<C: BufferQueueCodec, K: SampleSink> CodecVariant<C> for EncodeDriver<K> {
    fn enqueue_input(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
    ) -> Result<(), DriverError> {
        if self.submitted >= self.data.len() {
            return cx.queue_eos(index);
        }
        let pts_us = self.next_pts();
        let dst = cx.codec.input_buffer(index)?;
        let remaining = self.data.len() - self.submitted;
        let size = remaining.min(self.frame_size).min(dst.len());
        dst[..size].copy_from_slice(&self.data[self.submitted..self.submitted + size]);
        let mut flags = BufferFlags::NONE;
        if self.submitted + size >= self.data.len() && cx.eos_policy() == EosPolicy::WithLastFrame
        {
            flags |= BufferFlags::END_OF_STREAM;
            cx.mark_input_eos();
        }
        log::trace!("input: id {index}, size {size}, pts {pts_us}us, flags {flags}");
        cx.codec.queue_input_buffer(index, 0, size, pts_us, flags)?;
        self.submitted += size;
        self.frames_fed += 1;
        cx.recorder.save_in_pts(pts_us);
        cx.note_input_queued();
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
        if info.size > 0 {
            let buf = cx.codec.output_buffer(index)?;
            self.sink.write_sample(buf, info);
            if !info.flags.contains(BufferFlags::CODEC_CONFIG) {
                match self.capture {
                    CapturePolicy::Skip => {}
                    CapturePolicy::Memory => cx.recorder.save_to_memory(buf, info),
                    CapturePolicy::Checksum => cx.recorder.save_checksum(buf, info),
                }
                cx.recorder.save_out_pts(info.pts_us);
                cx.note_output_received();
            }
        }
        cx.codec.release_output_buffer(index, false)?;
        Ok(())
    }

    // Generated timestamps restart one past the watermark, keeping the
    // post-flush output strictly above everything seen before the flush.
    fn on_flush(&mut self, resume_pts_us: i64) {
        self.base_pts_us = resume_pts_us.saturating_add(1);
        self.frames_fed = 0;
        self.bytes_base = self.submitted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_driver(frames: usize, frame_size: usize, step: i64) -> EncodeDriver {
        let format = MediaFormat::video("video/raw", 176, 144, 30).with_bitrate(256_000);
        EncodeDriver::new(&format, vec![7u8; frames * frame_size], frame_size)
            .with_pts_step(step)
    }

    #[test]
    fn video_pts_walks_in_frame_steps() {
        let mut driver = video_driver(4, 64, 33_000);
        let mut seen = Vec::new();
        while driver.submitted < driver.data.len() {
            seen.push(driver.next_pts());
            driver.submitted += driver.frame_size;
            driver.frames_fed += 1;
        }
        assert_eq!(seen, vec![0, 33_000, 66_000, 99_000]);
    }

    #[test]
    fn audio_pts_follows_the_byte_position() {
        let format = MediaFormat::audio("audio/raw", 2, 48_000);
        let mut driver = EncodeDriver::new(&format, vec![0u8; 4096 * 3], 4096);
        // 4096 bytes = 1024 stereo 16-bit frames = 21333us at 48kHz.
        assert_eq!(driver.next_pts(), 0);
        driver.submitted = 4096;
        assert_eq!(driver.next_pts(), 21_333);
        driver.submitted = 8192;
        assert_eq!(driver.next_pts(), 42_666);
    }

    #[test]
    fn flush_rebases_pts_above_the_watermark() {
        let mut driver = video_driver(6, 64, 33_000);
        driver.submitted = 3 * 64;
        driver.frames_fed = 3;
        <EncodeDriver as CodecVariant<crate::loopback::LoopbackCodec>>::on_flush(
            &mut driver,
            66_000,
        );
        assert_eq!(driver.next_pts(), 66_001);
        driver.frames_fed = 1;
        assert_eq!(driver.next_pts(), 99_001);
    }

    #[test]
    fn default_video_step_comes_from_the_frame_rate() {
        let format = MediaFormat::video("video/raw", 176, 144, 25);
        let driver = EncodeDriver::new(&format, vec![0u8; 64], 64);
        assert_eq!(driver.pts_step_us, 40_000);
    }
}
