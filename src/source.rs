use crate::contract::{BufferFlags, BufferInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

// A clip to feed, one access unit at a time. The cursor only moves forward;
// a driver that needs to replay from a point builds a fresh source.
pub trait SampleSource {
    // Metadata of the sample under the cursor, None once exhausted.
    fn current(&self) -> Option<SampleInfo>;

    // Copies the current sample's bytes into dst, returning the byte count.
    // dst is at least current().size long; the driver sizes it from the
    // format's max_input_size.
    fn read_into(&mut self, dst: &mut [u8]) -> usize;

    // Moves to the next sample; false when the clip is exhausted.
    fn advance(&mut self) -> bool;
}

#[derive(Debug, Clone)]
struct ClipSample {
    data: Vec<u8>,
    pts_us: i64,
    flags: BufferFlags,
}

// In-memory clip. Test streams are small enough that holding every access
// unit resident beats re-reading a container.
#[derive(Debug, Clone, Default)]
pub struct ClipSource {
    samples: Vec<ClipSample>,
    cursor: usize,
}

impl ClipSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Deterministic synthetic clip: frame i carries frame_size bytes of a
    // per-frame byte pattern at pts i * pts_step_us. Every frame is a key
    // frame so a flush can resume anywhere.
    #[must_use]
    pub fn synthetic(frames: usize, frame_size: usize, pts_step_us: i64) -> Self {
        let mut source = Self::new();
        for i in 0..frames {
            let byte = (i % 251 + 1) as u8;
            source.push(
                vec![byte; frame_size],
                i as i64 * pts_step_us,
                BufferFlags::KEY_FRAME,
            );
        }
        source
    }

    pub fn push(&mut self, data: Vec<u8>, pts_us: i64, flags: BufferFlags) {
        self.samples.push(ClipSample {
            data,
            pts_us,
            flags,
        });
    }

    pub fn skip(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.samples.len());
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }
}

impl SampleSource for ClipSource {
    fn current(&self) -> Option<SampleInfo> {
        self.samples.get(self.cursor).map(|sample| SampleInfo {
            size: sample.data.len(),
            pts_us: sample.pts_us,
            flags: sample.flags,
        })
    }

    fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let Some(sample) = self.samples.get(self.cursor) else {
            return 0;
        };
        let n = sample.data.len().min(dst.len());
        dst[..n].copy_from_slice(&sample.data[..n]);
        n
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.samples.len() {
            self.cursor += 1;
        }
        self.cursor < self.samples.len()
    }
}

// Where produced access units go when the run wants more than a checksum,
// e.g. to feed a decode pass over the encoder's output.
pub trait SampleSink {
    fn write_sample(&mut self, data: &[u8], info: &BufferInfo);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn write_sample(&mut self, _data: &[u8], _info: &BufferInfo) {}
}

#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Vec<(Vec<u8>, BufferInfo)>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn samples(&self) -> &[(Vec<u8>, BufferInfo)] {
        &self.samples
    }

    // Repackages the captured stream as a source for a follow-up run.
    #[must_use]
    pub fn into_source(self) -> ClipSource {
        let mut source = ClipSource::new();
        for (data, info) in self.samples {
            source.push(data, info.pts_us, info.flags);
        }
        source
    }
}

impl SampleSink for MemorySink {
    fn write_sample(&mut self, data: &[u8], info: &BufferInfo) {
        self.samples.push((data.to_vec(), *info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_clip_walks_in_pts_order() {
        let mut source = ClipSource::synthetic(3, 8, 33_000);
        let mut seen = Vec::new();
        loop {
            let Some(info) = source.current() else { break };
            assert_eq!(info.size, 8);
            seen.push(info.pts_us);
            if !source.advance() {
                break;
            }
        }
        assert_eq!(seen, vec![0, 33_000, 66_000]);
        assert!(source.current().is_none() || source.remaining() == 0);
    }

    #[test]
    fn read_into_copies_the_current_sample() {
        let mut source = ClipSource::new();
        source.push(vec![9, 8, 7], 100, BufferFlags::NONE);
        let mut buf = [0u8; 16];
        let n = source.read_into(&mut buf);
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[9, 8, 7]);
    }

    #[test]
    fn skip_clamps_at_the_clip_end() {
        let mut source = ClipSource::synthetic(4, 4, 1000);
        source.skip(2);
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.current().map(|i| i.pts_us), Some(2000));
        source.skip(100);
        assert_eq!(source.remaining(), 0);
        assert!(source.current().is_none());
    }

    #[test]
    fn sink_round_trips_into_a_source() {
        let mut sink = MemorySink::new();
        sink.write_sample(&[1, 2], &BufferInfo::new(0, 2, 500, BufferFlags::KEY_FRAME));
        sink.write_sample(&[3], &BufferInfo::new(0, 1, 1500, BufferFlags::NONE));
        let source = sink.into_source();
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.current().map(|i| i.pts_us), Some(500));
    }
}
