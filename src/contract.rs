use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);
    pub const PARTIAL_FRAME: BufferFlags = BufferFlags(1 << 3);

    #[must_use]
    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

impl Display for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    #[must_use]
    pub fn new(offset: usize, size: usize, pts_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset,
            size,
            pts_us,
            flags,
        }
    }
}

impl Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferInfo(offset={}, size={}, pts={}us, flags={})",
            self.offset, self.size, self.pts_us, self.flags
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    Input { index: usize },
    Output { index: usize, info: BufferInfo },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio {
        channels: u32,
        sample_rate_hz: u32,
    },
    Video {
        width: u32,
        height: u32,
        frame_rate: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub kind: StreamKind,
    pub bitrate: Option<u32>,
    pub max_input_size: usize,
}

impl MediaFormat {
    #[must_use]
    pub fn audio(mime: &str, channels: u32, sample_rate_hz: u32) -> Self {
        Self {
            mime: mime.to_string(),
            kind: StreamKind::Audio {
                channels,
                sample_rate_hz,
            },
            bitrate: None,
            max_input_size: 1 << 14,
        }
    }

    #[must_use]
    pub fn video(mime: &str, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            mime: mime.to_string(),
            kind: StreamKind::Video {
                width,
                height,
                frame_rate,
            },
            bitrate: None,
            max_input_size: (width as usize * height as usize * 3 / 2).max(1 << 12),
        }
    }

    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    #[must_use]
    pub fn apply(&self, delta: &FormatDelta) -> MediaFormat {
        let mut next = self.clone();
        if let Some(bitrate) = delta.bitrate {
            next.bitrate = Some(bitrate);
        }
        next
    }

    // Mime is raw on one side of a codec and the coded type on the other,
    // so only the structural keys are compared.
    #[must_use]
    pub fn is_compatible_with(&self, other: &MediaFormat) -> bool {
        match (self.kind, other.kind) {
            (
                StreamKind::Audio {
                    channels: a_ch,
                    sample_rate_hz: a_sr,
                },
                StreamKind::Audio {
                    channels: b_ch,
                    sample_rate_hz: b_sr,
                },
            ) => a_ch == b_ch && a_sr == b_sr,
            (
                StreamKind::Video {
                    width: a_w,
                    height: a_h,
                    ..
                },
                StreamKind::Video {
                    width: b_w,
                    height: b_h,
                    ..
                },
            ) => a_w == b_w && a_h == b_h,
            _ => false,
        }
    }
}

impl Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamKind::Audio {
                channels,
                sample_rate_hz,
            } => write!(
                f,
                "MediaFormat(mime={}, channels={}, sample_rate={}Hz, bitrate={:?})",
                self.mime, channels, sample_rate_hz, self.bitrate
            ),
            StreamKind::Video {
                width,
                height,
                frame_rate,
            } => write!(
                f,
                "MediaFormat(mime={}, {}x{}@{}fps, bitrate={:?})",
                self.mime, width, height, frame_rate, self.bitrate
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatDelta {
    pub bitrate: Option<u32>,
    pub request_key_frame: bool,
}

impl FormatDelta {
    #[must_use]
    pub fn bitrate(bitrate: u32) -> Self {
        Self {
            bitrate: Some(bitrate),
            request_key_frame: false,
        }
    }

    #[must_use]
    pub fn key_frame() -> Self {
        Self {
            bitrate: None,
            request_key_frame: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPoll {
    Buffer(usize),
    TryAgain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPoll {
    Buffer(usize, BufferInfo),
    TryAgain,
    FormatChanged(MediaFormat),
    BuffersChanged,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("illegal codec state: {0}")]
    IllegalState(String),
    #[error("invalid buffer index: {0}")]
    InvalidIndex(usize),
    #[error("invalid buffer range: offset={offset}, size={size}, capacity={capacity}")]
    InvalidRange {
        offset: usize,
        size: usize,
        capacity: usize,
    },
    #[error("unsupported parameter: {0}")]
    Unsupported(String),
    #[error("codec fault: {0}")]
    Fault(String),
}

pub trait CodecEvents: Send + Sync {
    fn on_input_available(&self, index: usize);

    fn on_output_available(&self, index: usize, info: BufferInfo);

    fn on_format_changed(&self, format: MediaFormat);

    fn on_error(&self, description: String);
}

pub trait BufferQueueCodec {
    fn configure(&mut self, format: &MediaFormat, encode: bool) -> Result<(), CodecError>;

    fn start(&mut self) -> Result<(), CodecError>;

    fn stop(&mut self) -> Result<(), CodecError>;

    fn flush(&mut self) -> Result<(), CodecError>;

    // timeout of None blocks until a buffer (or a fault) is available.
    fn dequeue_input_buffer(&mut self, timeout: Option<Duration>)
    -> Result<InputPoll, CodecError>;

    fn dequeue_output_buffer(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<OutputPoll, CodecError>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], CodecError>;

    fn output_buffer(&mut self, index: usize) -> Result<&[u8], CodecError>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError>;

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<(), CodecError>;

    fn output_format(&self) -> Result<MediaFormat, CodecError>;

    fn set_parameters(&mut self, delta: &FormatDelta) -> Result<(), CodecError>;

    fn set_event_handler(
        &mut self,
        handler: Option<Arc<dyn CodecEvents>>,
    ) -> Result<(), CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_flags_compose_and_query() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(BufferFlags::NONE.is_empty());

        let mut accumulated = BufferFlags::NONE;
        accumulated |= BufferFlags::CODEC_CONFIG;
        assert!(accumulated.contains(BufferFlags::CODEC_CONFIG));
    }

    #[test]
    fn format_apply_delta_is_a_copy_not_a_mutation() {
        let base = MediaFormat::video("video/avc", 352, 288, 30).with_bitrate(512_000);
        let updated = base.apply(&FormatDelta::bitrate(768_000));
        assert_eq!(base.bitrate, Some(512_000));
        assert_eq!(updated.bitrate, Some(768_000));
        assert_eq!(updated.kind, base.kind);
    }

    #[test]
    fn format_compatibility_ignores_mime_but_not_structure() {
        let raw = MediaFormat::audio("audio/raw", 2, 44_100);
        let coded = MediaFormat::audio("audio/flac", 2, 44_100);
        assert!(raw.is_compatible_with(&coded));

        let mono = MediaFormat::audio("audio/flac", 1, 44_100);
        assert!(!raw.is_compatible_with(&mono));

        let video = MediaFormat::video("video/avc", 352, 288, 30);
        assert!(!raw.is_compatible_with(&video));
        assert!(video.is_compatible_with(&MediaFormat::video("video/raw", 352, 288, 25)));
    }
}
