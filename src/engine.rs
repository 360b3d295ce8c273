use std::sync::Arc;
use std::time::Duration;
use std::{fmt, fmt::Display};

use crate::contract::{
    BufferFlags, BufferInfo, BufferQueueCodec, CodecError, FormatDelta, InputPoll, MediaFormat,
    OutputPoll,
};
use crate::dispatcher::CallbackDispatcher;
use crate::recorder::OutputRecorder;

// Matches the hardware dequeue cadence closely enough that a poll-mode run
// neither spins nor starves the codec.
const POLL_TIMEOUT: Duration = Duration::from_micros(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Callback,
    Poll,
}

// Whether the final access unit carries the end-of-stream marker itself or a
// dedicated empty buffer follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EosPolicy {
    WithLastFrame,
    SeparateBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Configured,
    Started,
    Flushed,
    EosQueued,
    EosReached,
    Stopped,
}

impl Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Uninitialized => "uninitialized",
            DriverState::Configured => "configured",
            DriverState::Started => "started",
            DriverState::Flushed => "flushed",
            DriverState::EosQueued => "eos-queued",
            DriverState::EosReached => "eos-reached",
            DriverState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{op} not allowed in state {state}")]
    IllegalState {
        op: &'static str,
        state: DriverState,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("codec runtime error: {0}")]
    Async(String),
}

// Per-run bookkeeping, reset on configure and on flush.
#[derive(Debug)]
struct RunState {
    saw_input_eos: bool,
    saw_output_eos: bool,
    input_count: usize,
    output_count: usize,
    eos_policy: EosPolicy,
    pts_watermark: i64,
    format_changed: bool,
    output_format: Option<MediaFormat>,
}

impl RunState {
    fn new(eos_policy: EosPolicy, pts_watermark: i64) -> Self {
        Self {
            saw_input_eos: false,
            saw_output_eos: false,
            input_count: 0,
            output_count: 0,
            eos_policy,
            pts_watermark,
            format_changed: false,
            output_format: None,
        }
    }
}

// What a variant sees while handling one buffer event: the codec for the
// buffer calls, the recorder for evidence, and the run flags through the
// methods below. codec and recorder are separate fields so a variant can
// read an output buffer and record it in one breath.
pub struct DriveContext<'a, C: BufferQueueCodec> {
    pub codec: &'a mut C,
    pub recorder: &'a mut OutputRecorder,
    run: &'a mut RunState,
}

impl<C: BufferQueueCodec> DriveContext<'_, C> {
    #[must_use]
    pub fn eos_policy(&self) -> EosPolicy {
        self.run.eos_policy
    }

    #[must_use]
    pub fn saw_input_eos(&self) -> bool {
        self.run.saw_input_eos
    }

    #[must_use]
    pub fn pts_watermark(&self) -> i64 {
        self.run.pts_watermark
    }

    pub fn mark_input_eos(&mut self) {
        self.run.saw_input_eos = true;
    }

    pub fn mark_output_eos(&mut self) {
        self.run.saw_output_eos = true;
    }

    pub fn note_input_queued(&mut self) {
        self.run.input_count += 1;
    }

    pub fn note_output_received(&mut self) {
        self.run.output_count += 1;
    }

    pub fn note_format_changed(&mut self, format: MediaFormat) {
        self.run.format_changed = true;
        self.run.output_format = Some(format);
    }

    // Queues a dedicated empty end-of-stream buffer. A second call is a
    // no-op so the engine can always close the input side unconditionally.
    pub fn queue_eos(&mut self, index: usize) -> Result<(), DriverError> {
        if self.run.saw_input_eos {
            return Ok(());
        }
        self.codec
            .queue_input_buffer(index, 0, 0, 0, BufferFlags::END_OF_STREAM)?;
        self.run.saw_input_eos = true;
        Ok(())
    }
}

// The decode/encode split. The engine owns scheduling and state; a variant
// owns what goes into an input buffer and what to make of an output buffer.
pub trait CodecVariant<C: BufferQueueCodec> {
    fn enqueue_input(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
    ) -> Result<(), DriverError>;

    fn dequeue_output(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
        info: &BufferInfo,
    ) -> Result<(), DriverError>;

    // Out-of-band setup buffers to submit before the stream proper.
    fn pending_preamble(&self) -> usize {
        0
    }

    fn next_preamble(
        &mut self,
        cx: &mut DriveContext<'_, C>,
        index: usize,
    ) -> Result<(), DriverError> {
        let _ = (cx, index);
        Ok(())
    }

    fn on_flush(&mut self, resume_pts_us: i64) {
        let _ = resume_pts_us;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Input(usize),
    Output(usize, BufferInfo),
    FormatChanged(MediaFormat),
    Idle,
}

// Where the next buffer event comes from. The two implementations are the
// whole difference between a callback-mode run and a poll-mode run; the
// engine above this seam is identical.
pub trait EventSource<C: BufferQueueCodec> {
    fn next_any(&mut self, codec: &mut C) -> Result<Progress, DriverError>;

    fn next_output(&mut self, codec: &mut C) -> Result<Progress, DriverError>;

    fn wait_input(&mut self, codec: &mut C) -> Result<usize, DriverError>;
}

struct CallbackSource {
    dispatcher: Arc<CallbackDispatcher>,
}

impl CallbackSource {
    fn runtime_error(&self) -> DriverError {
        DriverError::Async(
            self.dispatcher
                .error()
                .unwrap_or_else(|| "codec stopped delivering events".to_string()),
        )
    }
}

impl<C: BufferQueueCodec> EventSource<C> for CallbackSource {
    fn next_any(&mut self, _codec: &mut C) -> Result<Progress, DriverError> {
        match self.dispatcher.next_event() {
            Some(crate::contract::BufferEvent::Output { index, info }) => {
                Ok(Progress::Output(index, info))
            }
            Some(crate::contract::BufferEvent::Input { index }) => Ok(Progress::Input(index)),
            None => Err(self.runtime_error()),
        }
    }

    fn next_output(&mut self, _codec: &mut C) -> Result<Progress, DriverError> {
        match self.dispatcher.next_output() {
            Some((index, info)) => Ok(Progress::Output(index, info)),
            None => Err(self.runtime_error()),
        }
    }

    fn wait_input(&mut self, _codec: &mut C) -> Result<usize, DriverError> {
        self.dispatcher
            .next_input()
            .ok_or_else(|| self.runtime_error())
    }
}

struct PollingSource {
    timeout: Duration,
    queued: Option<Progress>,
}

impl<C: BufferQueueCodec> EventSource<C> for PollingSource {
    // Every round polls output first, then unconditionally polls input,
    // whether or not output made progress. When both yield, the output is
    // delivered first and the input event is handed back on the next call.
    fn next_any(&mut self, codec: &mut C) -> Result<Progress, DriverError> {
        if let Some(progress) = self.queued.take() {
            return Ok(progress);
        }
        let output = match codec.dequeue_output_buffer(Some(self.timeout))? {
            OutputPoll::Buffer(index, info) => Some(Progress::Output(index, info)),
            OutputPoll::FormatChanged(format) => Some(Progress::FormatChanged(format)),
            OutputPoll::BuffersChanged | OutputPoll::TryAgain => None,
        };
        let input = match codec.dequeue_input_buffer(Some(self.timeout))? {
            InputPoll::Buffer(index) => Some(Progress::Input(index)),
            InputPoll::TryAgain => None,
        };
        match (output, input) {
            (Some(out), Some(inp)) => {
                self.queued = Some(inp);
                Ok(out)
            }
            (Some(out), None) => Ok(out),
            (None, Some(inp)) => Ok(inp),
            (None, None) => Ok(Progress::Idle),
        }
    }

    fn next_output(&mut self, codec: &mut C) -> Result<Progress, DriverError> {
        match codec.dequeue_output_buffer(Some(self.timeout))? {
            OutputPoll::Buffer(index, info) => Ok(Progress::Output(index, info)),
            OutputPoll::FormatChanged(format) => Ok(Progress::FormatChanged(format)),
            OutputPoll::BuffersChanged | OutputPoll::TryAgain => Ok(Progress::Idle),
        }
    }

    fn wait_input(&mut self, codec: &mut C) -> Result<usize, DriverError> {
        loop {
            if let InputPoll::Buffer(index) = codec.dequeue_input_buffer(Some(self.timeout))? {
                return Ok(index);
            }
        }
    }
}

// Drives one codec instance through a run under one scheduling discipline.
// All codec calls and all recorder mutation happen on the caller's thread;
// in callback mode the codec's notification threads only touch the
// dispatcher.
pub struct DriverEngine<C: BufferQueueCodec, V: CodecVariant<C>> {
    codec: C,
    variant: V,
    dispatcher: Arc<CallbackDispatcher>,
    recorder: OutputRecorder,
    state: DriverState,
    mode: ScheduleMode,
    run: RunState,
}

impl<C: BufferQueueCodec, V: CodecVariant<C>> DriverEngine<C, V> {
    pub fn new(codec: C, variant: V) -> Self {
        Self {
            codec,
            variant,
            dispatcher: Arc::new(CallbackDispatcher::new()),
            recorder: OutputRecorder::new(),
            state: DriverState::Uninitialized,
            mode: ScheduleMode::Poll,
            run: RunState::new(EosPolicy::SeparateBuffer, i64::MIN),
        }
    }

    fn expect_state(&self, op: &'static str, allowed: &[DriverState]) -> Result<(), DriverError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::IllegalState {
                op,
                state: self.state,
            })
        }
    }

    fn event_source(&self) -> Box<dyn EventSource<C>> {
        match self.mode {
            ScheduleMode::Callback => Box::new(CallbackSource {
                dispatcher: Arc::clone(&self.dispatcher),
            }),
            ScheduleMode::Poll => Box::new(PollingSource {
                timeout: POLL_TIMEOUT,
                queued: None,
            }),
        }
    }

    pub fn configure(
        &mut self,
        format: &MediaFormat,
        mode: ScheduleMode,
        eos_policy: EosPolicy,
        encode: bool,
    ) -> Result<(), DriverError> {
        self.expect_state(
            "configure",
            &[DriverState::Uninitialized, DriverState::Stopped],
        )?;
        self.dispatcher.reset();
        let handler: Option<Arc<dyn crate::contract::CodecEvents>> = match mode {
            ScheduleMode::Callback => Some(Arc::clone(&self.dispatcher) as _),
            ScheduleMode::Poll => None,
        };
        self.codec.set_event_handler(handler)?;
        self.codec.configure(format, encode)?;
        self.mode = mode;
        self.run = RunState::new(eos_policy, i64::MIN);
        self.state = DriverState::Configured;
        log::debug!("configured for {format}, mode {mode:?}, encode {encode}");
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DriverError> {
        self.expect_state("start", &[DriverState::Configured])?;
        self.codec.start()?;
        self.state = DriverState::Started;
        Ok(())
    }

    // Submits the variant's setup buffers before any stream data.
    pub fn queue_preamble(&mut self) -> Result<(), DriverError> {
        self.expect_state("queue_preamble", &[DriverState::Started, DriverState::Flushed])?;
        let mut source = self.event_source();
        let Self {
            codec,
            variant,
            recorder,
            run,
            ..
        } = self;
        while variant.pending_preamble() > 0 {
            let index = source.wait_input(codec)?;
            let mut cx = DriveContext {
                codec: &mut *codec,
                recorder: &mut *recorder,
                run: &mut *run,
            };
            variant.next_preamble(&mut cx, index)?;
        }
        Ok(())
    }

    // Feeds up to frame_limit access units, draining output as it arrives.
    // Returns how many inputs were actually queued; stops early when the
    // variant marks the input side finished.
    pub fn feed_and_drain(&mut self, frame_limit: usize) -> Result<usize, DriverError> {
        self.expect_state("feed_and_drain", &[DriverState::Started, DriverState::Flushed])?;
        self.state = DriverState::Started;
        let mut source = self.event_source();
        let Self {
            codec,
            variant,
            recorder,
            run,
            ..
        } = self;
        let mut fed = 0usize;
        while !run.saw_input_eos && fed < frame_limit {
            match source.next_any(codec)? {
                Progress::Input(index) => {
                    let mut cx = DriveContext {
                        codec: &mut *codec,
                        recorder: &mut *recorder,
                        run: &mut *run,
                    };
                    variant.enqueue_input(&mut cx, index)?;
                    fed += 1;
                }
                Progress::Output(index, info) => {
                    let mut cx = DriveContext {
                        codec: &mut *codec,
                        recorder: &mut *recorder,
                        run: &mut *run,
                    };
                    variant.dequeue_output(&mut cx, index, &info)?;
                }
                Progress::FormatChanged(format) => {
                    run.format_changed = true;
                    run.output_format = Some(format);
                }
                Progress::Idle => {}
            }
        }
        if run.saw_input_eos {
            self.state = DriverState::EosQueued;
        }
        Ok(fed)
    }

    // Closes the input side with a dedicated empty end-of-stream buffer,
    // still draining any output that arrives meanwhile. Idempotent.
    pub fn queue_eos(&mut self) -> Result<(), DriverError> {
        self.expect_state(
            "queue_eos",
            &[
                DriverState::Started,
                DriverState::Flushed,
                DriverState::EosQueued,
            ],
        )?;
        let mut source = self.event_source();
        let Self {
            codec,
            variant,
            recorder,
            run,
            ..
        } = self;
        while !run.saw_input_eos {
            match source.next_any(codec)? {
                Progress::Input(index) => {
                    let mut cx = DriveContext {
                        codec: &mut *codec,
                        recorder: &mut *recorder,
                        run: &mut *run,
                    };
                    cx.queue_eos(index)?;
                }
                Progress::Output(index, info) => {
                    let mut cx = DriveContext {
                        codec: &mut *codec,
                        recorder: &mut *recorder,
                        run: &mut *run,
                    };
                    variant.dequeue_output(&mut cx, index, &info)?;
                }
                Progress::FormatChanged(format) => {
                    run.format_changed = true;
                    run.output_format = Some(format);
                }
                Progress::Idle => {}
            }
        }
        self.state = DriverState::EosQueued;
        Ok(())
    }

    // Consumes output until the end-of-stream marker comes back out.
    pub fn drain_remaining(&mut self) -> Result<(), DriverError> {
        self.expect_state(
            "drain_remaining",
            &[DriverState::EosQueued, DriverState::EosReached],
        )?;
        let mut source = self.event_source();
        let Self {
            codec,
            variant,
            recorder,
            run,
            ..
        } = self;
        while !run.saw_output_eos {
            match source.next_output(codec)? {
                Progress::Output(index, info) => {
                    let mut cx = DriveContext {
                        codec: &mut *codec,
                        recorder: &mut *recorder,
                        run: &mut *run,
                    };
                    variant.dequeue_output(&mut cx, index, &info)?;
                }
                Progress::FormatChanged(format) => {
                    run.format_changed = true;
                    run.output_format = Some(format);
                }
                Progress::Input(_) | Progress::Idle => {}
            }
        }
        self.state = DriverState::EosReached;
        Ok(())
    }

    // Full run: feed everything, close the input side, drain to the end.
    pub fn drive_to_eos(&mut self) -> Result<(), DriverError> {
        self.queue_preamble()?;
        self.feed_and_drain(usize::MAX)?;
        self.queue_eos()?;
        self.drain_remaining()
    }

    // Discards all in-flight buffers. min_output_pts is the watermark the
    // first post-flush output must exceed; the variant gets it to rebase
    // whatever timestamps it generates.
    pub fn flush(&mut self, min_output_pts: i64) -> Result<(), DriverError> {
        self.expect_state(
            "flush",
            &[
                DriverState::Started,
                DriverState::Flushed,
                DriverState::EosQueued,
                DriverState::EosReached,
            ],
        )?;
        self.codec.flush()?;
        // flush() has quiesced the codec, so stale events can be dropped
        // without racing a producer.
        self.dispatcher.reset();
        if self.mode == ScheduleMode::Callback {
            // In callback mode the codec pauses on flush and must be
            // restarted to resume event delivery.
            self.codec.start()?;
        }
        let eos_policy = self.run.eos_policy;
        self.run = RunState::new(eos_policy, min_output_pts);
        self.variant.on_flush(min_output_pts);
        self.state = DriverState::Flushed;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DriverError> {
        self.expect_state(
            "stop",
            &[
                DriverState::Configured,
                DriverState::Started,
                DriverState::Flushed,
                DriverState::EosQueued,
                DriverState::EosReached,
            ],
        )?;
        self.codec.stop()?;
        self.state = DriverState::Stopped;
        Ok(())
    }

    pub fn apply_delta(&mut self, delta: &FormatDelta) -> Result<(), DriverError> {
        self.expect_state(
            "apply_delta",
            &[DriverState::Started, DriverState::Flushed],
        )?;
        self.codec.set_parameters(delta)?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.run.input_count
    }

    #[must_use]
    pub fn output_count(&self) -> usize {
        self.run.output_count
    }

    #[must_use]
    pub fn saw_input_eos(&self) -> bool {
        self.run.saw_input_eos
    }

    #[must_use]
    pub fn saw_output_eos(&self) -> bool {
        self.run.saw_output_eos
    }

    #[must_use]
    pub fn format_changed(&self) -> bool {
        self.run.format_changed || self.dispatcher.format_changed()
    }

    #[must_use]
    pub fn output_format(&self) -> Option<MediaFormat> {
        self.run
            .output_format
            .clone()
            .or_else(|| self.dispatcher.output_format())
            .or_else(|| self.codec.output_format().ok())
    }

    #[must_use]
    pub fn pts_watermark(&self) -> i64 {
        self.run.pts_watermark
    }

    #[must_use]
    pub fn has_runtime_error(&self) -> bool {
        self.dispatcher.has_error()
    }

    #[must_use]
    pub fn recorder(&self) -> &OutputRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut OutputRecorder {
        &mut self.recorder
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    pub fn variant_mut(&mut self) -> &mut V {
        &mut self.variant
    }

    pub fn into_variant(self) -> V {
        self.variant
    }
}
