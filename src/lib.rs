pub mod contract;
pub mod decode_driver;
pub mod dispatcher;
pub mod encode_driver;
pub mod engine;
pub mod loopback;
pub mod recorder;
pub mod source;

pub use contract::{
    BufferEvent, BufferFlags, BufferInfo, BufferQueueCodec, CodecError, CodecEvents, FormatDelta,
    InputPoll, MediaFormat, OutputPoll, StreamKind,
};
pub use decode_driver::{CapturePolicy, DecodeDriver};
pub use dispatcher::CallbackDispatcher;
pub use encode_driver::EncodeDriver;
pub use engine::{
    CodecVariant, DriveContext, DriverEngine, DriverError, DriverState, EosPolicy, EventSource,
    Progress, ScheduleMode,
};
pub use loopback::{LoopbackCodec, LoopbackConfig};
pub use recorder::{OutputRecorder, rolling_checksum};
pub use source::{ClipSource, MemorySink, NullSink, SampleInfo, SampleSink, SampleSource};
