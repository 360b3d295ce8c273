use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::contract::{
    BufferFlags, BufferInfo, BufferQueueCodec, CodecError, CodecEvents, FormatDelta, InputPoll,
    MediaFormat, OutputPoll,
};

const LOCK_MSG: &str = "loopback lock poisoned";

#[derive(Debug, Clone, Copy)]
pub struct LoopbackConfig {
    pub input_slots: usize,
    pub output_slots: usize,
    pub buffer_capacity: usize,
    // How many finished frames are held back and then emitted newest-first,
    // to mimic coded-order output. Must stay below output_slots.
    pub reorder_window: usize,
    // Raises a codec fault while processing the buffer after this many.
    pub fail_after_inputs: Option<usize>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            buffer_capacity: 1 << 16,
            reorder_window: 0,
            fail_after_inputs: None,
        }
    }
}

struct WorkItem {
    slot: usize,
    data: Vec<u8>,
    pts_us: i64,
    flags: BufferFlags,
}

enum Emit {
    Input(usize),
    Output(usize, BufferInfo),
}

struct SharedState {
    handler: Option<Arc<dyn CodecEvents>>,
    free_inputs: VecDeque<usize>,
    client_inputs: Vec<bool>,
    work: VecDeque<WorkItem>,
    free_outputs: VecDeque<usize>,
    client_outputs: Vec<bool>,
    ready: VecDeque<(usize, BufferInfo)>,
    entries: Vec<Option<Vec<u8>>>,
    window: Vec<(usize, BufferInfo)>,
    partial: Vec<u8>,
    partial_pts: Option<i64>,
    fault: Option<String>,
    processed: usize,
    first_output: bool,
    pending_key: bool,
    busy: bool,
    flush_pending: bool,
    shutdown: bool,
}

impl SharedState {
    fn new(config: &LoopbackConfig, handler: Option<Arc<dyn CodecEvents>>) -> Self {
        Self {
            handler,
            free_inputs: (0..config.input_slots).collect(),
            client_inputs: vec![false; config.input_slots],
            work: VecDeque::new(),
            free_outputs: (0..config.output_slots).collect(),
            client_outputs: vec![false; config.output_slots],
            ready: VecDeque::new(),
            entries: (0..config.output_slots).map(|_| None).collect(),
            window: Vec::new(),
            partial: Vec::new(),
            partial_pts: None,
            fault: None,
            processed: 0,
            first_output: true,
            pending_key: false,
            busy: false,
            flush_pending: false,
            shutdown: false,
        }
    }

    fn check_fault(&self) -> Result<(), CodecError> {
        match &self.fault {
            Some(msg) => Err(CodecError::Fault(msg.clone())),
            None => Ok(()),
        }
    }
}

struct Shared {
    state: Mutex<SharedState>,
    cond: Condvar,
}

#[derive(Clone, Copy)]
struct WorkerParams {
    encode: bool,
    reorder_window: usize,
    fail_after: Option<usize>,
}

fn recycle_input(st: &mut SharedState, slot: usize, emits: &mut Vec<Emit>) {
    if st.handler.is_some() {
        st.client_inputs[slot] = true;
        emits.push(Emit::Input(slot));
    } else {
        st.free_inputs.push_back(slot);
    }
}

fn publish_output(st: &mut SharedState, slot: usize, info: BufferInfo, emits: &mut Vec<Emit>) {
    if st.handler.is_some() {
        st.client_outputs[slot] = true;
        emits.push(Emit::Output(slot, info));
    } else {
        st.ready.push_back((slot, info));
    }
}

fn drain_window(st: &mut SharedState, eos: bool, emits: &mut Vec<Emit>) {
    let mut held: Vec<(usize, BufferInfo)> = st.window.drain(..).collect();
    // The end-of-stream marker always leaves last, whatever the window
    // shuffles.
    let tail = if eos { held.pop() } else { None };
    held.reverse();
    for (slot, info) in held {
        publish_output(st, slot, info, emits);
    }
    if let Some((slot, info)) = tail {
        publish_output(st, slot, info, emits);
    }
}

// The codec's processing thread. One item at a time: assemble the access
// unit, wait for an output slot, run the (identity) transform, publish.
// busy stays true until the item's events have been delivered, which is
// what flush synchronizes on.
fn run_worker(shared: Arc<Shared>, params: WorkerParams) {
    loop {
        let item = {
            let mut st = shared.state.lock().expect(LOCK_MSG);
            loop {
                if st.shutdown {
                    return;
                }
                if !st.flush_pending {
                    if let Some(item) = st.work.pop_front() {
                        st.busy = true;
                        break item;
                    }
                }
                st = shared.cond.wait(st).expect(LOCK_MSG);
            }
        };

        let mut emits: Vec<Emit> = Vec::new();
        let mut fatal: Option<String> = None;
        let mut aborted = false;
        let handler;
        {
            let mut st = shared.state.lock().expect(LOCK_MSG);
            handler = st.handler.clone();
            st.processed += 1;
            if params.fail_after.is_some_and(|n| st.processed > n) {
                let msg = format!(
                    "device fault while processing buffer {}",
                    st.processed
                );
                st.fault = Some(msg.clone());
                fatal = Some(msg);
            } else if item.flags.contains(BufferFlags::CODEC_CONFIG) {
                // Setup data is absorbed; it never produces output.
                recycle_input(&mut st, item.slot, &mut emits);
            } else if item.flags.contains(BufferFlags::PARTIAL_FRAME) {
                if st.partial.is_empty() {
                    st.partial_pts = Some(item.pts_us);
                }
                st.partial.extend_from_slice(&item.data);
                recycle_input(&mut st, item.slot, &mut emits);
            } else {
                let mut data = mem::take(&mut st.partial);
                let pts_us = st.partial_pts.take().unwrap_or(item.pts_us);
                data.extend_from_slice(&item.data);
                recycle_input(&mut st, item.slot, &mut emits);

                let mut slot = None;
                loop {
                    if st.shutdown || st.flush_pending {
                        break;
                    }
                    if let Some(s) = st.free_outputs.pop_front() {
                        slot = Some(s);
                        break;
                    }
                    st = shared.cond.wait(st).expect(LOCK_MSG);
                }
                match slot {
                    None => aborted = true,
                    Some(slot) => {
                        let mut flags = item.flags;
                        if params.encode {
                            if st.first_output {
                                flags |= BufferFlags::KEY_FRAME;
                            } else if st.pending_key {
                                flags |= BufferFlags::KEY_FRAME;
                                st.pending_key = false;
                            }
                        }
                        st.first_output = false;
                        let info = BufferInfo::new(0, data.len(), pts_us, flags);
                        st.entries[slot] = Some(data);
                        st.window.push((slot, info));
                        let eos = flags.contains(BufferFlags::END_OF_STREAM);
                        if eos || st.window.len() > params.reorder_window {
                            drain_window(&mut st, eos, &mut emits);
                        }
                    }
                }
            }
        }

        if aborted {
            emits.clear();
        }
        if let Some(h) = &handler {
            for emit in emits {
                match emit {
                    Emit::Input(index) => h.on_input_available(index),
                    Emit::Output(index, info) => h.on_output_available(index, info),
                }
            }
            if let Some(msg) = &fatal {
                h.on_error(msg.clone());
            }
        }
        {
            let mut st = shared.state.lock().expect(LOCK_MSG);
            st.busy = false;
        }
        shared.cond.notify_all();
        if fatal.is_some() {
            return;
        }
    }
}

// Software buffer-queue codec: the transform is identity, everything else
// behaves like the hardware it stands in for. One background worker thread,
// input and output buffer arenas owned by the front side, all coordination
// through one mutex and condvar.
pub struct LoopbackCodec {
    config: LoopbackConfig,
    format: Option<MediaFormat>,
    encode: bool,
    handler: Option<Arc<dyn CodecEvents>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    input_arena: Vec<Vec<u8>>,
    output_cache: Vec<Vec<u8>>,
    configured: bool,
    running: bool,
    format_emitted: bool,
    sync_format_pending: bool,
}

impl LoopbackCodec {
    #[must_use]
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            format: None,
            encode: false,
            handler: None,
            shared: Arc::new(Shared {
                state: Mutex::new(SharedState::new(&config, None)),
                cond: Condvar::new(),
            }),
            worker: None,
            input_arena: Vec::new(),
            output_cache: Vec::new(),
            configured: false,
            running: false,
            format_emitted: false,
            sync_format_pending: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.state.lock().expect(LOCK_MSG)
    }

    fn require_running(&self, op: &str) -> Result<(), CodecError> {
        if self.running {
            Ok(())
        } else {
            Err(CodecError::IllegalState(format!("{op} before start")))
        }
    }

    fn current_format(&self) -> Result<MediaFormat, CodecError> {
        self.format
            .clone()
            .ok_or_else(|| CodecError::IllegalState("codec not configured".to_string()))
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            {
                let mut st = self.lock();
                st.shutdown = true;
            }
            self.shared.cond.notify_all();
            if worker.join().is_err() {
                log::error!("codec worker thread panicked");
            }
        }
    }
}

impl BufferQueueCodec for LoopbackCodec {
    fn configure(&mut self, format: &MediaFormat, encode: bool) -> Result<(), CodecError> {
        if self.running {
            return Err(CodecError::IllegalState(
                "configure while running".to_string(),
            ));
        }
        if self.config.reorder_window >= self.config.output_slots {
            return Err(CodecError::Unsupported(format!(
                "reorder window {} needs more than {} output slots",
                self.config.reorder_window, self.config.output_slots
            )));
        }
        self.join_worker();
        let capacity = self.config.buffer_capacity.max(format.max_input_size);
        self.input_arena = vec![vec![0u8; capacity]; self.config.input_slots];
        self.output_cache = vec![Vec::new(); self.config.output_slots];
        self.shared = Arc::new(Shared {
            state: Mutex::new(SharedState::new(&self.config, self.handler.clone())),
            cond: Condvar::new(),
        });
        self.format = Some(format.clone());
        self.encode = encode;
        self.configured = true;
        self.format_emitted = false;
        self.sync_format_pending = false;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if !self.configured {
            return Err(CodecError::IllegalState(
                "start before configure".to_string(),
            ));
        }
        if self.worker.is_none() {
            let params = WorkerParams {
                encode: self.encode,
                reorder_window: self.config.reorder_window,
                fail_after: self.config.fail_after_inputs,
            };
            let shared = Arc::clone(&self.shared);
            self.worker = Some(std::thread::spawn(move || run_worker(shared, params)));
        }
        self.running = true;

        let handler = self.lock().handler.clone();
        match handler {
            Some(handler) => {
                if !self.format_emitted {
                    self.format_emitted = true;
                    handler.on_format_changed(self.current_format()?);
                }
                // Hand every free input slot to the client; the worker
                // re-announces them as it recycles.
                let slots: Vec<usize> = {
                    let mut st = self.lock();
                    let slots: Vec<usize> = st.free_inputs.drain(..).collect();
                    for &slot in &slots {
                        st.client_inputs[slot] = true;
                    }
                    slots
                };
                for slot in slots {
                    handler.on_input_available(slot);
                }
            }
            None => {
                if !self.format_emitted {
                    self.format_emitted = true;
                    self.sync_format_pending = true;
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        if !self.configured {
            return Err(CodecError::IllegalState(
                "stop before configure".to_string(),
            ));
        }
        self.join_worker();
        self.running = false;
        self.configured = false;
        Ok(())
    }

    // Returns once every in-flight buffer is reclaimed: the worker has
    // quiesced and all slots are free again. The client's held indices are
    // invalid afterwards.
    fn flush(&mut self) -> Result<(), CodecError> {
        self.require_running("flush")?;
        let mut st = self.lock();
        st.flush_pending = true;
        self.shared.cond.notify_all();
        while st.busy {
            st = self.shared.cond.wait(st).expect(LOCK_MSG);
        }
        st.work.clear();
        st.ready.clear();
        st.window.clear();
        st.partial.clear();
        st.partial_pts = None;
        st.free_inputs = (0..self.config.input_slots).collect();
        st.client_inputs = vec![false; self.config.input_slots];
        st.free_outputs = (0..self.config.output_slots).collect();
        st.client_outputs = vec![false; self.config.output_slots];
        for entry in &mut st.entries {
            *entry = None;
        }
        st.first_output = true;
        st.pending_key = false;
        st.flush_pending = false;
        drop(st);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn dequeue_input_buffer(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<InputPoll, CodecError> {
        self.require_running("dequeue_input_buffer")?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.lock();
        loop {
            st.check_fault()?;
            if let Some(index) = st.free_inputs.pop_front() {
                st.client_inputs[index] = true;
                return Ok(InputPoll::Buffer(index));
            }
            match deadline {
                None => st = self.shared.cond.wait(st).expect(LOCK_MSG),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(InputPoll::TryAgain);
                    }
                    st = self
                        .shared
                        .cond
                        .wait_timeout(st, deadline - now)
                        .expect(LOCK_MSG)
                        .0;
                }
            }
        }
    }

    fn dequeue_output_buffer(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<OutputPoll, CodecError> {
        self.require_running("dequeue_output_buffer")?;
        if self.sync_format_pending {
            self.sync_format_pending = false;
            return Ok(OutputPoll::FormatChanged(self.current_format()?));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.lock();
        loop {
            st.check_fault()?;
            if let Some((index, info)) = st.ready.pop_front() {
                st.client_outputs[index] = true;
                return Ok(OutputPoll::Buffer(index, info));
            }
            match deadline {
                None => st = self.shared.cond.wait(st).expect(LOCK_MSG),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(OutputPoll::TryAgain);
                    }
                    st = self
                        .shared
                        .cond
                        .wait_timeout(st, deadline - now)
                        .expect(LOCK_MSG)
                        .0;
                }
            }
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], CodecError> {
        self.require_running("input_buffer")?;
        if index >= self.input_arena.len() {
            return Err(CodecError::InvalidIndex(index));
        }
        if !self.lock().client_inputs[index] {
            return Err(CodecError::IllegalState(format!(
                "input buffer {index} not owned by client"
            )));
        }
        Ok(&mut self.input_arena[index])
    }

    fn output_buffer(&mut self, index: usize) -> Result<&[u8], CodecError> {
        self.require_running("output_buffer")?;
        if index >= self.output_cache.len() {
            return Err(CodecError::InvalidIndex(index));
        }
        let mut st = self.lock();
        if !st.client_outputs[index] {
            return Err(CodecError::IllegalState(format!(
                "output buffer {index} not owned by client"
            )));
        }
        // Move the payload to the front side so the borrow can outlive the
        // lock; it stays readable until the slot is released.
        if let Some(data) = st.entries[index].take() {
            drop(st);
            self.output_cache[index] = data;
        }
        Ok(&self.output_cache[index])
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        offset: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        self.require_running("queue_input_buffer")?;
        if index >= self.input_arena.len() {
            return Err(CodecError::InvalidIndex(index));
        }
        let capacity = self.input_arena[index].len();
        if offset + size > capacity {
            return Err(CodecError::InvalidRange {
                offset,
                size,
                capacity,
            });
        }
        let mut st = self.lock();
        st.check_fault()?;
        if !st.client_inputs[index] {
            return Err(CodecError::IllegalState(format!(
                "input buffer {index} not owned by client"
            )));
        }
        st.client_inputs[index] = false;
        st.work.push_back(WorkItem {
            slot: index,
            data: self.input_arena[index][offset..offset + size].to_vec(),
            pts_us,
            flags,
        });
        drop(st);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> Result<(), CodecError> {
        self.require_running("release_output_buffer")?;
        if index >= self.output_cache.len() {
            return Err(CodecError::InvalidIndex(index));
        }
        let mut st = self.lock();
        if !st.client_outputs[index] {
            return Err(CodecError::IllegalState(format!(
                "output buffer {index} not owned by client"
            )));
        }
        st.client_outputs[index] = false;
        st.entries[index] = None;
        st.free_outputs.push_back(index);
        drop(st);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat, CodecError> {
        self.current_format()
    }

    fn set_parameters(&mut self, delta: &FormatDelta) -> Result<(), CodecError> {
        self.require_running("set_parameters")?;
        if delta.request_key_frame {
            if !self.encode {
                return Err(CodecError::Unsupported(
                    "key frame request on a decoder".to_string(),
                ));
            }
            self.lock().pending_key = true;
        }
        if let Some(bitrate) = delta.bitrate {
            if let Some(format) = self.format.as_mut() {
                format.bitrate = Some(bitrate);
            }
        }
        Ok(())
    }

    fn set_event_handler(
        &mut self,
        handler: Option<Arc<dyn CodecEvents>>,
    ) -> Result<(), CodecError> {
        if self.running {
            return Err(CodecError::IllegalState(
                "set_event_handler while running".to_string(),
            ));
        }
        self.handler = handler.clone();
        self.lock().handler = handler;
        Ok(())
    }
}

impl Drop for LoopbackCodec {
    fn drop(&mut self) {
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(500);

    fn started(config: LoopbackConfig, encode: bool) -> LoopbackCodec {
        let mut codec = LoopbackCodec::new(config);
        codec
            .configure(&MediaFormat::audio("audio/raw", 1, 8_000), encode)
            .expect("configure should succeed");
        codec.start().expect("start should succeed");
        codec
    }

    fn feed(codec: &mut LoopbackCodec, data: &[u8], pts_us: i64, flags: BufferFlags) {
        let index = loop {
            match codec
                .dequeue_input_buffer(Some(WAIT))
                .expect("input dequeue should succeed")
            {
                InputPoll::Buffer(index) => break index,
                InputPoll::TryAgain => {}
            }
        };
        codec.input_buffer(index).expect("input buffer")[..data.len()].copy_from_slice(data);
        codec
            .queue_input_buffer(index, 0, data.len(), pts_us, flags)
            .expect("queue should succeed");
    }

    fn next_buffer(codec: &mut LoopbackCodec) -> (usize, BufferInfo) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match codec
                .dequeue_output_buffer(Some(WAIT))
                .expect("output dequeue should succeed")
            {
                OutputPoll::Buffer(index, info) => return (index, info),
                OutputPoll::TryAgain | OutputPoll::FormatChanged(_) => {
                    assert!(Instant::now() < deadline, "no output within 5s");
                }
                OutputPoll::BuffersChanged => {}
            }
        }
    }

    #[test]
    fn sync_identity_round_trip() {
        let mut codec = started(LoopbackConfig::default(), false);
        match codec
            .dequeue_output_buffer(Some(WAIT))
            .expect("first poll should succeed")
        {
            OutputPoll::FormatChanged(format) => assert_eq!(format.mime, "audio/raw"),
            other => panic!("expected format change first, got {other:?}"),
        }

        feed(&mut codec, &[10, 20, 30], 1_000, BufferFlags::NONE);
        let (index, info) = next_buffer(&mut codec);
        assert_eq!(info.pts_us, 1_000);
        assert_eq!(info.size, 3);
        assert_eq!(codec.output_buffer(index).expect("output buffer"), &[10, 20, 30]);
        codec
            .release_output_buffer(index, false)
            .expect("release should succeed");

        feed(&mut codec, &[], 0, BufferFlags::END_OF_STREAM);
        let (index, info) = next_buffer(&mut codec);
        assert!(info.flags.contains(BufferFlags::END_OF_STREAM));
        assert_eq!(info.size, 0);
        codec
            .release_output_buffer(index, false)
            .expect("release should succeed");
        codec.stop().expect("stop should succeed");
    }

    #[test]
    fn partial_frames_assemble_into_one_output() {
        let mut codec = started(LoopbackConfig::default(), false);
        feed(&mut codec, &[1, 2], 7_000, BufferFlags::PARTIAL_FRAME);
        feed(&mut codec, &[3, 4], 7_500, BufferFlags::NONE);
        let (index, info) = next_buffer(&mut codec);
        // pts of the first chunk wins.
        assert_eq!(info.pts_us, 7_000);
        assert_eq!(codec.output_buffer(index).expect("output buffer"), &[1, 2, 3, 4]);
    }

    #[test]
    fn reorder_window_emits_newest_first_and_eos_last() {
        let config = LoopbackConfig {
            reorder_window: 2,
            ..LoopbackConfig::default()
        };
        let mut codec = started(config, false);
        for pts in [0i64, 1_000, 2_000] {
            feed(&mut codec, &[pts as u8], pts, BufferFlags::NONE);
        }
        feed(&mut codec, &[], 0, BufferFlags::END_OF_STREAM);

        let mut order = Vec::new();
        loop {
            let (index, info) = next_buffer(&mut codec);
            let eos = info.flags.contains(BufferFlags::END_OF_STREAM);
            order.push(info.pts_us);
            codec
                .release_output_buffer(index, false)
                .expect("release should succeed");
            if eos {
                break;
            }
        }
        // Three frames held to window depth 3 then drained newest-first,
        // the marker last.
        assert_eq!(order, vec![2_000, 1_000, 0, 0]);
    }

    #[test]
    fn encoder_marks_the_first_and_requested_outputs_as_key_frames() {
        let mut codec = started(LoopbackConfig::default(), true);
        feed(&mut codec, &[1], 0, BufferFlags::NONE);
        let (index, info) = next_buffer(&mut codec);
        assert!(info.flags.contains(BufferFlags::KEY_FRAME));
        codec.release_output_buffer(index, false).expect("release");

        feed(&mut codec, &[2], 1_000, BufferFlags::NONE);
        let (index, info) = next_buffer(&mut codec);
        assert!(!info.flags.contains(BufferFlags::KEY_FRAME));
        codec.release_output_buffer(index, false).expect("release");

        codec
            .set_parameters(&FormatDelta::key_frame())
            .expect("key frame request should succeed");
        feed(&mut codec, &[3], 2_000, BufferFlags::NONE);
        let (_, info) = next_buffer(&mut codec);
        assert!(info.flags.contains(BufferFlags::KEY_FRAME));
    }

    #[test]
    fn injected_fault_poisons_the_queues() {
        let config = LoopbackConfig {
            fail_after_inputs: Some(1),
            ..LoopbackConfig::default()
        };
        let mut codec = started(config, false);
        feed(&mut codec, &[1], 0, BufferFlags::NONE);
        feed(&mut codec, &[2], 1_000, BufferFlags::NONE);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match codec.dequeue_output_buffer(Some(WAIT)) {
                Err(CodecError::Fault(_)) => break,
                Ok(OutputPoll::Buffer(index, _)) => {
                    codec.release_output_buffer(index, false).expect("release");
                }
                Ok(_) => {}
                Err(other) => panic!("unexpected error {other}"),
            }
            assert!(Instant::now() < deadline, "fault not surfaced within 5s");
        }
        assert!(matches!(
            codec.dequeue_input_buffer(Some(WAIT)),
            Err(CodecError::Fault(_))
        ));
    }

    #[test]
    fn ownership_and_lifecycle_violations_are_rejected() {
        let mut codec = LoopbackCodec::new(LoopbackConfig::default());
        assert!(matches!(
            codec.start(),
            Err(CodecError::IllegalState(_))
        ));
        codec
            .configure(&MediaFormat::audio("audio/raw", 1, 8_000), false)
            .expect("configure should succeed");
        assert!(matches!(
            codec.queue_input_buffer(0, 0, 1, 0, BufferFlags::NONE),
            Err(CodecError::IllegalState(_))
        ));
        codec.start().expect("start should succeed");
        assert!(matches!(
            codec.configure(&MediaFormat::audio("audio/raw", 1, 8_000), false),
            Err(CodecError::IllegalState(_))
        ));
        // Not dequeued, so not ours to queue.
        assert!(matches!(
            codec.queue_input_buffer(0, 0, 1, 0, BufferFlags::NONE),
            Err(CodecError::IllegalState(_))
        ));
        assert!(matches!(
            codec.output_buffer(99),
            Err(CodecError::InvalidIndex(99))
        ));
        let index = match codec.dequeue_input_buffer(Some(WAIT)) {
            Ok(InputPoll::Buffer(index)) => index,
            other => panic!("expected an input buffer, got {other:?}"),
        };
        let capacity = codec.input_buffer(index).expect("input buffer").len();
        assert!(matches!(
            codec.queue_input_buffer(index, capacity, 1, 0, BufferFlags::NONE),
            Err(CodecError::InvalidRange { .. })
        ));
    }

    #[test]
    fn flush_reclaims_every_slot() {
        let mut codec = started(LoopbackConfig::default(), false);
        for pts in [0i64, 1_000, 2_000] {
            feed(&mut codec, &[1, 2, 3], pts, BufferFlags::NONE);
        }
        codec.flush().expect("flush should succeed");
        // All input slots immediately available again.
        let mut slots = 0;
        while let Ok(InputPoll::Buffer(_)) = codec.dequeue_input_buffer(Some(WAIT)) {
            slots += 1;
            if slots == 4 {
                break;
            }
        }
        assert_eq!(slots, 4);
        // No stale output leaks across the flush.
        for _ in 0..3 {
            match codec
                .dequeue_output_buffer(Some(Duration::from_millis(100)))
                .expect("poll should succeed")
            {
                OutputPoll::Buffer(..) => panic!("stale output leaked across flush"),
                _ => {}
            }
        }
    }
}
