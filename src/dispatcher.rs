use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::contract::{BufferEvent, BufferInfo, CodecEvents, MediaFormat};

#[derive(Debug, Default)]
struct Mailbox {
    input: VecDeque<usize>,
    output: VecDeque<(usize, BufferInfo)>,
    output_format: Option<MediaFormat>,
    format_changed: bool,
    error: Option<String>,
}

// Mailbox between the codec runtime's notification threads and the single
// foreground driver thread. Producers only ever take the lock for the
// duration of a push; the consumer blocks inside the pop calls and nowhere
// else, so a producer can never be stalled behind a sleeping consumer.
#[derive(Debug, Default)]
pub struct CallbackDispatcher {
    mailbox: Mutex<Mailbox>,
    available: Condvar,
    errored: AtomicBool,
}

impl CallbackDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, index: usize) {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        mailbox.input.push_back(index);
        self.available.notify_all();
    }

    pub fn push_output(&self, index: usize, info: BufferInfo) {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        mailbox.output.push_back((index, info));
        self.available.notify_all();
    }

    // Blocks until an input slot arrives; None once the sticky error flag is
    // set and nothing is pending. There is deliberately no timeout here.
    pub fn next_input(&self) -> Option<usize> {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        loop {
            if let Some(index) = mailbox.input.pop_front() {
                return Some(index);
            }
            if mailbox.error.is_some() {
                return None;
            }
            mailbox = self
                .available
                .wait(mailbox)
                .expect("dispatcher lock poisoned");
        }
    }

    pub fn next_output(&self) -> Option<(usize, BufferInfo)> {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        loop {
            if let Some(entry) = mailbox.output.pop_front() {
                return Some(entry);
            }
            if mailbox.error.is_some() {
                return None;
            }
            mailbox = self
                .available
                .wait(mailbox)
                .expect("dispatcher lock poisoned");
        }
    }

    // Output is preferred over input: draining first bounds how much
    // produced output can pile up while the source keeps feeding.
    pub fn next_event(&self) -> Option<BufferEvent> {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        loop {
            if let Some((index, info)) = mailbox.output.pop_front() {
                return Some(BufferEvent::Output { index, info });
            }
            if let Some(index) = mailbox.input.pop_front() {
                return Some(BufferEvent::Input { index });
            }
            if mailbox.error.is_some() {
                return None;
            }
            mailbox = self
                .available
                .wait(mailbox)
                .expect("dispatcher lock poisoned");
        }
    }

    pub fn set_error(&self, description: String) {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        if mailbox.error.is_none() {
            mailbox.error = Some(description);
            self.errored.store(true, Ordering::Release);
            self.available.notify_all();
        }
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.mailbox
            .lock()
            .expect("dispatcher lock poisoned")
            .error
            .clone()
    }

    pub fn set_output_format(&self, format: MediaFormat) {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        mailbox.output_format = Some(format);
        mailbox.format_changed = true;
    }

    #[must_use]
    pub fn format_changed(&self) -> bool {
        self.mailbox
            .lock()
            .expect("dispatcher lock poisoned")
            .format_changed
    }

    #[must_use]
    pub fn output_format(&self) -> Option<MediaFormat> {
        self.mailbox
            .lock()
            .expect("dispatcher lock poisoned")
            .output_format
            .clone()
    }

    #[must_use]
    pub fn input_pending(&self) -> bool {
        !self
            .mailbox
            .lock()
            .expect("dispatcher lock poisoned")
            .input
            .is_empty()
    }

    // Caller must guarantee no concurrent push: only invoked between
    // stop/configure, or after the codec has quiesced for a flush.
    pub fn reset(&self) {
        let mut mailbox = self.mailbox.lock().expect("dispatcher lock poisoned");
        mailbox.input.clear();
        mailbox.output.clear();
        mailbox.output_format = None;
        mailbox.format_changed = false;
        mailbox.error = None;
        self.errored.store(false, Ordering::Release);
    }
}

impl CodecEvents for CallbackDispatcher {
    fn on_input_available(&self, index: usize) {
        self.push_input(index);
    }

    fn on_output_available(&self, index: usize, info: BufferInfo) {
        self.push_output(index, info);
    }

    fn on_format_changed(&self, format: MediaFormat) {
        log::info!("output format changed: {format}");
        self.set_output_format(format);
    }

    fn on_error(&self, description: String) {
        log::error!("codec runtime signalled error: {description}");
        self.set_error(description);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::contract::BufferFlags;

    fn output_info(pts_us: i64) -> BufferInfo {
        BufferInfo::new(0, 16, pts_us, BufferFlags::NONE)
    }

    #[test]
    fn events_pop_in_push_order_per_queue() {
        let dispatcher = CallbackDispatcher::new();
        dispatcher.push_input(3);
        dispatcher.push_input(1);
        assert_eq!(dispatcher.next_input(), Some(3));
        assert_eq!(dispatcher.next_input(), Some(1));
    }

    #[test]
    fn next_event_prefers_output_over_input() {
        let dispatcher = CallbackDispatcher::new();
        dispatcher.push_input(0);
        dispatcher.push_output(7, output_info(42));
        match dispatcher.next_event() {
            Some(BufferEvent::Output { index, info }) => {
                assert_eq!(index, 7);
                assert_eq!(info.pts_us, 42);
            }
            other => panic!("expected output event, got {other:?}"),
        }
        assert_eq!(dispatcher.next_event(), Some(BufferEvent::Input { index: 0 }));
    }

    #[test]
    fn pending_events_drain_before_error_sentinel() {
        let dispatcher = CallbackDispatcher::new();
        dispatcher.push_input(5);
        dispatcher.set_error("bang".to_string());
        assert_eq!(dispatcher.next_input(), Some(5));
        assert_eq!(dispatcher.next_input(), None);
        assert_eq!(dispatcher.error().as_deref(), Some("bang"));
    }

    #[test]
    fn set_error_wakes_a_blocked_waiter() {
        let dispatcher = Arc::new(CallbackDispatcher::new());
        let waiter = Arc::clone(&dispatcher);
        let handle = thread::spawn(move || waiter.next_output());
        thread::sleep(Duration::from_millis(50));
        dispatcher.set_error("device lost".to_string());
        assert_eq!(handle.join().expect("waiter thread panicked"), None);
        assert!(dispatcher.has_error());
    }

    #[test]
    fn reset_clears_queues_flags_and_format() {
        let dispatcher = CallbackDispatcher::new();
        dispatcher.push_input(1);
        dispatcher.push_output(2, output_info(0));
        dispatcher.set_output_format(MediaFormat::audio("audio/raw", 2, 48_000));
        dispatcher.set_error("stale".to_string());

        dispatcher.reset();
        assert!(!dispatcher.has_error());
        assert!(!dispatcher.format_changed());
        assert!(dispatcher.output_format().is_none());
        assert!(!dispatcher.input_pending());
    }

    #[test]
    fn latest_format_replaces_the_prior_one() {
        let dispatcher = CallbackDispatcher::new();
        dispatcher.set_output_format(MediaFormat::audio("audio/raw", 1, 8_000));
        dispatcher.set_output_format(MediaFormat::audio("audio/raw", 2, 48_000));
        let format = dispatcher.output_format().expect("format should be set");
        assert_eq!(
            format.kind,
            crate::contract::StreamKind::Audio {
                channels: 2,
                sample_rate_hz: 48_000
            }
        );
    }
}
