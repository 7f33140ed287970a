//! Flow-controlled streaming buffers over a readiness registration.
//!
//! [`IncomingBuffer`] reads from a receiver callable in blocks of up to
//! `block_size` bytes into an internal queue and completes a pending task
//! when a byte threshold is reached or a delimiter is found.
//! [`OutcomingBuffer`] queues user writes and flushes them in blocks through
//! a transmitter callable, completing its task when the queued size falls to
//! the threshold.
//!
//! Both directions share the same skeleton, held in a private `BufferCore`:
//! the byte queue, the capacity parameters, the flow-control collaborator,
//! the paused flag, and the last transfer error. There is no open subclass
//! hook; the two variants are the closed set of directions.
//!
//! # Flow control
//!
//! The buffer does not own its readiness registration. It is parameterized
//! by a `flow_ctrl(resume) -> bool` collaborator supplied by the enclosing
//! layer: `flow_ctrl(true)` arms the registration for the buffer's operative
//! direction, `flow_ctrl(false)` disarms it, and the return value reports
//! success so the buffer's `paused` state stays accurate. An incoming buffer
//! pauses when full and resumes on dequeue; an outcoming buffer pauses when
//! drained or on error and resumes on write.
//!
//! # Tasks
//!
//! A task is installed with `setup(...)`, which returns an early result:
//! `>= 1` ready now, `0` must wait, `-1` cannot be satisfied. Task completion
//! is single-shot: delivering a completion or error takes the handler out of
//! its slot before invoking it, so a handler fires at most once per `setup`
//! and may install a new task from inside the callback. The handler receives
//! the buffer itself, which identifies the event source without any captured
//! back-reference.
//!
//! # Errors
//!
//! A receiver/transmitter returning `(0, 0)` is EOF/reset; a positive error
//! code is a transport error recorded in `last_error()`. Either pauses the
//! buffer, clears the task, and delivers `BUFFER|ERROR`. The queue survives:
//! buffered bytes may still be drained after a receive error, and writes
//! after a transmit error keep queueing until a new task resumes flushing.

use crate::error::{Error, Result};
use crate::events::Events;

/// Arms (`true`) or disarms (`false`) the buffer's readiness registration.
pub type FlowCtrl = Box<dyn FnMut(bool) -> bool>;

/// Receives up to `dst.len()` bytes; returns `(bytes_received, error_code)`.
///
/// `(0, 0)` means EOF/connection-reset; a positive error code is a transport
/// error and the byte count is ignored.
pub type Receiver = Box<dyn FnMut(&mut [u8]) -> (usize, i32)>;

/// Transmits up to `src.len()` bytes; returns `(bytes_sent, error_code)`.
///
/// Same conventions as [`Receiver`].
pub type Transmitter = Box<dyn FnMut(&[u8]) -> (usize, i32)>;

/// Shared byte store and flow-control plumbing of both buffer directions.
struct BufferCore {
    flow_ctrl: FlowCtrl,
    buff: Vec<u8>,
    block_size: usize,
    max_size: usize,
    paused: bool,
    last_error: i32,
    released: bool,
}

impl BufferCore {
    fn new(flow_ctrl: FlowCtrl, block_size: usize, max_size: usize) -> Self {
        assert!(
            block_size > 0
                && block_size % 8 == 0
                && block_size < max_size
                && max_size % block_size == 0,
            "buffer sizes must satisfy: block_size > 0, block_size % 8 == 0, \
             block_size < max_size, max_size % block_size == 0"
        );
        Self {
            flow_ctrl,
            buff: Vec::new(),
            block_size,
            max_size,
            paused: true,
            last_error: 0,
            released: false,
        }
    }

    fn resume(&mut self) {
        if self.paused {
            self.paused = !(self.flow_ctrl)(true);
        }
    }

    fn pause(&mut self) {
        if !self.paused {
            self.paused = (self.flow_ctrl)(false);
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Event-driven incoming buffer: receiver → queue → read task.
pub struct IncomingBuffer {
    core: BufferCore,
    receiver: Receiver,
    task: Option<Box<dyn FnMut(&mut IncomingBuffer, Events)>>,
    delimiter: Vec<u8>,
    threshold: usize,
}

impl IncomingBuffer {
    /// Creates a buffer reading through `receiver`, armed for its operative
    /// direction via `flow_ctrl`.
    ///
    /// # Panics
    ///
    /// Panics unless `block_size > 0`, `block_size % 8 == 0`,
    /// `block_size < max_size` and `max_size % block_size == 0`.
    pub fn new(
        receiver: Receiver,
        flow_ctrl: FlowCtrl,
        block_size: usize,
        max_size: usize,
    ) -> Self {
        let mut buffer = Self {
            core: BufferCore::new(flow_ctrl, block_size, max_size),
            receiver,
            task: None,
            delimiter: Vec::new(),
            threshold: max_size,
        };
        buffer.core.resume();
        buffer
    }

    /// Returns true if a task is awaiting completion.
    #[must_use]
    pub fn active(&self) -> bool {
        self.task.is_some()
    }

    /// Returns true if the readiness registration is armed.
    #[must_use]
    pub fn running(&self) -> bool {
        !self.core.paused
    }

    /// Current queued byte count.
    #[must_use]
    pub fn size(&self) -> usize {
        self.core.buff.len()
    }

    /// Transfer granule in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.core.block_size
    }

    /// Queue capacity in bytes.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.core.max_size
    }

    /// Last error code reported by the receiver, 0 if none.
    #[must_use]
    pub fn last_error(&self) -> i32 {
        self.core.last_error
    }

    /// Evaluates the read-task predicate against the current queue.
    ///
    /// With an empty delimiter the task is ready (result = threshold) once
    /// `size() >= threshold`. With a delimiter the result is the end offset
    /// of the first match, provided it lies below the threshold; `-1` means
    /// the task cannot complete (no match within the threshold). `0` means
    /// the task must wait. Evaluated against the most recent task parameters,
    /// so a handler may interrogate it during delivery.
    #[must_use]
    pub fn last_result(&self) -> isize {
        if !self.delimiter.is_empty() {
            if let Some(pos) = find_subsequence(&self.core.buff, &self.delimiter) {
                let result = pos + self.delimiter.len();
                if result < self.threshold {
                    result as isize
                } else {
                    -1
                }
            } else if self.size() >= self.threshold {
                -1
            } else {
                0
            }
        } else if self.size() >= self.threshold {
            self.threshold as isize
        } else {
            0
        }
    }

    /// Installs a read task, replacing any prior one.
    ///
    /// `threshold` is clamped to `[0, max_size]`. Returns the early result
    /// (`>= 1` ready now, `0` must wait, `-1` immediate delimiter overflow);
    /// when the task must wait the readiness registration is resumed.
    ///
    /// # Errors
    ///
    /// Returns [`CannotSetupWatching`](crate::ErrorKind::CannotSetupWatching)
    /// if the buffer has been released.
    pub fn setup<F>(
        &mut self,
        handler: F,
        delimiter: impl Into<Vec<u8>>,
        threshold: usize,
    ) -> Result<isize>
    where
        F: FnMut(&mut IncomingBuffer, Events) + 'static,
    {
        if self.core.released {
            return Err(Error::cannot_setup("buffer is inactive"));
        }
        self.threshold = threshold.min(self.core.max_size);
        self.delimiter = delimiter.into();
        self.task = Some(Box::new(handler));
        let early = self.last_result();
        if early == 0 {
            self.core.resume();
        }
        Ok(early)
    }

    /// Dequeues up to `min(number, size())` bytes.
    ///
    /// Dequeuing frees capacity, so the readiness registration is resumed.
    pub fn read(&mut self, number: usize) -> Vec<u8> {
        if self.core.released {
            return Vec::new();
        }
        let number = number.min(self.size());
        if number == 0 {
            return Vec::new();
        }
        let out: Vec<u8> = self.core.buff.drain(..number).collect();
        self.core.resume();
        out
    }

    /// Clears any pending task without delivering a completion event.
    ///
    /// Returns whether a task was pending; false on a released buffer.
    pub fn cancel(&mut self) -> bool {
        if self.core.released {
            return false;
        }
        self.task.take().is_some()
    }

    /// Delivers one final `CLEANUP` to a pending task, clears the queue and
    /// transitions to released. All mutators are no-ops afterwards.
    pub fn cleanup(&mut self) {
        if self.core.released {
            return;
        }
        if let Some(mut task) = self.task.take() {
            task(self, Events::CLEANUP);
            // CLEANUP is the last event for this buffer; a task installed
            // from inside the handler is dropped without delivery.
            self.task = None;
        }
        self.core.buff.clear();
        self.core.pause();
        self.core.released = true;
    }

    /// Handles one readiness notification for the operative direction.
    ///
    /// Performs at most one bounded block transfer, applies the pause
    /// policy, and delivers a single-shot completion or error to a pending
    /// task as described in the module docs.
    pub fn handle_event(&mut self, revents: Events) {
        if self.core.released || !revents.intersects(Events::READ | Events::ERROR) {
            return;
        }
        self.core.last_error = 0;
        let mut revents = revents;
        if revents == Events::READ {
            revents = Events::NONE;
            let number = (self.core.max_size - self.core.buff.len()).min(self.core.block_size);
            if number > 0 {
                let from = self.core.buff.len();
                self.core.buff.resize(from + number, 0);
                let (received, errno) = (self.receiver)(&mut self.core.buff[from..from + number]);
                let received = received.min(number);
                self.core.buff.truncate(from + received);
                if received == 0 {
                    revents = Events::BUFFER | Events::ERROR;
                    if errno > 0 {
                        self.core.last_error = errno;
                    }
                }
            }
        }
        if revents.is_error() || self.core.buff.len() >= self.core.max_size {
            self.core.pause();
        }
        if self.task.is_none() {
            return;
        }
        let delivery = if revents.is_error() {
            // A completion that coincides with receiver EOF/error is
            // reported as one combined revent.
            if revents.is_buffer() && self.last_result() > 0 {
                revents | Events::READ
            } else {
                revents
            }
        } else {
            match self.last_result() {
                r if r > 0 => Events::BUFFER | Events::READ,
                r if r < 0 => Events::BUFFER | Events::ERROR | Events::READ,
                _ => Events::NONE,
            }
        };
        if !delivery.is_empty() {
            let mut task = self.task.take().expect("pending task");
            task(self, delivery);
        }
    }
}

/// Event-driven outcoming buffer: write → queue → transmitter.
pub struct OutcomingBuffer {
    core: BufferCore,
    transmitter: Transmitter,
    task: Option<Box<dyn FnMut(&mut OutcomingBuffer, Events)>>,
    threshold: usize,
}

impl OutcomingBuffer {
    /// Creates a buffer flushing through `transmitter`, armed for its
    /// operative direction via `flow_ctrl`.
    ///
    /// # Panics
    ///
    /// Panics unless `block_size > 0`, `block_size % 8 == 0`,
    /// `block_size < max_size` and `max_size % block_size == 0`.
    pub fn new(
        transmitter: Transmitter,
        flow_ctrl: FlowCtrl,
        block_size: usize,
        max_size: usize,
    ) -> Self {
        let mut buffer = Self {
            core: BufferCore::new(flow_ctrl, block_size, max_size),
            transmitter,
            task: None,
            threshold: 0,
        };
        buffer.core.resume();
        buffer
    }

    /// Returns true if a task is awaiting completion.
    #[must_use]
    pub fn active(&self) -> bool {
        self.task.is_some()
    }

    /// Returns true if the readiness registration is armed.
    #[must_use]
    pub fn running(&self) -> bool {
        !self.core.paused
    }

    /// Current queued byte count.
    #[must_use]
    pub fn size(&self) -> usize {
        self.core.buff.len()
    }

    /// Transfer granule in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.core.block_size
    }

    /// Queue capacity in bytes.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.core.max_size
    }

    /// Last error code reported by the transmitter, 0 if none.
    #[must_use]
    pub fn last_error(&self) -> i32 {
        self.core.last_error
    }

    /// Evaluates the write-task predicate: 1 once `size() <= threshold`,
    /// 0 while the queue is still above it.
    #[must_use]
    pub fn last_result(&self) -> isize {
        isize::from(self.size() <= self.threshold)
    }

    /// Installs a write task, replacing any prior one.
    ///
    /// `threshold` is clamped to `[0, max_size - block_size]`. Returns the
    /// early result (1 if already satisfied, else 0); when the task must
    /// wait the readiness registration is resumed.
    ///
    /// # Errors
    ///
    /// Returns [`CannotSetupWatching`](crate::ErrorKind::CannotSetupWatching)
    /// if the buffer has been released.
    pub fn setup<F>(&mut self, handler: F, threshold: usize) -> Result<isize>
    where
        F: FnMut(&mut OutcomingBuffer, Events) + 'static,
    {
        if self.core.released {
            return Err(Error::cannot_setup("buffer is inactive"));
        }
        self.threshold = threshold.min(self.core.max_size - self.core.block_size);
        self.task = Some(Box::new(handler));
        let early = self.last_result();
        if early == 0 {
            self.core.resume();
        }
        Ok(early)
    }

    /// Enqueues up to `min(data.len(), max_size - size())` bytes.
    ///
    /// Returns the number of bytes queued and resumes flushing when any
    /// were.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.core.released {
            return 0;
        }
        let number = data.len().min(self.core.max_size - self.core.buff.len());
        if number > 0 {
            self.core.buff.extend_from_slice(&data[..number]);
            self.core.resume();
        }
        number
    }

    /// Clears any pending task without delivering a completion event.
    ///
    /// Returns whether a task was pending; false on a released buffer.
    pub fn cancel(&mut self) -> bool {
        if self.core.released {
            return false;
        }
        self.task.take().is_some()
    }

    /// Delivers one final `CLEANUP` to a pending task, clears the queue and
    /// transitions to released. All mutators are no-ops afterwards.
    pub fn cleanup(&mut self) {
        if self.core.released {
            return;
        }
        if let Some(mut task) = self.task.take() {
            task(self, Events::CLEANUP);
            self.task = None;
        }
        self.core.buff.clear();
        self.core.pause();
        self.core.released = true;
    }

    /// Handles one readiness notification for the operative direction.
    ///
    /// Performs at most one bounded block transfer, applies the pause
    /// policy, and delivers a single-shot completion or error to a pending
    /// task as described in the module docs.
    pub fn handle_event(&mut self, revents: Events) {
        if self.core.released || !revents.intersects(Events::WRITE | Events::ERROR) {
            return;
        }
        self.core.last_error = 0;
        let mut revents = revents;
        if revents == Events::WRITE {
            revents = Events::NONE;
            let number = self.core.block_size.min(self.core.buff.len());
            if number > 0 {
                let (sent, errno) = (self.transmitter)(&self.core.buff[..number]);
                let sent = sent.min(number);
                if sent > 0 {
                    self.core.buff.drain(..sent);
                } else {
                    revents = Events::BUFFER | Events::ERROR;
                    if errno > 0 {
                        self.core.last_error = errno;
                    }
                }
            }
        }
        if revents.is_error() || self.core.buff.is_empty() {
            self.core.pause();
        }
        if self.task.is_none() {
            return;
        }
        let delivery = if revents.is_error() {
            revents
        } else if self.last_result() > 0 {
            Events::BUFFER | Events::WRITE
        } else {
            Events::NONE
        };
        if !delivery.is_empty() {
            let mut task = self.task.take().expect("pending task");
            task(self, delivery);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    /// Receiver fed from a shared script of pending bytes.
    fn scripted_receiver(feed: &Rc<RefCell<Vec<u8>>>) -> Receiver {
        let feed = feed.clone();
        Box::new(move |dst| {
            let mut feed = feed.borrow_mut();
            let n = feed.len().min(dst.len());
            dst[..n].copy_from_slice(&feed[..n]);
            feed.drain(..n);
            (n, 0)
        })
    }

    fn accepting_flow_ctrl() -> FlowCtrl {
        Box::new(|_| true)
    }

    #[test]
    #[should_panic(expected = "buffer sizes")]
    fn invalid_block_size_is_rejected() {
        let _ = IncomingBuffer::new(
            Box::new(|_| (0, 0)),
            accepting_flow_ctrl(),
            7,
            32,
        );
    }

    #[test]
    #[should_panic(expected = "buffer sizes")]
    fn max_size_must_be_a_multiple_of_block_size() {
        let _ = OutcomingBuffer::new(
            Box::new(|_| (0, 0)),
            accepting_flow_ctrl(),
            8,
            30,
        );
    }

    #[test]
    fn incoming_starts_running_without_task() {
        init_test("incoming_starts_running_without_task");
        let feed = Rc::new(RefCell::new(Vec::new()));
        let buffer = IncomingBuffer::new(scripted_receiver(&feed), accepting_flow_ctrl(), 8, 32);
        assert!(!buffer.active());
        assert!(buffer.running());
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.last_error(), 0);
        crate::test_complete!("incoming_starts_running_without_task");
    }

    #[test]
    fn incoming_threshold_task_is_single_shot() {
        init_test("incoming_threshold_task_is_single_shot");
        let feed = Rc::new(RefCell::new(b"0123456789ABCDEF".to_vec()));
        let mut buffer =
            IncomingBuffer::new(scripted_receiver(&feed), accepting_flow_ctrl(), 8, 32);

        let fired: Rc<RefCell<Vec<(Events, isize)>>> = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        let early = buffer
            .setup(
                move |buffer, revents| {
                    fired2.borrow_mut().push((revents, buffer.last_result()));
                },
                Vec::new(),
                8,
            )
            .expect("setup");
        crate::assert_with_log!(early == 0, "task must wait", 0isize, early);
        assert!(buffer.active());

        buffer.handle_event(Events::READ);
        crate::assert_with_log!(
            fired.borrow().as_slice() == [(Events::BUFFER | Events::READ, 8)],
            "one completion with ready result",
            vec![(Events::BUFFER | Events::READ, 8isize)],
            fired.borrow().clone()
        );
        // Single-shot: the slot is consumed, further ticks deliver nothing.
        assert!(!buffer.active());
        buffer.handle_event(Events::READ);
        assert_eq!(fired.borrow().len(), 1);
        assert_eq!(buffer.size(), 16);
        crate::test_complete!("incoming_threshold_task_is_single_shot");
    }

    #[test]
    fn incoming_delimiter_early_result() {
        init_test("incoming_delimiter_early_result");
        let feed = Rc::new(RefCell::new(b"abc\ndef".to_vec()));
        let mut buffer =
            IncomingBuffer::new(scripted_receiver(&feed), accepting_flow_ctrl(), 8, 32);
        buffer.handle_event(Events::READ);
        assert_eq!(buffer.size(), 7);

        let early = buffer
            .setup(|_, _| {}, b"\n".to_vec(), 32)
            .expect("setup");
        crate::assert_with_log!(early == 4, "match ends at offset 4", 4isize, early);
        let data = buffer.read(early as usize);
        assert_eq!(data, b"abc\n");
        crate::test_complete!("incoming_delimiter_early_result");
    }

    #[test]
    fn incoming_receive_error_pauses_and_clears_task() {
        init_test("incoming_receive_error_pauses_and_clears_task");
        let mut buffer = IncomingBuffer::new(
            Box::new(|_| (0, 13)),
            accepting_flow_ctrl(),
            8,
            32,
        );
        let fired: Rc<RefCell<Vec<Events>>> = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        buffer
            .setup(move |_, revents| fired2.borrow_mut().push(revents), Vec::new(), 8)
            .expect("setup");

        buffer.handle_event(Events::READ);
        assert_eq!(fired.borrow().as_slice(), [Events::BUFFER | Events::ERROR]);
        assert_eq!(buffer.last_error(), 13);
        assert!(!buffer.active());
        assert!(!buffer.running());
        crate::test_complete!("incoming_receive_error_pauses_and_clears_task");
    }

    #[test]
    fn released_incoming_refuses_setup_and_ignores_mutators() {
        init_test("released_incoming_refuses_setup_and_ignores_mutators");
        let feed = Rc::new(RefCell::new(b"abcdefgh".to_vec()));
        let mut buffer =
            IncomingBuffer::new(scripted_receiver(&feed), accepting_flow_ctrl(), 8, 32);
        buffer.handle_event(Events::READ);
        assert_eq!(buffer.size(), 8);

        let cleanups: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
        let cleanups2 = cleanups.clone();
        buffer
            .setup(
                move |_, revents| {
                    assert!(revents.is_cleanup());
                    *cleanups2.borrow_mut() += 1;
                },
                Vec::new(),
                32,
            )
            .expect("setup");

        buffer.cleanup();
        crate::assert_with_log!(*cleanups.borrow() == 1, "one cleanup", 1u32, *cleanups.borrow());
        assert_eq!(buffer.size(), 0);

        // Idempotent and inert afterwards.
        buffer.cleanup();
        assert_eq!(*cleanups.borrow(), 1);
        assert!(buffer.setup(|_, _| {}, Vec::new(), 8).is_err());
        assert!(!buffer.cancel());
        assert!(buffer.read(8).is_empty());
        buffer.handle_event(Events::READ);
        assert_eq!(buffer.size(), 0);
        crate::test_complete!("released_incoming_refuses_setup_and_ignores_mutators");
    }

    #[test]
    fn outcoming_write_clamps_to_capacity() {
        init_test("outcoming_write_clamps_to_capacity");
        let mut buffer = OutcomingBuffer::new(
            Box::new(|src| (src.len(), 0)),
            accepting_flow_ctrl(),
            8,
            16,
        );
        let written = buffer.write(b"0123456789ABCDEFZZZ");
        crate::assert_with_log!(written == 16, "clamped to max_size", 16usize, written);
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.write(b"more"), 0);
        crate::test_complete!("outcoming_write_clamps_to_capacity");
    }

    #[test]
    fn outcoming_threshold_task_completes_once() {
        init_test("outcoming_threshold_task_completes_once");
        let mut buffer = OutcomingBuffer::new(
            Box::new(|src| (src.len(), 0)),
            accepting_flow_ctrl(),
            8,
            16,
        );
        buffer.write(b"0123456789ABCDEF");

        let fired: Rc<RefCell<Vec<(Events, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        let early = buffer
            .setup(
                move |buffer, revents| fired2.borrow_mut().push((revents, buffer.size())),
                0,
            )
            .expect("setup");
        assert_eq!(early, 0);

        buffer.handle_event(Events::WRITE);
        assert_eq!(buffer.size(), 8);
        assert!(fired.borrow().is_empty());

        buffer.handle_event(Events::WRITE);
        crate::assert_with_log!(
            fired.borrow().as_slice() == [(Events::BUFFER | Events::WRITE, 0)],
            "completion at empty queue",
            vec![(Events::BUFFER | Events::WRITE, 0usize)],
            fired.borrow().clone()
        );
        assert!(!buffer.active());
        assert!(!buffer.running());
        crate::test_complete!("outcoming_threshold_task_completes_once");
    }

    #[test]
    fn outcoming_transmit_error_reports_and_pauses() {
        init_test("outcoming_transmit_error_reports_and_pauses");
        let mut buffer = OutcomingBuffer::new(
            Box::new(|_| (0, 13)),
            accepting_flow_ctrl(),
            8,
            16,
        );
        buffer.write(b"012345");
        let fired: Rc<RefCell<Vec<Events>>> = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        buffer
            .setup(move |_, revents| fired2.borrow_mut().push(revents), 4)
            .expect("setup");

        buffer.handle_event(Events::WRITE);
        assert_eq!(fired.borrow().as_slice(), [Events::BUFFER | Events::ERROR]);
        assert_eq!(buffer.last_error(), 13);
        assert_eq!(buffer.size(), 6);
        assert!(!buffer.active());
        assert!(!buffer.running());

        // Bytes still queue after the error; nothing flushes without a task.
        assert_eq!(buffer.write(b"ab"), 2);
        assert!(buffer.running());
        crate::test_complete!("outcoming_transmit_error_reports_and_pauses");
    }

    #[test]
    fn reactor_error_revent_is_forwarded_verbatim() {
        init_test("reactor_error_revent_is_forwarded_verbatim");
        let mut buffer = OutcomingBuffer::new(
            Box::new(|src| (src.len(), 0)),
            accepting_flow_ctrl(),
            8,
            16,
        );
        buffer.write(b"abc");
        let fired: Rc<RefCell<Vec<Events>>> = Rc::new(RefCell::new(Vec::new()));
        let fired2 = fired.clone();
        buffer
            .setup(move |_, revents| fired2.borrow_mut().push(revents), 0)
            .expect("setup");

        buffer.handle_event(Events::ERROR);
        assert_eq!(fired.borrow().as_slice(), [Events::ERROR]);
        assert_eq!(buffer.last_error(), 0);
        assert!(!buffer.active());
        assert!(!buffer.running());
        crate::test_complete!("reactor_error_revent_is_forwarded_verbatim");
    }

    #[test]
    fn handler_may_install_followup_task() {
        init_test("handler_may_install_followup_task");
        let feed = Rc::new(RefCell::new(b"aaaa\nbbbb\n".to_vec()));
        let mut buffer =
            IncomingBuffer::new(scripted_receiver(&feed), accepting_flow_ctrl(), 8, 32);

        let lines: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let lines2 = lines.clone();
        fn install(buffer: &mut IncomingBuffer, lines: Rc<RefCell<Vec<Vec<u8>>>>) {
            let again = lines.clone();
            let early = buffer
                .setup(
                    move |buffer, revents| {
                        assert!(revents.contains(Events::BUFFER | Events::READ));
                        let n = buffer.last_result();
                        again.borrow_mut().push(buffer.read(n as usize));
                        install(buffer, again.clone());
                    },
                    b"\n".to_vec(),
                    32,
                )
                .expect("setup");
            assert!(early >= 0);
        }
        install(&mut buffer, lines2);

        buffer.handle_event(Events::READ);
        buffer.handle_event(Events::READ);
        crate::assert_with_log!(
            lines.borrow().len() == 2,
            "two delimited reads",
            2usize,
            lines.borrow().len()
        );
        assert_eq!(lines.borrow()[0], b"aaaa\n");
        assert_eq!(lines.borrow()[1], b"bbbb\n");
        crate::test_complete!("handler_may_install_followup_task");
    }
}
