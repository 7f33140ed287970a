//! The shipped reactor: a `polling`-based dispatch loop.
//!
//! [`PlatformLoop`] multiplexes three registration kinds over one poller:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PlatformLoop                          │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐  │
//! │  │   Poller   │  │ TimerHeap  │  │  signal self-pipes     │  │
//! │  │ (readiness)│  │ (deadlines)│  │  (signal-hook → fd)    │  │
//! │  └────────────┘  └────────────┘  └────────────────────────┘  │
//! │            registration table: id → (kind, handler)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The poller is oneshot: after a readiness event is delivered the source is
//! disabled until re-armed. Each fired source is re-armed with its current
//! interest before its handler runs, which restores level-triggered
//! semantics for the watchers layered on top.
//!
//! OS signals are bridged through a self-pipe per registration:
//! `signal-hook` writes a byte into one end from the signal handler, the
//! other end is registered with the poller, and the dispatch pass drains it
//! and fires the installed handler with a `SIGNAL` revent.
//!
//! # Batch dispatch
//!
//! One [`run_once`](crate::reactor::Reactor::run_once) call processes one
//! batch. Handlers are invoked with no internal borrow held, so they may
//! register, cancel, transfer, or stop the loop. Each registration is
//! re-checked immediately before its handler is invoked, so a cancellation
//! issued by an earlier handler of the same batch suppresses delivery.
//!
//! NOTE: This module uses unsafe to register raw file descriptors with the
//! poller — `Poller::add`/`modify`/`delete` cannot verify fd validity at
//! compile time. The safety invariants are documented inline: callers keep a
//! registered fd valid until it is cancelled
//! ([`Reactor::register_io`](crate::reactor::Reactor::register_io)), and the
//! signal pipe fds are owned by their registration entry.

#![allow(unsafe_code)]

use crate::error::{Error, ErrorKind};
use crate::events::Events;
use crate::reactor::timer::TimerHeap;
use crate::reactor::{OnEvent, Payload, Reactor, RegistrationId};
use polling::{Event as PollEvent, Poller};
use signal_hook::SigId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One live registration.
struct Entry {
    kind: EntryKind,
    handler: OnEvent,
    payload: Payload,
}

enum EntryKind {
    Io {
        fd: RawFd,
        mode: Events,
    },
    Timer {
        repeat: Duration,
    },
    Signal {
        sig_id: SigId,
        read: UnixStream,
        // Held so the write end outlives the signal-hook registration.
        _write: UnixStream,
    },
}

struct Inner {
    poller: Poller,
    entries: HashMap<u64, Entry>,
    timers: TimerHeap,
    next_id: u64,
    now: Instant,
}

/// Single-threaded reactor façade running the event-dispatch loop.
///
/// Construct with [`create`](PlatformLoop::create); the returned `Rc` is
/// shared between the dispatcher and every watcher registered to it, and the
/// last holder drops the poller.
///
/// [`start`](PlatformLoop::start) is re-entrancy-unsafe: invoking it from a
/// handler is undefined.
pub struct PlatformLoop {
    inner: RefCell<Inner>,
    running: Cell<bool>,
}

impl PlatformLoop {
    /// Creates a new loop behind a shared handle.
    ///
    /// # Errors
    ///
    /// Fails only if the underlying poller cannot be created, e.g. when out
    /// of file descriptors.
    pub fn create() -> crate::Result<Rc<Self>> {
        let poller = Poller::new().map_err(|e| {
            Error::new(ErrorKind::ReactorCreate)
                .with_context("poller creation failed")
                .with_source(e)
        })?;
        Ok(Rc::new(Self {
            inner: RefCell::new(Inner {
                poller,
                entries: HashMap::new(),
                timers: TimerHeap::new(),
                next_id: 1,
                now: Instant::now(),
            }),
            running: Cell::new(false),
        }))
    }

    /// Returns true between entry of [`start`](PlatformLoop::start) and its
    /// return.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running.get()
    }

    /// Enters the dispatch loop.
    ///
    /// Processes one batch of ready events per iteration and returns when
    /// [`stop`](PlatformLoop::stop) has been called or no registrations
    /// remain.
    pub fn start(&self) {
        self.running.set(true);
        while self.running.get() {
            match self.run_once() {
                Ok(true) => {}
                Ok(false) => self.running.set(false),
                Err(err) => {
                    tracing::error!(error = %err, "poll failed, stopping dispatch");
                    self.running.set(false);
                }
            }
        }
    }

    /// Requests exit at the next safe point; idempotent.
    pub fn stop(&self) {
        if self.running.get() {
            self.running.set(false);
            let _ = self.inner.borrow().poller.notify();
        }
    }

    /// Converts a readiness mode to the poller's interest event.
    fn poll_interest(key: usize, mode: Events) -> PollEvent {
        match (mode.is_read(), mode.is_write()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    fn next_id(inner: &mut Inner) -> u64 {
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }
}

impl Reactor for PlatformLoop {
    fn register_io(
        &self,
        fd: RawFd,
        mode: Events,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId> {
        let mode = mode.rw_mode();
        if fd < 0 || mode.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "io registration needs a valid fd and a nonzero READ/WRITE mode",
            ));
        }
        let mut inner = self.inner.borrow_mut();
        let key = Self::next_id(&mut inner);
        // SAFETY: the caller keeps `fd` valid until this registration is
        // cancelled (register_io contract); cancel() deletes the fd from the
        // poller before the entry is dropped.
        unsafe {
            inner.poller.add(fd, Self::poll_interest(key as usize, mode))?;
        }
        inner.entries.insert(
            key,
            Entry {
                kind: EntryKind::Io { fd, mode },
                handler,
                payload,
            },
        );
        tracing::trace!(key, fd, ?mode, "registered io watch");
        Ok(RegistrationId(key))
    }

    fn register_timer(
        &self,
        after: Duration,
        repeat: Duration,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId> {
        let mut inner = self.inner.borrow_mut();
        let key = Self::next_id(&mut inner);
        // Deadline from the real clock, not the cached batch time, so timers
        // do not inherit the dispatch drift of the current iteration.
        let deadline = Instant::now() + after;
        inner.timers.insert(RegistrationId(key), deadline);
        inner.entries.insert(
            key,
            Entry {
                kind: EntryKind::Timer { repeat },
                handler,
                payload,
            },
        );
        tracing::trace!(key, after_ms = after.as_millis() as u64, repeat_ms = repeat.as_millis() as u64, "registered timer");
        Ok(RegistrationId(key))
    }

    fn register_signal(
        &self,
        signum: i32,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId> {
        if signum <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "signal registration needs a positive signal number",
            ));
        }
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        let sig_id = signal_hook::low_level::pipe::register_raw(signum, write.as_raw_fd())?;

        let mut inner = self.inner.borrow_mut();
        let key = Self::next_id(&mut inner);
        // SAFETY: the read end is owned by the registration entry inserted
        // below, so the fd outlives its poller registration; cancel()
        // deletes it before the entry (and the stream) is dropped.
        let added = unsafe {
            inner
                .poller
                .add(read.as_raw_fd(), PollEvent::readable(key as usize))
        };
        if let Err(err) = added {
            signal_hook::low_level::unregister(sig_id);
            return Err(err);
        }
        inner.entries.insert(
            key,
            Entry {
                kind: EntryKind::Signal {
                    sig_id,
                    read,
                    _write: write,
                },
                handler,
                payload,
            },
        );
        tracing::trace!(key, signum, "registered signal watch");
        Ok(RegistrationId(key))
    }

    fn cancel(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(entry) = inner.entries.remove(&id.0) else {
            return false;
        };
        match entry.kind {
            EntryKind::Io { fd, .. } => {
                // SAFETY: the fd was still registered (its entry was live a
                // moment ago) and the caller keeps it valid until this
                // cancel returns.
                let _ = unsafe { inner.poller.delete(fd) };
            }
            // Heap entries of cancelled timers are skipped lazily.
            EntryKind::Timer { .. } => {}
            EntryKind::Signal { sig_id, read, .. } => {
                signal_hook::low_level::unregister(sig_id);
                // SAFETY: the read end is still owned by the removed entry
                // binding and is dropped only after this delete.
                let _ = unsafe { inner.poller.delete(read.as_raw_fd()) };
            }
        }
        tracing::trace!(key = id.0, "cancelled registration");
        true
    }

    fn is_armed(&self, id: RegistrationId) -> bool {
        self.inner.borrow().entries.contains_key(&id.0)
    }

    fn registration_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    fn run_once(&self) -> io::Result<bool> {
        let timeout = {
            let mut inner = self.inner.borrow_mut();
            if inner.entries.is_empty() {
                return Ok(false);
            }
            inner.now = Instant::now();
            let now = inner.now;
            inner
                .timers
                .peek_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
        };

        let mut ready: Vec<PollEvent> = Vec::new();
        self.inner.borrow().poller.wait(&mut ready, timeout)?;

        let mut firing: Vec<(u64, Events)> = Vec::new();
        let mut expired_oneshot: Vec<u64> = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            inner.now = Instant::now();
            let Inner {
                poller,
                entries,
                timers,
                now,
                ..
            } = &mut *inner;

            for ev in &ready {
                let key = ev.key as u64;
                let Some(entry) = entries.get(&key) else {
                    continue;
                };
                match &entry.kind {
                    EntryKind::Io { fd, mode } => {
                        let mut fired = Events::NONE;
                        if ev.readable && mode.is_read() {
                            fired |= Events::READ;
                        }
                        if ev.writable && mode.is_write() {
                            fired |= Events::WRITE;
                        }
                        // Error/hangup conditions surface as readiness with
                        // no matching interest bit; hand them to the consumer
                        // as the registered mode so the transfer observes the
                        // failure.
                        if fired.is_empty() {
                            fired = *mode;
                        }
                        // SAFETY: the entry is live, so the caller is still
                        // keeping the registered fd valid (register_io
                        // contract).
                        let _ = unsafe { poller.modify(*fd, Self::poll_interest(ev.key, *mode)) };
                        firing.push((key, fired));
                    }
                    EntryKind::Signal { read, .. } => {
                        drain(read);
                        // SAFETY: the read end is owned by this live entry.
                        let _ =
                            unsafe { poller.modify(read.as_raw_fd(), PollEvent::readable(ev.key)) };
                        firing.push((key, Events::SIGNAL));
                    }
                    EntryKind::Timer { .. } => {}
                }
            }

            for (id, deadline) in timers.pop_expired(*now) {
                let Some(entry) = entries.get(&id.0) else {
                    continue;
                };
                let EntryKind::Timer { repeat } = &entry.kind else {
                    continue;
                };
                firing.push((id.0, Events::TIMEOUT));
                if *repeat > Duration::ZERO {
                    let mut next = deadline + *repeat;
                    if next <= *now {
                        next = *now + *repeat;
                    }
                    timers.insert(id, next);
                } else {
                    expired_oneshot.push(id.0);
                }
            }
        }

        for (key, revents) in firing {
            let target = {
                let inner = self.inner.borrow();
                inner
                    .entries
                    .get(&key)
                    .map(|entry| (entry.handler.clone(), entry.payload))
            };
            // A handler earlier in the batch may have cancelled this one.
            let Some((handler, payload)) = target else {
                continue;
            };
            (handler.borrow_mut())(revents, payload);
        }

        let mut inner = self.inner.borrow_mut();
        for key in expired_oneshot {
            inner.entries.remove(&key);
        }
        Ok(true)
    }

    fn now(&self) -> Instant {
        self.inner.borrow().now
    }
}

impl Drop for PlatformLoop {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        let keys: Vec<u64> = inner.entries.keys().copied().collect();
        for key in keys {
            if let Some(Entry {
                kind: EntryKind::Signal { sig_id, .. },
                ..
            }) = inner.entries.remove(&key)
            {
                signal_hook::low_level::unregister(sig_id);
            }
        }
        inner.timers.clear();
    }
}

impl std::fmt::Debug for PlatformLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.borrow().entries.len();
        f.debug_struct("PlatformLoop")
            .field("registration_count", &count)
            .field("running", &self.running.get())
            .finish_non_exhaustive()
    }
}

/// Drains a signal self-pipe so coalesced raises read as one fire.
fn drain(mut stream: &UnixStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
}
