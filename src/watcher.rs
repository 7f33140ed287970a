//! Typed watcher primitives over reactor registrations.
//!
//! All three watchers share the contract: constructed inactive with a handler
//! and a shared reactor handle; `setup(...)` activates, `cancel()`
//! deactivates, both idempotent; re-setup of an active watcher is a cancel
//! followed by a fresh registration, so exactly one reactor registration
//! exists per active watcher. Dropping a watcher cancels it.
//!
//! `active()` consults the reactor rather than a cached flag: a one-shot
//! timer whose registration expired reads inactive without any bookkeeping
//! here.

use crate::events::Events;
use crate::reactor::{OnEvent, Payload, Reactor, RegistrationId};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Watches a file descriptor for READ/WRITE readiness.
pub struct IoWatcher {
    reactor: Rc<dyn Reactor>,
    handler: OnEvent,
    payload: Payload,
    registration: Option<RegistrationId>,
    fd: RawFd,
    mode: Events,
}

impl IoWatcher {
    /// Creates an inactive watcher with the given handler.
    pub fn new(handler: OnEvent, reactor: Rc<dyn Reactor>) -> Self {
        Self {
            reactor,
            handler,
            payload: Payload::fresh(),
            registration: None,
            fd: -1,
            mode: Events::NONE,
        }
    }

    /// Returns true if the registration is armed.
    #[must_use]
    pub fn active(&self) -> bool {
        self.registration
            .is_some_and(|id| self.reactor.is_armed(id))
    }

    /// The payload this watcher's events carry.
    #[must_use]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// The watched file descriptor, -1 while never set up.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The current watching mode, masked to READ/WRITE.
    #[must_use]
    pub fn mode(&self) -> Events {
        self.mode
    }

    /// Arms the watcher for `fd` with the given `mode`.
    ///
    /// If currently active the watcher is cancelled first, then registered
    /// afresh. Returns whether the registration is armed; `fd < 0` or an
    /// empty READ/WRITE mode leave the watcher inactive.
    pub fn setup(&mut self, fd: RawFd, mode: Events) -> bool {
        self.cancel();
        let mode = mode.rw_mode();
        if fd < 0 || mode.is_empty() {
            return false;
        }
        match self
            .reactor
            .register_io(fd, mode, self.handler.clone(), self.payload)
        {
            Ok(id) => {
                self.registration = Some(id);
                self.fd = fd;
                self.mode = mode;
                true
            }
            Err(err) => {
                tracing::debug!(fd, ?mode, error = %err, "io watcher setup refused");
                false
            }
        }
    }

    /// Cancels the watching; returns false if already inactive.
    pub fn cancel(&mut self) -> bool {
        match self.registration.take() {
            Some(id) => self.reactor.cancel(id),
            None => false,
        }
    }
}

impl Drop for IoWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Fires on a periodic or one-shot deadline.
pub struct TimerWatcher {
    reactor: Rc<dyn Reactor>,
    handler: OnEvent,
    payload: Payload,
    registration: Option<RegistrationId>,
}

impl TimerWatcher {
    /// Creates an inactive watcher with the given handler.
    pub fn new(handler: OnEvent, reactor: Rc<dyn Reactor>) -> Self {
        Self {
            reactor,
            handler,
            payload: Payload::fresh(),
            registration: None,
        }
    }

    /// Returns true if the registration is armed.
    ///
    /// A one-shot timer reads inactive after it has fired.
    #[must_use]
    pub fn active(&self) -> bool {
        self.registration
            .is_some_and(|id| self.reactor.is_armed(id))
    }

    /// The payload this watcher's events carry.
    #[must_use]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Arms the timer: first fire at `after` from now, then every `repeat`.
    ///
    /// A zero `repeat` yields a one-shot. Re-setup restarts timing.
    pub fn setup(&mut self, after: Duration, repeat: Duration) -> bool {
        self.cancel();
        match self
            .reactor
            .register_timer(after, repeat, self.handler.clone(), self.payload)
        {
            Ok(id) => {
                self.registration = Some(id);
                true
            }
            Err(err) => {
                tracing::debug!(error = %err, "timer watcher setup refused");
                false
            }
        }
    }

    /// Cancels the watching; returns false if already inactive.
    pub fn cancel(&mut self) -> bool {
        match self.registration.take() {
            Some(id) => self.reactor.cancel(id),
            None => false,
        }
    }
}

impl Drop for TimerWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Fires each time an OS signal is raised while armed.
pub struct SignalWatcher {
    reactor: Rc<dyn Reactor>,
    handler: OnEvent,
    payload: Payload,
    registration: Option<RegistrationId>,
    signum: i32,
}

impl SignalWatcher {
    /// Creates an inactive watcher with the given handler.
    pub fn new(handler: OnEvent, reactor: Rc<dyn Reactor>) -> Self {
        Self {
            reactor,
            handler,
            payload: Payload::fresh(),
            registration: None,
            signum: 0,
        }
    }

    /// Returns true if the registration is armed.
    #[must_use]
    pub fn active(&self) -> bool {
        self.registration
            .is_some_and(|id| self.reactor.is_armed(id))
    }

    /// The payload this watcher's events carry.
    #[must_use]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// The watched signal number, 0 while never set up.
    #[must_use]
    pub fn signum(&self) -> i32 {
        self.signum
    }

    /// Arms the watcher for `signum`; requires `signum > 0`.
    pub fn setup(&mut self, signum: i32) -> bool {
        self.cancel();
        if signum <= 0 {
            return false;
        }
        match self
            .reactor
            .register_signal(signum, self.handler.clone(), self.payload)
        {
            Ok(id) => {
                self.registration = Some(id);
                self.signum = signum;
                true
            }
            Err(err) => {
                tracing::debug!(signum, error = %err, "signal watcher setup refused");
                false
            }
        }
    }

    /// Cancels the watching; returns false if already inactive.
    pub fn cancel(&mut self) -> bool {
        match self.registration.take() {
            Some(id) => self.reactor.cancel(id),
            None => false,
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}
