//! Reactor abstraction for readiness, timer, and signal registrations.
//!
//! The reactor is the collaborator every watcher registers with. It monitors
//! registered sources and invokes the installed handler of each registration
//! whose source becomes ready, one batch per [`run_once`](Reactor::run_once)
//! call.
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Reactor`] | Trait for readiness/timer/signal registration backends |
//! | [`RegistrationId`] | Opaque identifier of one live registration |
//! | [`Payload`] | Opaque value identifying an event source to its handler |
//! | [`OnEvent`] | Shared handler invoked with `(revents, payload)` |
//!
//! The shipped implementation is [`PlatformLoop`]; tests substitute mock
//! reactors implementing the same trait.
//!
//! # Cancellation
//!
//! [`Reactor::cancel`] prevents any future delivery for the registration,
//! including deliveries already collected in the current batch: the dispatch
//! pass re-checks each registration immediately before invoking its handler.

pub mod platform;
pub(crate) mod timer;

pub use platform::PlatformLoop;

use crate::events::Events;
use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Identifier of one live reactor registration.
///
/// Ids are unique for the lifetime of the reactor and never reused, so a
/// stale id held after cancellation can never alias a newer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

/// Opaque value identifying the source of an event to its handler.
///
/// Watchers mint a fresh payload at construction; events synthesized outside
/// any watcher (the dispatcher's `CLEANUP` sweep) carry [`Payload::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload(pub u64);

impl Payload {
    /// Payload of synthesized events with no originating source.
    pub const NONE: Payload = Payload(0);

    /// Mints a fresh nonzero payload from a global counter.
    #[must_use]
    pub fn fresh() -> Self {
        Payload(next_payload_id())
    }

    /// Returns true if this is [`Payload::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

static PAYLOAD_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a new unique payload id, monotonically increasing from 1.
#[must_use]
pub fn next_payload_id() -> u64 {
    PAYLOAD_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared event handler invoked with `(revents, payload)`.
///
/// Handlers are shared between the owning watcher and the reactor entry, and
/// are invoked with no reactor borrow held, so they may freely register and
/// cancel watchers, read and write buffers, or stop the loop.
pub type OnEvent = Rc<RefCell<dyn FnMut(Events, Payload)>>;

/// Wraps a closure into an [`OnEvent`] handler.
pub fn on_event<F>(f: F) -> OnEvent
where
    F: FnMut(Events, Payload) + 'static,
{
    Rc::new(RefCell::new(f))
}

/// Readiness, timer, and signal registration backend.
///
/// All methods take `&self`; implementations use interior mutability. The
/// crate's model is single-threaded cooperative, so implementations are not
/// required to be `Send` or `Sync`.
pub trait Reactor {
    /// Registers interest in readiness events for a file descriptor.
    ///
    /// `mode` must have at least one of READ/WRITE set and `fd` must be a
    /// valid descriptor already configured non-blocking by the caller. The
    /// caller keeps `fd` open and valid until the registration is cancelled,
    /// and does not register the same fd with a second reactor concurrently.
    /// The handler is invoked with the fired subset of `mode` and `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` or `mode` is invalid or the underlying poller
    /// refuses the registration.
    fn register_io(
        &self,
        fd: RawFd,
        mode: Events,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId>;

    /// Registers a timer firing `after` from now, then every `repeat`.
    ///
    /// A zero `repeat` yields a one-shot timer whose registration is removed
    /// after it fires. The first deadline is computed from the real clock, so
    /// it does not drift with the loop's cached now.
    ///
    /// # Errors
    ///
    /// Returns an error if the reactor refuses the registration.
    fn register_timer(
        &self,
        after: Duration,
        repeat: Duration,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId>;

    /// Registers interest in an OS signal.
    ///
    /// The handler fires once per raised signal while armed.
    ///
    /// # Errors
    ///
    /// Returns an error if `signum` is not positive or cannot be hooked.
    fn register_signal(
        &self,
        signum: i32,
        handler: OnEvent,
        payload: Payload,
    ) -> io::Result<RegistrationId>;

    /// Cancels a registration; returns whether one was live.
    ///
    /// Idempotent: cancelling an unknown or already-expired id returns false
    /// and has no other effect. Takes effect immediately, even mid-batch.
    fn cancel(&self, id: RegistrationId) -> bool;

    /// Returns true if the registration is still armed.
    ///
    /// One-shot timers read unarmed after they fire.
    fn is_armed(&self, id: RegistrationId) -> bool;

    /// Returns the number of live registrations.
    fn registration_count(&self) -> usize;

    /// Returns true if no registrations are live.
    fn is_empty(&self) -> bool {
        self.registration_count() == 0
    }

    /// Advances the reactor one batch of ready events.
    ///
    /// Returns `Ok(false)` when no registrations remain, which is how the
    /// dispatch loop learns it has nothing left to wait for.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying poll fails.
    fn run_once(&self) -> io::Result<bool>;

    /// The loop's cached monotonic now, refreshed once per batch.
    fn now(&self) -> Instant;
}
