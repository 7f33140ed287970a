//! Context-keyed event dispatcher.
//!
//! A [`Dispatcher`] owns up to one I/O, one timer, and one signal watcher per
//! user-chosen context key and forwards every fire to a single *context
//! target* `(ctx, revents, payload)`. A second setup for a key that already
//! holds a watcher of that kind reconfigures it in place, so exactly one
//! reactor registration exists per `(key, kind)` slot.
//!
//! [`release`](Dispatcher::release) detaches every watcher and then delivers
//! exactly one `CLEANUP` event per context still present in any slot, with
//! [`Payload::NONE`]; afterwards all operations are no-ops. Dropping the
//! dispatcher releases it.
//!
//! Watcher handlers reach the context target through a weak reference plus a
//! cloned key, so ownership stays linear: the dispatcher owns the watchers,
//! the watchers own nothing of the dispatcher.

use crate::error::{Error, Result};
use crate::events::Events;
use crate::reactor::{on_event, OnEvent, Payload, Reactor};
use crate::watcher::{IoWatcher, SignalWatcher, TimerWatcher};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

type CtxTarget<K> = Rc<RefCell<Box<dyn FnMut(&K, Events, Payload)>>>;

/// Keyed registry of one I/O, one timer, and one signal watcher per context.
pub struct Dispatcher<K>
where
    K: Clone + Eq + Hash + 'static,
{
    target: CtxTarget<K>,
    reactor: Option<Rc<dyn Reactor>>,
    io: HashMap<K, IoWatcher>,
    timers: HashMap<K, TimerWatcher>,
    signals: HashMap<K, SignalWatcher>,
}

impl<K> Dispatcher<K>
where
    K: Clone + Eq + Hash + 'static,
{
    /// Creates a dispatcher forwarding all fires to `target`.
    pub fn new<F>(target: F, reactor: Rc<dyn Reactor>) -> Self
    where
        F: FnMut(&K, Events, Payload) + 'static,
    {
        Self {
            target: Rc::new(RefCell::new(Box::new(target))),
            reactor: Some(reactor),
            io: HashMap::new(),
            timers: HashMap::new(),
            signals: HashMap::new(),
        }
    }

    /// Returns true while the dispatcher holds its reactor reference.
    #[must_use]
    pub fn active(&self) -> bool {
        self.reactor.is_some()
    }

    /// The shared reactor handle, `None` after release.
    #[must_use]
    pub fn reactor(&self) -> Option<&Rc<dyn Reactor>> {
        self.reactor.as_ref()
    }

    fn context_handler(target: &CtxTarget<K>, ctx: &K) -> OnEvent {
        let target = Rc::downgrade(target);
        let ctx = ctx.clone();
        on_event(move |revents, payload| {
            if let Some(target) = target.upgrade() {
                (target.borrow_mut())(&ctx, revents, payload);
            }
        })
    }

    /// Arms I/O watching for `ctx` on `fd` with the READ/WRITE `mode`.
    ///
    /// An existing slot is reconfigured in place (one cancel, one fresh
    /// registration); otherwise a watcher is created and registered.
    ///
    /// # Errors
    ///
    /// Returns [`CannotSetupWatching`](crate::ErrorKind::CannotSetupWatching)
    /// if the dispatcher has been released or the registration is refused.
    pub fn setup_io_watching(&mut self, ctx: K, fd: RawFd, mode: Events) -> Result<()> {
        let Some(reactor) = self.reactor.clone() else {
            return Err(Error::cannot_setup("dispatcher is released"));
        };
        match self.io.get_mut(&ctx) {
            Some(watcher) => {
                if watcher.setup(fd, mode) {
                    Ok(())
                } else {
                    self.io.remove(&ctx);
                    Err(Error::cannot_setup("io watching refused on reconfigure"))
                }
            }
            None => {
                let handler = Self::context_handler(&self.target, &ctx);
                let mut watcher = IoWatcher::new(handler, reactor);
                if watcher.setup(fd, mode) {
                    self.io.insert(ctx, watcher);
                    Ok(())
                } else {
                    Err(Error::cannot_setup("io watching refused"))
                }
            }
        }
    }

    /// Changes the mode of an existing I/O slot; returns success.
    pub fn update_io_watching(&mut self, ctx: &K, mode: Events) -> bool {
        if self.reactor.is_none() {
            return false;
        }
        match self.io.get_mut(ctx) {
            Some(watcher) => {
                let fd = watcher.fd();
                watcher.setup(fd, mode)
            }
            None => false,
        }
    }

    /// Detaches and forgets the I/O slot; returns whether one existed.
    pub fn cancel_io_watching(&mut self, ctx: &K) -> bool {
        match self.io.remove(ctx) {
            Some(mut watcher) => {
                watcher.cancel();
                true
            }
            None => false,
        }
    }

    /// Arms a periodic timer for `ctx` with the given period.
    ///
    /// Re-setup restarts timing.
    ///
    /// # Errors
    ///
    /// Returns [`CannotSetupWatching`](crate::ErrorKind::CannotSetupWatching)
    /// if the dispatcher has been released or the registration is refused.
    pub fn setup_timer_watching(&mut self, ctx: K, period: Duration) -> Result<()> {
        let Some(reactor) = self.reactor.clone() else {
            return Err(Error::cannot_setup("dispatcher is released"));
        };
        match self.timers.get_mut(&ctx) {
            Some(watcher) => {
                if watcher.setup(period, period) {
                    Ok(())
                } else {
                    self.timers.remove(&ctx);
                    Err(Error::cannot_setup("timer watching refused on reconfigure"))
                }
            }
            None => {
                let handler = Self::context_handler(&self.target, &ctx);
                let mut watcher = TimerWatcher::new(handler, reactor);
                if watcher.setup(period, period) {
                    self.timers.insert(ctx, watcher);
                    Ok(())
                } else {
                    Err(Error::cannot_setup("timer watching refused"))
                }
            }
        }
    }

    /// Restarts an existing timer slot with a new period; returns success.
    pub fn update_timer_watching(&mut self, ctx: &K, period: Duration) -> bool {
        if self.reactor.is_none() {
            return false;
        }
        match self.timers.get_mut(ctx) {
            Some(watcher) => watcher.setup(period, period),
            None => false,
        }
    }

    /// Detaches and forgets the timer slot; returns whether one existed.
    pub fn cancel_timer_watching(&mut self, ctx: &K) -> bool {
        match self.timers.remove(ctx) {
            Some(mut watcher) => {
                watcher.cancel();
                true
            }
            None => false,
        }
    }

    /// Arms signal watching for `ctx` on `signum`.
    ///
    /// # Errors
    ///
    /// Returns [`CannotSetupWatching`](crate::ErrorKind::CannotSetupWatching)
    /// if the dispatcher has been released or the registration is refused.
    pub fn setup_signal_watching(&mut self, ctx: K, signum: i32) -> Result<()> {
        let Some(reactor) = self.reactor.clone() else {
            return Err(Error::cannot_setup("dispatcher is released"));
        };
        match self.signals.get_mut(&ctx) {
            Some(watcher) => {
                if watcher.setup(signum) {
                    Ok(())
                } else {
                    self.signals.remove(&ctx);
                    Err(Error::cannot_setup("signal watching refused on reconfigure"))
                }
            }
            None => {
                let handler = Self::context_handler(&self.target, &ctx);
                let mut watcher = SignalWatcher::new(handler, reactor);
                if watcher.setup(signum) {
                    self.signals.insert(ctx, watcher);
                    Ok(())
                } else {
                    Err(Error::cannot_setup("signal watching refused"))
                }
            }
        }
    }

    /// Detaches and forgets the signal slot; returns whether one existed.
    pub fn cancel_signal_watching(&mut self, ctx: &K) -> bool {
        match self.signals.remove(ctx) {
            Some(mut watcher) => {
                watcher.cancel();
                true
            }
            None => false,
        }
    }

    /// Detaches all watchers, delivers one `CLEANUP` per present context,
    /// and drops the reactor reference. Idempotent.
    ///
    /// Must not be invoked from inside the context target; cancel individual
    /// slots there and release once the dispatch loop has returned.
    pub fn release(&mut self) {
        if self.reactor.take().is_none() {
            return;
        }
        let mut ctxs: Vec<K> = Vec::new();
        for key in self
            .io
            .keys()
            .chain(self.timers.keys())
            .chain(self.signals.keys())
        {
            if !ctxs.contains(key) {
                ctxs.push(key.clone());
            }
        }
        self.io.clear();
        self.timers.clear();
        self.signals.clear();
        tracing::debug!(contexts = ctxs.len(), "dispatcher released, sweeping cleanup");
        for ctx in &ctxs {
            (self.target.borrow_mut())(ctx, Events::CLEANUP, Payload::NONE);
        }
    }
}

impl<K> Drop for Dispatcher<K>
where
    K: Clone + Eq + Hash + 'static,
{
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::RegistrationId;
    use crate::test_utils::init_test_logging;
    use std::io;
    use std::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Io,
        Timer,
        Signal,
    }

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        entries: HashMap<u64, (Kind, OnEvent, Payload)>,
        registers: usize,
        cancels: usize,
    }

    /// Mock reactor that records registrations and lets tests fire them.
    #[derive(Default)]
    struct MockReactor {
        state: RefCell<MockState>,
    }

    impl MockReactor {
        fn new() -> Rc<Self> {
            Rc::new(Self::default())
        }

        fn admit(&self, kind: Kind, handler: OnEvent, payload: Payload) -> RegistrationId {
            let mut state = self.state.borrow_mut();
            state.next_id += 1;
            let id = state.next_id;
            state.entries.insert(id, (kind, handler, payload));
            state.registers += 1;
            RegistrationId(id)
        }

        fn registers(&self) -> usize {
            self.state.borrow().registers
        }

        fn cancels(&self) -> usize {
            self.state.borrow().cancels
        }

        fn ids_of(&self, kind: Kind) -> Vec<RegistrationId> {
            let mut ids: Vec<u64> = self
                .state
                .borrow()
                .entries
                .iter()
                .filter(|(_, (k, _, _))| *k == kind)
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            ids.into_iter().map(RegistrationId).collect()
        }

        fn fire(&self, id: RegistrationId, revents: Events) {
            let target = self
                .state
                .borrow()
                .entries
                .get(&id.0)
                .map(|(_, handler, payload)| (handler.clone(), *payload));
            if let Some((handler, payload)) = target {
                (handler.borrow_mut())(revents, payload);
            }
        }
    }

    impl Reactor for MockReactor {
        fn register_io(
            &self,
            _fd: RawFd,
            _mode: Events,
            handler: OnEvent,
            payload: Payload,
        ) -> io::Result<RegistrationId> {
            Ok(self.admit(Kind::Io, handler, payload))
        }

        fn register_timer(
            &self,
            _after: Duration,
            _repeat: Duration,
            handler: OnEvent,
            payload: Payload,
        ) -> io::Result<RegistrationId> {
            Ok(self.admit(Kind::Timer, handler, payload))
        }

        fn register_signal(
            &self,
            _signum: i32,
            handler: OnEvent,
            payload: Payload,
        ) -> io::Result<RegistrationId> {
            Ok(self.admit(Kind::Signal, handler, payload))
        }

        fn cancel(&self, id: RegistrationId) -> bool {
            let mut state = self.state.borrow_mut();
            if state.entries.remove(&id.0).is_some() {
                state.cancels += 1;
                true
            } else {
                false
            }
        }

        fn is_armed(&self, id: RegistrationId) -> bool {
            self.state.borrow().entries.contains_key(&id.0)
        }

        fn registration_count(&self) -> usize {
            self.state.borrow().entries.len()
        }

        fn run_once(&self) -> io::Result<bool> {
            Ok(!self.is_empty())
        }

        fn now(&self) -> Instant {
            Instant::now()
        }
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    type EventLog = Rc<RefCell<Vec<(&'static str, Events)>>>;

    fn logging_dispatcher(reactor: &Rc<MockReactor>) -> (Dispatcher<&'static str>, EventLog) {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        let dispatcher = Dispatcher::new(
            move |ctx: &&'static str, revents, _payload| {
                log2.borrow_mut().push((ctx, revents));
            },
            reactor.clone() as Rc<dyn Reactor>,
        );
        (dispatcher, log)
    }

    #[test]
    fn fires_are_forwarded_with_the_context() {
        init_test("fires_are_forwarded_with_the_context");
        let reactor = MockReactor::new();
        let (mut dispatcher, log) = logging_dispatcher(&reactor);

        dispatcher
            .setup_timer_watching("A", Duration::from_millis(100))
            .expect("setup");
        let id = reactor.ids_of(Kind::Timer)[0];
        reactor.fire(id, Events::TIMEOUT);
        reactor.fire(id, Events::TIMEOUT);

        crate::assert_with_log!(
            log.borrow().as_slice() == [("A", Events::TIMEOUT), ("A", Events::TIMEOUT)],
            "two timer fires forwarded",
            2usize,
            log.borrow().len()
        );
        crate::test_complete!("fires_are_forwarded_with_the_context");
    }

    #[test]
    fn io_resetup_reconfigures_in_place() {
        init_test("io_resetup_reconfigures_in_place");
        let reactor = MockReactor::new();
        let (mut dispatcher, _log) = logging_dispatcher(&reactor);

        dispatcher
            .setup_io_watching("K", 0, Events::READ)
            .expect("setup");
        assert_eq!(reactor.registers(), 1);
        assert_eq!(reactor.cancels(), 0);

        dispatcher
            .setup_io_watching("K", 0, Events::READ | Events::WRITE)
            .expect("re-setup");
        crate::assert_with_log!(
            reactor.registers() == 2,
            "one fresh register on reconfigure",
            2usize,
            reactor.registers()
        );
        crate::assert_with_log!(
            reactor.cancels() == 1,
            "one cancel on reconfigure",
            1usize,
            reactor.cancels()
        );
        assert_eq!(reactor.registration_count(), 1);
        crate::test_complete!("io_resetup_reconfigures_in_place");
    }

    #[test]
    fn update_io_requires_existing_slot() {
        init_test("update_io_requires_existing_slot");
        let reactor = MockReactor::new();
        let (mut dispatcher, _log) = logging_dispatcher(&reactor);

        assert!(!dispatcher.update_io_watching(&"K", Events::WRITE));
        dispatcher
            .setup_io_watching("K", 3, Events::READ)
            .expect("setup");
        assert!(dispatcher.update_io_watching(&"K", Events::WRITE));
        assert_eq!(reactor.registration_count(), 1);
        crate::test_complete!("update_io_requires_existing_slot");
    }

    #[test]
    fn all_three_kinds_coexist_under_one_key() {
        init_test("all_three_kinds_coexist_under_one_key");
        let reactor = MockReactor::new();
        let (mut dispatcher, log) = logging_dispatcher(&reactor);

        dispatcher
            .setup_io_watching("K", 0, Events::READ)
            .expect("io");
        dispatcher
            .setup_timer_watching("K", Duration::from_secs(1))
            .expect("timer");
        dispatcher.setup_signal_watching("K", 10).expect("signal");
        assert_eq!(reactor.registration_count(), 3);

        reactor.fire(reactor.ids_of(Kind::Signal)[0], Events::SIGNAL);
        assert_eq!(log.borrow().as_slice(), [("K", Events::SIGNAL)]);

        dispatcher.release();
        crate::assert_with_log!(
            log.borrow().as_slice() == [("K", Events::SIGNAL), ("K", Events::CLEANUP)],
            "one cleanup for the key",
            2usize,
            log.borrow().len()
        );
        assert_eq!(reactor.registration_count(), 0);
        crate::test_complete!("all_three_kinds_coexist_under_one_key");
    }

    #[test]
    fn release_is_idempotent_and_disables_operations() {
        init_test("release_is_idempotent_and_disables_operations");
        let reactor = MockReactor::new();
        let (mut dispatcher, log) = logging_dispatcher(&reactor);

        dispatcher
            .setup_timer_watching("A", Duration::from_secs(1))
            .expect("setup");
        assert!(dispatcher.active());
        dispatcher.release();
        assert!(!dispatcher.active());
        assert_eq!(log.borrow().as_slice(), [("A", Events::CLEANUP)]);

        dispatcher.release();
        assert_eq!(log.borrow().len(), 1);
        assert!(dispatcher
            .setup_timer_watching("A", Duration::from_secs(1))
            .is_err());
        assert!(!dispatcher.cancel_timer_watching(&"A"));
        assert!(!dispatcher.update_io_watching(&"A", Events::READ));
        crate::test_complete!("release_is_idempotent_and_disables_operations");
    }

    #[test]
    fn drop_releases_and_sweeps() {
        init_test("drop_releases_and_sweeps");
        let reactor = MockReactor::new();
        let log: EventLog;
        {
            let (mut dispatcher, inner_log) = logging_dispatcher(&reactor);
            log = inner_log;
            dispatcher
                .setup_timer_watching("A", Duration::from_secs(1))
                .expect("setup");
            dispatcher.setup_signal_watching("B", 10).expect("setup");
        }
        let mut swept: Vec<&str> = log.borrow().iter().map(|(ctx, _)| *ctx).collect();
        swept.sort_unstable();
        crate::assert_with_log!(
            swept == ["A", "B"],
            "cleanup for both contexts on drop",
            vec!["A", "B"],
            swept
        );
        assert!(log.borrow().iter().all(|(_, ev)| ev.is_cleanup()));
        assert_eq!(reactor.registration_count(), 0);
        crate::test_complete!("drop_releases_and_sweeps");
    }

    #[test]
    fn cancelled_context_is_not_swept() {
        init_test("cancelled_context_is_not_swept");
        let reactor = MockReactor::new();
        let (mut dispatcher, log) = logging_dispatcher(&reactor);

        dispatcher
            .setup_timer_watching("A", Duration::from_secs(1))
            .expect("setup");
        dispatcher
            .setup_timer_watching("B", Duration::from_secs(1))
            .expect("setup");
        assert!(dispatcher.cancel_timer_watching(&"B"));
        assert!(!dispatcher.cancel_timer_watching(&"B"));

        dispatcher.release();
        assert_eq!(log.borrow().as_slice(), [("A", Events::CLEANUP)]);
        crate::test_complete!("cancelled_context_is_not_swept");
    }
}
