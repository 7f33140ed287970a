//! Gust: context-keyed event dispatching with flow-controlled streaming
//! buffers over a level-triggered reactor loop.
//!
//! # Overview
//!
//! Gust is the core of an event-driven I/O toolkit. A [`PlatformLoop`] runs
//! the dispatch loop over a poller, typed watchers wrap its readiness, timer,
//! and signal registrations, and two streaming buffers translate raw
//! non-blocking I/O events into "task completed" notifications with explicit
//! backpressure.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Dispatcher<K>                         │
//! │     io[K] ──┐         timer[K] ──┐        signal[K] ──┐     │
//! └─────────────┼────────────────────┼────────────────────┼─────┘
//!               ▼                    ▼                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PlatformLoop (Reactor)                      │
//! │     poller readiness  ·  timer heap  ·  signal pipes        │
//! └─────────────────────────────────────────────────────────────┘
//!               ▲                                  ▲
//!     IncomingBuffer ── flow_ctrl ──┘    OutcomingBuffer ── flow_ctrl ──┘
//! ```
//!
//! # Core Guarantees
//!
//! - **One registration per active watcher**: re-setup cancels before it
//!   re-registers; cancel is idempotent and immediate, even mid-batch.
//! - **Single-shot tasks**: a buffer task handler fires at most once per
//!   `setup`, then its slot is free for a follow-up task.
//! - **Cleanup is final**: releasing a dispatcher or buffer delivers exactly
//!   one `CLEANUP` per registered object, after which nothing else fires.
//! - **Single-threaded cooperative**: handlers run to completion between
//!   polls and may freely mutate dispatcher, buffer, and loop state.
//!
//! # Module Structure
//!
//! - [`events`]: revents bitmask delivered to every handler
//! - [`error`]: setup error types
//! - [`reactor`]: the [`Reactor`] contract and the shipped [`PlatformLoop`]
//! - [`watcher`]: typed io/timer/signal watcher primitives
//! - [`buffer`]: incoming/outcoming flow-controlled buffers
//! - [`dispatcher`]: the context-keyed dispatcher
//! - [`test_utils`]: tracing-based test logging helpers
//!
//! The crate is Unix-only: it watches raw file descriptors and OS signals.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod reactor;
pub mod test_utils;
pub mod watcher;

pub use buffer::{FlowCtrl, IncomingBuffer, OutcomingBuffer, Receiver, Transmitter};
pub use dispatcher::Dispatcher;
pub use error::{Error, ErrorKind, Result};
pub use events::Events;
pub use reactor::{on_event, OnEvent, Payload, PlatformLoop, Reactor, RegistrationId};
pub use watcher::{IoWatcher, SignalWatcher, TimerWatcher};
