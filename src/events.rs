//! Revents bitmask delivered with every handler invocation.
//!
//! A single notification may combine several bits. The `BUFFER` bit qualifies
//! `READ`/`WRITE`/`ERROR` to mean "buffer-level task completion" as opposed to
//! raw readiness.
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | `READ` | source readable / read task completed (with `BUFFER`) |
//! | `WRITE` | source writable / write task completed (with `BUFFER`) |
//! | `TIMEOUT` | timer fired |
//! | `SIGNAL` | OS signal delivered |
//! | `ERROR` | reactor or transfer error |
//! | `CLEANUP` | final event for a released object |
//! | `BUFFER` | qualifies READ/WRITE/ERROR as task-level |

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of event bits delivered with a single handler invocation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Events(u8);

impl Events {
    /// Empty mask.
    pub const NONE: Events = Events(0);
    /// Readable / read-task completion.
    pub const READ: Events = Events(0b0000_0001);
    /// Writable / write-task completion.
    pub const WRITE: Events = Events(0b0000_0010);
    /// Timer fired.
    pub const TIMEOUT: Events = Events(0b0000_0100);
    /// OS signal delivered.
    pub const SIGNAL: Events = Events(0b0000_1000);
    /// Reactor or transfer error.
    pub const ERROR: Events = Events(0b0001_0000);
    /// Final event for a released object.
    pub const CLEANUP: Events = Events(0b0010_0000);
    /// Qualifies READ/WRITE/ERROR as buffer-task level.
    pub const BUFFER: Events = Events(0b0100_0000);

    /// Returns true if no bits are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if the READ bit is set.
    #[must_use]
    pub const fn is_read(self) -> bool {
        self.intersects(Self::READ)
    }

    /// Returns true if the WRITE bit is set.
    #[must_use]
    pub const fn is_write(self) -> bool {
        self.intersects(Self::WRITE)
    }

    /// Returns true if the TIMEOUT bit is set.
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        self.intersects(Self::TIMEOUT)
    }

    /// Returns true if the SIGNAL bit is set.
    #[must_use]
    pub const fn is_signal(self) -> bool {
        self.intersects(Self::SIGNAL)
    }

    /// Returns true if the ERROR bit is set.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.intersects(Self::ERROR)
    }

    /// Returns true if the CLEANUP bit is set.
    #[must_use]
    pub const fn is_cleanup(self) -> bool {
        self.intersects(Self::CLEANUP)
    }

    /// Returns true if the BUFFER bit is set.
    #[must_use]
    pub const fn is_buffer(self) -> bool {
        self.intersects(Self::BUFFER)
    }

    /// Combines masks.
    #[must_use]
    pub const fn add(self, other: Events) -> Events {
        Events(self.0 | other.0)
    }

    /// Removes the bits of `other`.
    #[must_use]
    pub const fn remove(self, other: Events) -> Events {
        Events(self.0 & !other.0)
    }

    /// Masks down to the READ/WRITE readiness bits.
    #[must_use]
    pub const fn rw_mode(self) -> Events {
        Events(self.0 & (Self::READ.0 | Self::WRITE.0))
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        self.add(rhs)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        *self = self.add(rhs);
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names = [
            (Self::READ, "READ"),
            (Self::WRITE, "WRITE"),
            (Self::TIMEOUT, "TIMEOUT"),
            (Self::SIGNAL, "SIGNAL"),
            (Self::ERROR, "ERROR"),
            (Self::CLEANUP, "CLEANUP"),
            (Self::BUFFER, "BUFFER"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
