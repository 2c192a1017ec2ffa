//! Readiness poller over the platform's notification facility.
//!
//! The Linux backend uses epoll with an eventfd wakeup; the BSD/macOS
//! backend uses kqueue with an `EVFILT_USER` wakeup. Both expose the same
//! surface: register descriptors for read and/or write interest, block in
//! [`Poller::wait`] dispatching readiness to a callback, and wake the
//! blocked wait from any thread via [`Poller::trigger`].

use std::ops::{BitOr, BitOrAssign};

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly",
))]
mod kqueue;

#[cfg(target_os = "linux")]
pub use epoll::Poller;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly",
))]
pub use kqueue::Poller;

/// Initial size of the kernel event array; grows by 1.5x whenever a wait
/// fills it exactly.
pub(crate) const WAIT_EVENTS_BEGIN: usize = 128;

/// Readiness flags carried on a single event notification.
///
/// READ means the kernel has data (or a hang-up with residual data), WRITE
/// means the socket is writable (errors are also routed here so the next
/// write surfaces the real errno), ERR means a hang-up with nothing left
/// to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Event(u32);

impl Event {
    pub const NONE: Event = Event(0);
    pub const READ: Event = Event(0x1);
    pub const WRITE: Event = Event(0x2);
    pub const ERR: Event = Event(0x4);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Event) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Event::READ)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Event::WRITE)
    }

    pub fn is_err(self) -> bool {
        self.contains(Event::ERR)
    }
}

impl BitOr for Event {
    type Output = Event;

    fn bitor(self, rhs: Event) -> Event {
        Event(self.0 | rhs.0)
    }
}

impl BitOrAssign for Event {
    fn bitor_assign(&mut self, rhs: Event) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_flags_combine() {
        let mut ev = Event::NONE;
        assert!(!ev.is_readable());

        ev |= Event::READ;
        assert!(ev.is_readable());
        assert!(!ev.is_writable());

        let both = Event::READ | Event::WRITE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!both.is_err());
        assert!(both.contains(Event::READ));
        assert!(!both.contains(Event::ERR));
    }
}
