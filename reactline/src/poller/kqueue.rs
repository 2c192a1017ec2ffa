//! kqueue backend for the BSD family and macOS, with an `EVFILT_USER`
//! wakeup event in place of Linux's eventfd.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::error;

use super::{Event, WAIT_EVENTS_BEGIN};
use crate::error::Error;
use crate::util;

/// Ident reserved for the user-filter wakeup event. Sockets never carry
/// descriptor 0 here, so the ident cannot collide.
const WAKE_IDENT: usize = 0;

/// kqueue-backed poller.
pub struct Poller {
    kq: RawFd,
    closed: AtomicBool,
    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let (exit_tx, exit_rx) = bounded(1);
        let poller = Poller {
            kq,
            closed: AtomicBool::new(false),
            exit_tx,
            exit_rx,
        };

        // On failure Drop releases the kqueue fd.
        poller.change(
            WAKE_IDENT,
            libc::EVFILT_USER as i32,
            (libc::EV_ADD | libc::EV_CLEAR) as u32,
            0,
        )?;

        Ok(poller)
    }

    /// Register `fd` for readable notifications.
    pub fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.change(fd as usize, libc::EVFILT_READ as i32, libc::EV_ADD as u32, 0)
    }

    /// Arm both read and write readiness for `fd`.
    pub fn enable_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.change(fd as usize, libc::EVFILT_WRITE as i32, libc::EV_ADD as u32, 0)
    }

    /// Disarm write readiness, leaving read armed.
    pub fn enable_read(&self, fd: RawFd) -> io::Result<()> {
        match self.change(fd as usize, libc::EVFILT_WRITE as i32, libc::EV_DELETE as u32, 0) {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    /// Deregister `fd`.
    pub fn del(&self, fd: RawFd) -> io::Result<()> {
        let _ = self.change(fd as usize, libc::EVFILT_WRITE as i32, libc::EV_DELETE as u32, 0);
        match self.change(fd as usize, libc::EVFILT_READ as i32, libc::EV_DELETE as u32, 0) {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    /// Wake the blocked [`wait`](Self::wait) call from any thread.
    pub fn trigger(&self) -> io::Result<()> {
        self.change(WAKE_IDENT, libc::EVFILT_USER as i32, 0, libc::NOTE_TRIGGER as u32)
    }

    /// Blocking event drain loop. Returns only after [`close`](Self::close).
    pub fn wait(&self, mut dispatch: impl FnMut(RawFd, Event)) {
        let mut capacity = WAIT_EVENTS_BEGIN;
        let mut events: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; capacity];
        let mut delay = Duration::ZERO;

        loop {
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    events.as_mut_ptr(),
                    capacity as libc::c_int,
                    std::ptr::null(),
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if util::is_temporary(&err) {
                    delay = util::next_backoff(delay);
                    std::thread::sleep(delay);
                } else {
                    error!("kevent: {err}");
                }
                continue;
            }
            delay = Duration::ZERO;

            let mut woken = false;
            let mut dispatched = false;
            for ev in &events[..n as usize] {
                if ev.ident == WAKE_IDENT && ev.filter as i32 == libc::EVFILT_USER as i32 {
                    woken = true;
                    continue;
                }

                let mut event = Event::NONE;
                if ev.flags as u32 & (libc::EV_ERROR as u32 | libc::EV_EOF as u32) != 0 {
                    event |= Event::ERR;
                }
                if ev.filter as i32 == libc::EVFILT_READ as i32 {
                    event |= Event::READ;
                }
                if ev.filter as i32 == libc::EVFILT_WRITE as i32 {
                    event |= Event::WRITE;
                }
                dispatch(ev.ident as RawFd, event);
                dispatched = true;
            }

            if woken || dispatched {
                dispatch(-1, Event::NONE);
                if self.closed.load(Ordering::Acquire) {
                    break;
                }
            }

            if n as usize == capacity {
                capacity = (capacity * 3).div_ceil(2);
                events = vec![unsafe { std::mem::zeroed() }; capacity];
            }
        }

        let _ = self.exit_tx.send(());
    }

    /// Set the closed flag, unblock `wait`, and release the kqueue fd once
    /// the wait loop has exited.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::PollerClosed);
        }
        let _ = self.trigger();

        let _ = self.exit_rx.recv();

        unsafe {
            libc::close(self.kq);
        }
        Ok(())
    }

    fn change(&self, ident: usize, filter: i32, flags: u32, fflags: u32) -> io::Result<()> {
        let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
        ev.ident = ident as _;
        ev.filter = filter as _;
        ev.flags = flags as _;
        ev.fflags = fflags as _;

        let ret = unsafe {
            libc::kevent(self.kq, &ev, 1, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            unsafe {
                libc::close(self.kq);
            }
        }
    }
}
