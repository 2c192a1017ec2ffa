//! Linux epoll backend with an eventfd wakeup descriptor.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::error;

use super::{Event, WAIT_EVENTS_BEGIN};
use crate::error::Error;
use crate::util;

const READ_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLPRI) as u32;
const WRITE_EVENTS: u32 = libc::EPOLLOUT as u32;

/// epoll-backed poller.
///
/// The eventfd is registered for read interest like any other source, but
/// its readiness never reaches a user handler: the wait loop drains it,
/// latches the wakeup, and dispatches `(-1, NONE)` after the iteration's
/// ordinary events so the owning loop can drain its trigger queue.
pub struct Poller {
    epfd: RawFd,
    event_fd: RawFd,
    closed: AtomicBool,
    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }

        let event_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if event_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(epfd);
            }
            return Err(err);
        }

        let (exit_tx, exit_rx) = bounded(1);
        let poller = Poller {
            epfd,
            event_fd,
            closed: AtomicBool::new(false),
            exit_tx,
            exit_rx,
        };

        // On failure Drop releases both fds.
        poller.add_read(event_fd)?;

        Ok(poller)
    }

    /// Register `fd` for readable notifications.
    pub fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, READ_EVENTS)
    }

    /// Arm both read and write readiness for `fd`.
    pub fn enable_read_write(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, READ_EVENTS | WRITE_EVENTS)
    }

    /// Disarm write readiness, leaving read armed.
    pub fn enable_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, READ_EVENTS)
    }

    /// Deregister `fd`.
    pub fn del(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wake the blocked [`wait`](Self::wait) call from any thread.
    ///
    /// Concurrent triggers collapse into the eventfd counter; at least one
    /// `(-1, NONE)` dispatch follows.
    pub fn trigger(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.event_fd,
                &val as *const u64 as *const libc::c_void,
                8,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocking event drain loop. Returns only after [`close`](Self::close).
    pub fn wait(&self, mut dispatch: impl FnMut(RawFd, Event)) {
        let mut capacity = WAIT_EVENTS_BEGIN;
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; capacity];
        let mut delay = Duration::ZERO;

        loop {
            let n = unsafe {
                libc::epoll_wait(self.epfd, events.as_mut_ptr(), capacity as libc::c_int, -1)
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if util::is_temporary(&err) {
                    delay = util::next_backoff(delay);
                    std::thread::sleep(delay);
                } else {
                    error!("epoll_wait: {err}");
                }
                continue;
            }
            delay = Duration::ZERO;

            let mut woken = false;
            let mut dispatched = false;
            for ev in &events[..n as usize] {
                let fd = ev.u64 as RawFd;
                if fd == self.event_fd {
                    self.drain_wakeup();
                    woken = true;
                    continue;
                }

                let mut event = Event::NONE;
                if ev.events & (READ_EVENTS | libc::EPOLLRDHUP as u32) != 0 {
                    event |= Event::READ;
                }
                if ev.events & (libc::EPOLLOUT | libc::EPOLLERR) as u32 != 0 {
                    event |= Event::WRITE;
                }
                if ev.events & libc::EPOLLHUP as u32 != 0 && ev.events & libc::EPOLLIN as u32 == 0 {
                    event |= Event::ERR;
                }
                dispatch(fd, event);
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
                events = vec![libc::epoll_event { events: 0, u64: 0 }; capacity];
            }
        }

        let _ = self.exit_tx.send(());
    }

    /// Set the closed flag, unblock `wait`, and release the kernel fds
    /// once the wait loop has exited.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::PollerClosed);
        }
        let _ = self.trigger();

        // Barrier: wait() signals on exit.
        let _ = self.exit_rx.recv();

        unsafe {
            libc::close(self.epfd);
            libc::close(self.event_fd);
        }
        Ok(())
    }

    fn drain_wakeup(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.event_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, event_bits: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: event_bits,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
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
                libc::close(self.epfd);
                libc::close(self.event_fd);
            }
        }
    }
}
