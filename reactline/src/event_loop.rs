//! Single-threaded event loop: one poller, a descriptor→handler registry,
//! and a cross-thread queue of deferred closures ("triggers").

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::poller::{Event, Poller};
use crate::util;

/// Size of the per-loop scratch buffer used for read syscalls.
const PACKET_BUF_SIZE: usize = 0xFFFF;

/// Capability registered for a descriptor: readiness dispatch plus a close
/// hook invoked when the loop stops.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, fd: RawFd, events: Event);
    fn close(&self);
}

type Trigger = Box<dyn FnOnce() + Send>;

/// Single-threaded executor owning one [`Poller`].
///
/// The registry and trigger queue are mutex-guarded so registration and
/// trigger enqueue may happen from any thread, but handler callbacks and
/// trigger closures only ever run on the thread blocked in [`wait`]
/// (`wait` is entered exactly once, by the owning thread).
///
/// [`wait`]: EventLoop::wait
pub struct EventLoop {
    poller: Poller,
    handlers: Mutex<HashMap<RawFd, Arc<dyn EventHandler>>>,
    triggers: Mutex<Vec<Trigger>>,
    packet: Mutex<Vec<u8>>,
}

impl EventLoop {
    pub(crate) fn new() -> Result<Arc<EventLoop>, Error> {
        Ok(Arc::new(EventLoop {
            poller: Poller::new()?,
            handlers: Mutex::new(HashMap::new()),
            triggers: Mutex::new(Vec::new()),
            packet: Mutex::new(vec![0u8; PACKET_BUF_SIZE]),
        }))
    }

    /// Register `fd` for read readiness and store its handler.
    pub fn add_fd(&self, fd: RawFd, handler: Arc<dyn EventHandler>) -> Result<(), Error> {
        self.poller.add_read(fd)?;
        util::lock(&self.handlers).insert(fd, handler);
        Ok(())
    }

    /// Remove `fd` from the registry and deregister it from the poller.
    pub fn del_fd(&self, fd: RawFd) -> Result<(), Error> {
        util::lock(&self.handlers).remove(&fd);
        self.poller.del(fd)?;
        Ok(())
    }

    /// Disarm write readiness for `fd`.
    pub fn enable_read(&self, fd: RawFd) -> Result<(), Error> {
        self.poller.enable_read(fd)?;
        Ok(())
    }

    /// Arm both read and write readiness for `fd`.
    pub fn enable_read_write(&self, fd: RawFd) -> Result<(), Error> {
        self.poller.enable_read_write(fd)?;
        Ok(())
    }

    /// Defer a closure onto this loop's thread.
    ///
    /// Closures from one producer run in enqueue order; a successful return
    /// means the closure will run by the next wake + drain, not that it has
    /// run.
    pub fn trigger(&self, f: impl FnOnce() + Send + 'static) {
        util::lock(&self.triggers).push(Box::new(f));
        let _ = self.poller.trigger();
    }

    /// Run the poller's blocking drain loop on the calling thread.
    pub(crate) fn wait(&self) {
        self.poller.wait(|fd, events| self.dispatch(fd, events));
    }

    /// Close every registered handler, then close the poller.
    pub(crate) fn stop(&self) -> Result<(), Error> {
        let handlers: Vec<Arc<dyn EventHandler>> =
            util::lock(&self.handlers).values().cloned().collect();
        for handler in handlers {
            handler.close();
        }
        self.poller.close()
    }

    /// Run `f` with the loop's scratch read buffer.
    pub(crate) fn with_packet_buf<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut util::lock(&self.packet))
    }

    /// Poller dispatch callback. Descriptor events route to the registered
    /// handler; the `-1` end-of-iteration dispatch drains the trigger
    /// queue, so within one wait iteration I/O callbacks always run before
    /// trigger closures.
    fn dispatch(&self, fd: RawFd, events: Event) {
        if fd > 0 {
            // A missing handler is a connection closed earlier in this
            // same tick; ignore.
            let handler = util::lock(&self.handlers).get(&fd).cloned();
            if let Some(handler) = handler {
                handler.on_event(fd, events);
            }
            return;
        }

        self.run_triggers();
    }

    fn run_triggers(&self) {
        let fns = std::mem::take(&mut *util::lock(&self.triggers));
        for f in fns {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn triggers_run_on_loop_thread_in_order() {
        let ev_loop = EventLoop::new().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            ev_loop.trigger(move || seen.lock().unwrap().push(i));
        }

        let waiter = {
            let ev_loop = ev_loop.clone();
            std::thread::spawn(move || ev_loop.wait())
        };

        // Wait for the loop to drain the queue, then stop it.
        for _ in 0..200 {
            if seen.lock().unwrap().len() == 5 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        ev_loop.stop().unwrap();
        waiter.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stop_closes_registered_handlers() {
        struct CountingHandler(Arc<AtomicUsize>);

        impl EventHandler for CountingHandler {
            fn on_event(&self, _fd: RawFd, _events: Event) {}
            fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let ev_loop = EventLoop::new().unwrap();
        let closes = Arc::new(AtomicUsize::new(0));

        // A pipe gives us real pollable descriptors to register.
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        ev_loop
            .add_fd(fds[0], Arc::new(CountingHandler(closes.clone())))
            .unwrap();

        let waiter = {
            let ev_loop = ev_loop.clone();
            std::thread::spawn(move || ev_loop.wait())
        };
        ev_loop.stop().unwrap();
        waiter.join().unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
