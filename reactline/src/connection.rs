//! Per-socket state machine bridging poller readiness into buffered
//! reads/writes, codec framing, and handler callbacks.

use std::any::Any;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::BytesMut;
use tracing::{debug, error};

use crate::buffer;
use crate::error::Error;
use crate::event_loop::{EventHandler, EventLoop};
use crate::handler::ConnectionHandler;
use crate::metrics;
use crate::poller::Event;
use crate::protocol::Protocol;
use crate::util::{self, Addr};

/// Pending action dispatched once the write buffer drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    /// Close the connection after the buffered output is flushed.
    Close,
}

/// Opaque per-connection application state, readable and writable through
/// [`Connection::context`] / [`Connection::set_context`].
pub type Context = Arc<dyn Any + Send + Sync>;

struct WriteState {
    buf: BytesMut,
    action: Action,
}

/// A socket owned by one worker loop.
///
/// `send` and `close` are callable from any thread: they never touch the
/// kernel or fire callbacks directly, all effects are deferred onto the
/// owning loop through its trigger queue. Everything else (reads, writes,
/// codec calls, handler callbacks) runs on that loop's thread.
pub struct Connection {
    fd: RawFd,
    ev_loop: Weak<EventLoop>,
    me: Weak<Connection>,
    protocol: Arc<dyn Protocol>,
    handler: Arc<dyn ConnectionHandler>,
    closed: AtomicBool,
    local_addr: Addr,
    remote_addr: Addr,
    read_buf: Mutex<BytesMut>,
    write: Mutex<WriteState>,
    context: Mutex<Option<Context>>,
}

impl Connection {
    pub(crate) fn new(
        fd: RawFd,
        ev_loop: &Arc<EventLoop>,
        remote_addr: Addr,
        local_addr: Addr,
        protocol: Arc<dyn Protocol>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Arc<Connection> {
        let conn = Arc::new_cyclic(|me| Connection {
            fd,
            ev_loop: Arc::downgrade(ev_loop),
            me: me.clone(),
            protocol,
            handler,
            closed: AtomicBool::new(false),
            local_addr,
            remote_addr,
            read_buf: Mutex::new(buffer::take()),
            write: Mutex::new(WriteState {
                buf: buffer::take(),
                action: Action::None,
            }),
            context: Mutex::new(None),
        });
        debug!("connection open: {} <--> {}", conn.local_addr, conn.remote_addr);
        conn
    }

    /// Fire the handler's `on_open`. Called by the server's registration
    /// trigger so the first callback runs on the owning worker thread.
    pub(crate) fn dispatch_open(conn: &Arc<Connection>) {
        conn.handler.on_open(conn);
    }

    pub fn unique_id(&self) -> u64 {
        self.fd as u64
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    pub fn remote_addr(&self) -> &Addr {
        &self.remote_addr
    }

    pub fn context(&self) -> Option<Context> {
        util::lock(&self.context).clone()
    }

    pub fn set_context(&self, ctx: Context) {
        *util::lock(&self.context) = Some(ctx);
    }

    /// Queue `data` for transmission, with `action` dispatched after the
    /// write buffer drains.
    ///
    /// The bytes pass through the codec's `encode` on the owning loop.
    /// Returns [`Error::ConnectionClosed`] once the connection has reached
    /// its terminal state.
    pub fn send(&self, data: &[u8], action: Action) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if data.is_empty() {
            return Ok(());
        }
        let ev_loop = self.ev_loop.upgrade().ok_or(Error::ConnectionClosed)?;

        let me = self.me.clone();
        let data = data.to_vec();
        ev_loop.trigger(move || {
            let Some(conn) = me.upgrade() else { return };
            if conn.closed.load(Ordering::Acquire) {
                return;
            }
            let encoded = conn.protocol.encode(&conn, &data);
            {
                let mut write = util::lock(&conn.write);
                write.buf.extend_from_slice(&encoded);
                write.action = action;
            }
            if let Some(ev_loop) = conn.ev_loop.upgrade()
                && let Err(err) = ev_loop.enable_read_write(conn.fd)
            {
                error!("enable_read_write: {err}");
            }
        });
        Ok(())
    }

    /// Close the connection from any thread. Idempotent: the second caller
    /// observes [`Error::ConnectionClosed`].
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let ev_loop = self.ev_loop.upgrade().ok_or(Error::ConnectionClosed)?;

        let me = self.me.clone();
        ev_loop.trigger(move || {
            if let Some(conn) = me.upgrade() {
                conn.handle_close();
            }
        });
        Ok(())
    }

    /// Terminal close sequence, loop-thread only. The CAS makes losers
    /// no-ops, so `on_close` fires exactly once and the buffers return to
    /// the pool exactly once.
    fn handle_close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(ev_loop) = self.ev_loop.upgrade()
            && let Err(err) = ev_loop.del_fd(self.fd)
        {
            error!("del_fd: {err}");
        }

        if let Some(conn) = self.me.upgrade() {
            self.handler.on_close(&conn);
        }

        if unsafe { libc::close(self.fd) } < 0 {
            error!("close: {}", io::Error::last_os_error());
        }

        buffer::put(std::mem::take(&mut *util::lock(&self.read_buf)));
        buffer::put(std::mem::take(&mut util::lock(&self.write).buf));
        metrics::CONNECTIONS_CLOSED.increment();

        debug!("connection closed: {} <-x-> {}", self.local_addr, self.remote_addr);
    }

    fn handle_read(&self, me: &Arc<Connection>) {
        let Some(ev_loop) = self.ev_loop.upgrade() else {
            return;
        };

        let n = ev_loop.with_packet_buf(|buf| {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n > 0 {
                util::lock(&self.read_buf).extend_from_slice(&buf[..n as usize]);
            }
            n
        });

        if n < 0 {
            let err = io::Error::last_os_error();
            if util::is_temporary(&err) {
                // EAGAIN: nothing to read this tick.
                return;
            }
            error!("read: {err}");
            self.handle_close();
            return;
        }
        if n == 0 {
            self.handle_close();
            return;
        }
        metrics::BYTES_RECEIVED.add(n as u64);

        loop {
            let frame = {
                let mut read_buf = util::lock(&self.read_buf);
                self.protocol.decode(me, &mut read_buf)
            };
            match frame {
                Some(data) if !data.is_empty() => self.handler.on_message(me, &data),
                _ => break,
            }
        }
    }

    fn handle_write(&self) {
        let Some(ev_loop) = self.ev_loop.upgrade() else {
            return;
        };

        let mut write = util::lock(&self.write);
        if !write.buf.is_empty() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    write.buf.as_ptr() as *const libc::c_void,
                    write.buf.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if util::is_temporary(&err) {
                    // Kernel buffer full; residue stays queued.
                    return;
                }
                drop(write);
                let _ = ev_loop.enable_read(self.fd);
                self.handle_close();
                error!("write: {err}");
                return;
            }

            metrics::BYTES_SENT.add(n as u64);
            if n as usize == write.buf.len() {
                write.buf.clear();
            } else {
                let _ = write.buf.split_to(n as usize);
            }
        }

        if write.buf.is_empty() {
            let action = std::mem::take(&mut write.action);
            drop(write);
            match action {
                Action::Close => self.handle_close(),
                Action::None => {
                    if let Err(err) = ev_loop.enable_read(self.fd) {
                        error!("enable_read: {err}");
                    }
                }
            }
        }
    }
}

impl EventHandler for Connection {
    fn on_event(&self, _fd: RawFd, events: Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };

        if events.is_err() {
            self.handle_close();
            return;
        }
        if events.is_readable() {
            self.handle_read(&me);
        }
        if events.is_writable() && !self.closed.load(Ordering::Acquire) {
            self.handle_write();
        }
    }

    fn close(&self) {
        let _ = Connection::close(self);
    }
}
