//! Multi-reactor server: one acceptor loop distributing accepted
//! connections round-robin across N single-threaded worker loops.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::handler::{ConnectionHandler, NoopHandler};
use crate::listener::{self, Listener};
use crate::metrics;
use crate::protocol::{Passthrough, Protocol};
use crate::util::{self, Addr};

/// Builder composing a [`Server`] from a config plus optional codec and
/// handler (defaults: passthrough codec, no-op handler).
pub struct ServerBuilder {
    config: Config,
    protocol: Option<Arc<dyn Protocol>>,
    handler: Option<Arc<dyn ConnectionHandler>>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        ServerBuilder {
            config,
            protocol: None,
            handler: None,
        }
    }

    /// Set the application-layer codec.
    pub fn protocol(mut self, protocol: Arc<dyn Protocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the connection handler.
    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Arc<Server> {
        Arc::new(Server {
            config: self.config,
            protocol: self.protocol.unwrap_or_else(|| Arc::new(Passthrough)),
            handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
            state: Mutex::new(State::default()),
            next_worker: Arc::new(AtomicUsize::new(0)),
            in_shutdown: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[derive(Default)]
struct State {
    acceptor: Option<Arc<EventLoop>>,
    workers: Vec<Arc<EventLoop>>,
}

/// TCP server bound to one listen address.
///
/// [`start`](Server::start) blocks the calling thread in the acceptor loop
/// until [`shutdown`](Server::shutdown) is called from another thread.
pub struct Server {
    config: Config,
    protocol: Arc<dyn Protocol>,
    handler: Arc<dyn ConnectionHandler>,
    state: Mutex<State>,
    next_worker: Arc<AtomicUsize>,
    in_shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn builder(config: Config) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Bind the listener, spawn the worker loops, and run the acceptor
    /// loop on the calling thread until shutdown.
    pub fn start(&self) -> Result<(), Error> {
        if self.in_shutdown.load(Ordering::Acquire) {
            return Err(Error::ServerClosed);
        }
        self.config.validate()?;

        let acceptor = EventLoop::new()?;
        let num_loops = if self.config.num_loops == 0 {
            util::num_cpus()
        } else {
            self.config.num_loops
        };
        let mut workers = Vec::with_capacity(num_loops);
        for _ in 0..num_loops {
            workers.push(EventLoop::new()?);
        }

        {
            let mut state = util::lock(&self.state);
            state.acceptor = Some(acceptor.clone());
            state.workers = workers.clone();
        }

        // Until wait() runs somewhere, stop() would block on the pollers'
        // exit barriers; on an early error, forget the loops instead.
        let socket = match listener::bind_socket(&self.config.addr, self.config.backlog) {
            Ok(socket) => socket,
            Err(err) => {
                self.clear_state();
                return Err(err);
            }
        };
        debug!("listening on {}", socket.local_addr);

        let listener = Listener::new(
            socket,
            self.config.tcp_nodelay,
            &acceptor,
            self.in_shutdown.clone(),
            self.new_conn_fn(&workers),
        );
        if let Err(err) = acceptor.add_fd(listener.fd(), listener.clone()) {
            unsafe {
                libc::close(listener.fd());
            }
            self.clear_state();
            return Err(err);
        }

        let mut handles = Vec::with_capacity(num_loops);
        for (i, worker) in workers.iter().enumerate() {
            let worker = worker.clone();
            let handle = thread::Builder::new()
                .name(format!("reactline-worker-{i}"))
                .spawn(move || worker.wait())
                .map_err(Error::Io)?;
            handles.push(handle);
        }

        acceptor.wait();

        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Stop every worker loop and the acceptor. Idempotent: subsequent
    /// `start`/`shutdown` calls fail with [`Error::ServerClosed`].
    pub fn shutdown(&self) -> Result<(), Error> {
        if self.in_shutdown.swap(true, Ordering::AcqRel) {
            return Err(Error::ServerClosed);
        }

        let state = util::lock(&self.state);
        for worker in &state.workers {
            if let Err(err) = worker.stop() {
                error!("worker stop: {err}");
            }
        }
        if let Some(acceptor) = &state.acceptor
            && let Err(err) = acceptor.stop()
        {
            error!("acceptor stop: {err}");
        }
        Ok(())
    }

    fn clear_state(&self) {
        let mut state = util::lock(&self.state);
        state.acceptor = None;
        state.workers.clear();
    }

    /// Build the accept callback: pick the next worker round-robin,
    /// construct the connection bound to it, and register it through the
    /// worker's trigger queue so `on_open` and every later callback run on
    /// the worker thread.
    fn new_conn_fn(&self, workers: &[Arc<EventLoop>]) -> listener::NewConnFn {
        let workers = workers.to_vec();
        let next_worker = self.next_worker.clone();
        let protocol = self.protocol.clone();
        let handler = self.handler.clone();

        Box::new(move |fd: RawFd, peer: Addr| {
            let idx = next_worker.fetch_add(1, Ordering::Relaxed) % workers.len();
            let worker = &workers[idx];

            let conn = Connection::new(
                fd,
                worker,
                peer,
                local_conn_addr(fd),
                protocol.clone(),
                handler.clone(),
            );

            let worker2 = worker.clone();
            worker.trigger(move || {
                if let Err(err) = worker2.add_fd(fd, conn.clone()) {
                    error!("add_fd: {err}");
                    return;
                }
                metrics::CONNECTIONS_ACCEPTED.increment();
                Connection::dispatch_open(&conn);
            });
        })
    }
}

/// The accepted socket's own local address (per-connection, not the
/// listener's wildcard).
fn local_conn_addr(fd: RawFd) -> Addr {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        return Addr::Unknown;
    }
    util::sockaddr_to_addr(&storage)
}
