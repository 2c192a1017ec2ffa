//! reactline — multi-reactor non-blocking TCP server framework.
//!
//! One acceptor loop distributes accepted connections round-robin across N
//! worker loops; each worker drives its connections' I/O, codec framing,
//! and handler dispatch on a single thread over an epoll (Linux) or kqueue
//! (BSD/macOS) readiness poller.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reactline::{Action, Config, Connection, ConnectionHandler, Server};
//!
//! struct Echo;
//!
//! impl ConnectionHandler for Echo {
//!     fn on_message(&self, conn: &Arc<Connection>, data: &[u8]) {
//!         let _ = conn.send(data, Action::None);
//!     }
//! }
//!
//! fn main() -> Result<(), reactline::Error> {
//!     let server = Server::builder(Config {
//!         addr: "127.0.0.1:7878".into(),
//!         ..Config::default()
//!     })
//!     .handler(Arc::new(Echo))
//!     .build();
//!     server.start()
//! }
//! ```
//!
//! # Platform
//!
//! Linux (epoll + eventfd) and the BSD family / macOS (kqueue +
//! `EVFILT_USER`). Windows is not supported.

// ── Internal modules ────────────────────────────────────────────────────
mod buffer;
mod listener;
mod util;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod metrics;
pub mod poller;
pub mod protocol;
pub mod server;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Local or remote endpoint of a connection.
pub use util::Addr;
/// `[scheme://]host:port` splitter.
pub use util::parse_listen_addr;
/// Server configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Post-drain action recorded by [`Connection::send`].
pub use connection::Action;
/// A socket owned by one worker loop.
pub use connection::Connection;
/// Opaque per-connection application state.
pub use connection::Context;
/// Runtime errors.
pub use error::Error;
/// Single-threaded executor owning one poller.
pub use event_loop::EventLoop;
/// Capability registered for a descriptor on an event loop.
pub use event_loop::EventHandler;
/// Application callbacks for connection lifecycle and inbound messages.
pub use handler::ConnectionHandler;
/// Handler used when a server is built without one.
pub use handler::NoopHandler;
/// Readiness flags carried on a single event notification.
pub use poller::Event;
/// Default codec: every read is one message, writes go out verbatim.
pub use protocol::Passthrough;
/// Application-layer codec plugged into a connection.
pub use protocol::Protocol;
/// TCP server bound to one listen address.
pub use server::Server;
/// Builder composing a [`Server`] from config, codec, and handler.
pub use server::ServerBuilder;
