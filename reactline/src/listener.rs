//! Accept source registered on the acceptor loop.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::error;

use crate::error::Error;
use crate::event_loop::{EventHandler, EventLoop};
use crate::poller::Event;
use crate::util::{self, Addr};

/// Callback invoked with each accepted descriptor and its peer address,
/// on the acceptor loop's thread.
pub(crate) type NewConnFn = Box<dyn Fn(RawFd, Addr) + Send + Sync>;

/// Non-blocking listening socket. On readable it accepts a single
/// connection (level-triggered polling re-notifies while more are queued),
/// makes it non-blocking, and hands it to the new-connection callback.
pub(crate) struct Listener {
    fd: RawFd,
    local_addr: Addr,
    unix_path: Option<PathBuf>,
    tcp_nodelay: bool,
    ev_loop: Weak<EventLoop>,
    in_shutdown: Arc<AtomicBool>,
    new_conn: NewConnFn,
}

impl Listener {
    pub(crate) fn new(
        socket: BoundSocket,
        tcp_nodelay: bool,
        ev_loop: &Arc<EventLoop>,
        in_shutdown: Arc<AtomicBool>,
        new_conn: NewConnFn,
    ) -> Arc<Listener> {
        Arc::new(Listener {
            fd: socket.fd,
            local_addr: socket.local_addr,
            unix_path: socket.unix_path,
            tcp_nodelay,
            ev_loop: Arc::downgrade(ev_loop),
            in_shutdown,
            new_conn,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    /// Deferred close: deregister and release the socket on the acceptor
    /// loop's thread.
    pub(crate) fn close(&self) {
        let Some(ev_loop) = self.ev_loop.upgrade() else {
            return;
        };
        let fd = self.fd;
        let unix_path = self.unix_path.clone();
        let ev_loop2 = ev_loop.clone();
        ev_loop.trigger(move || {
            let _ = ev_loop2.del_fd(fd);
            unsafe {
                libc::close(fd);
            }
            if let Some(path) = unix_path {
                let _ = std::fs::remove_file(path);
            }
        });
    }

    fn accept_one(&self) {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let ncfd = unsafe {
            libc::accept(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if ncfd < 0 {
            let err = io::Error::last_os_error();
            if util::is_temporary(&err) || self.in_shutdown.load(Ordering::Acquire) {
                return;
            }
            error!("accept: {err}");
            return;
        }

        if let Err(err) = util::set_nonblocking(ncfd) {
            unsafe {
                libc::close(ncfd);
            }
            error!("set_nonblocking: {err}");
            return;
        }

        let family = storage.ss_family as libc::c_int;
        if self.tcp_nodelay && (family == libc::AF_INET || family == libc::AF_INET6) {
            let optval: libc::c_int = 1;
            unsafe {
                libc::setsockopt(
                    ncfd,
                    libc::IPPROTO_TCP,
                    libc::TCP_NODELAY,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }

        (self.new_conn)(ncfd, util::sockaddr_to_addr(&storage));
    }
}

impl EventHandler for Listener {
    fn on_event(&self, _fd: RawFd, events: Event) {
        if events.is_readable() {
            self.accept_one();
        }
    }

    fn close(&self) {
        Listener::close(self);
    }
}

/// A bound, listening, non-blocking socket ready to hand to a [`Listener`].
pub(crate) struct BoundSocket {
    pub fd: RawFd,
    pub local_addr: Addr,
    pub unix_path: Option<PathBuf>,
}

/// Bind a listening socket for `[scheme://]host:port`.
pub(crate) fn bind_socket(addr: &str, backlog: i32) -> Result<BoundSocket, Error> {
    let (network, address) = util::parse_listen_addr(addr)?;
    match network {
        "unix" => bind_unix(address, backlog),
        _ => bind_tcp(network, address, backlog),
    }
}

fn bind_tcp(network: &str, address: &str, backlog: i32) -> Result<BoundSocket, Error> {
    use std::net::ToSocketAddrs;

    let resolved = address
        .to_socket_addrs()
        .map_err(|_| Error::InvalidAddr(address.to_string()))?;
    let sock_addr = resolved
        .into_iter()
        .find(|a| match network {
            "tcp4" => a.is_ipv4(),
            "tcp6" => a.is_ipv6(),
            _ => true,
        })
        .ok_or_else(|| Error::InvalidAddr(address.to_string()))?;

    let domain = if sock_addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(sock_addr, &mut storage);
    let ret = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, addr_len) };
    if ret < 0 {
        return Err(close_on_err(fd));
    }

    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(close_on_err(fd));
    }
    if let Err(err) = util::set_nonblocking(fd) {
        unsafe {
            libc::close(fd);
        }
        return Err(err.into());
    }

    Ok(BoundSocket {
        fd,
        local_addr: local_tcp_addr(fd),
        unix_path: None,
    })
}

fn bind_unix(path: &str, backlog: i32) -> Result<BoundSocket, Error> {
    let path_bytes = path.as_bytes();
    let mut sa: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    if path_bytes.len() >= std::mem::size_of_val(&sa.sun_path) {
        return Err(Error::InvalidAddr(path.to_string()));
    }

    // Remove a stale socket file from a previous run.
    let _ = std::fs::remove_file(path);

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in sa.sun_path.iter_mut().zip(path_bytes) {
        *dst = *src as libc::c_char;
    }
    let addr_len = (std::mem::size_of::<libc::sa_family_t>() + path_bytes.len() + 1)
        as libc::socklen_t;

    let ret = unsafe { libc::bind(fd, &sa as *const _ as *const libc::sockaddr, addr_len) };
    if ret < 0 {
        return Err(close_on_err(fd));
    }
    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(close_on_err(fd));
    }
    if let Err(err) = util::set_nonblocking(fd) {
        unsafe {
            libc::close(fd);
        }
        return Err(err.into());
    }

    Ok(BoundSocket {
        fd,
        local_addr: Addr::Unix(PathBuf::from(path)),
        unix_path: Some(PathBuf::from(path)),
    })
}

fn close_on_err(fd: RawFd) -> Error {
    let err = io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    err.into()
}

/// Fill `storage` from a resolved socket address; returns the sockaddr
/// length for `bind`.
fn socket_addr_to_sockaddr(
    addr: SocketAddr,
    storage: &mut libc::sockaddr_storage,
) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in) };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in6) };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

/// Read back the bound address (resolves port 0 to the kernel's pick).
fn local_tcp_addr(fd: RawFd) -> Addr {
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
