use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Local or remote endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Tcp(SocketAddr),
    Unix(PathBuf),
    /// Peer address the kernel reported in a family we do not decode.
    Unknown,
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Tcp(addr) => addr.fmt(f),
            Addr::Unix(path) => path.display().fmt(f),
            Addr::Unknown => f.write_str("<unknown>"),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Addr {
        Addr::Tcp(addr)
    }
}

/// Split `[scheme://]host:port` into `(network, address)`.
///
/// The scheme defaults to `tcp`; `tcp`, `tcp4`, `tcp6`, and `unix` are
/// recognized.
pub fn parse_listen_addr(addr: &str) -> Result<(&str, &str), Error> {
    let (network, address) = match addr.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("tcp", addr),
    };
    match network {
        "tcp" | "tcp4" | "tcp6" | "unix" => Ok((network, address)),
        _ => Err(Error::InvalidAddr(addr.to_string())),
    }
}

/// Decode a `sockaddr_storage` filled by `accept` into an [`Addr`].
pub(crate) fn sockaddr_to_addr(storage: &libc::sockaddr_storage) -> Addr {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
            let port = u16::from_be(sa.sin_port);
            Addr::Tcp(SocketAddr::from((ip, port)))
        }
        libc::AF_INET6 => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sa.sin6_addr.s6_addr);
            let port = u16::from_be(sa.sin6_port);
            Addr::Tcp(SocketAddr::from((ip, port)))
        }
        libc::AF_UNIX => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_un) };
            let path: Vec<u8> = sa
                .sun_path
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8)
                .collect();
            Addr::Unix(PathBuf::from(String::from_utf8_lossy(&path).into_owned()))
        }
        _ => Addr::Unknown,
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether a syscall error is transient (interrupted or would-block).
pub(crate) fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    )
}

/// Next retry delay: 5 ms doubling up to a 500 ms ceiling.
pub(crate) fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        Duration::from_millis(5)
    } else {
        (current * 2).min(Duration::from_millis(500))
    }
}

/// Number of online CPU cores, used as the default worker-loop count.
pub(crate) fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}

/// Set `O_NONBLOCK` on a descriptor.
pub(crate) fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
