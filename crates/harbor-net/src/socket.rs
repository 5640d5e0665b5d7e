//! Socket construction and address plumbing, built on socket2.
//!
//! Covers both address families the runtime accepts connections on (IPv4 and
//! IPv6, as separate sockets — no dual-stack mapping) plus Unix-domain
//! sockets. Hosts are numeric only; there is no name resolution here.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use harbor_core::event::ConnectionInformation;

/// A connected stream owned by exactly one reactor.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_nonblocking(on),
            Stream::Unix(s) => s.set_nonblocking(on),
        }
    }

    pub fn shutdown(&self) {
        match self {
            Stream::Tcp(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            Stream::Unix(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// Peer address of a connection. Carried into [`ConnectionInformation`];
/// Unix-domain peers are identified by the socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Ip(SocketAddr),
    Unix(PathBuf),
}

impl PeerAddr {
    pub fn to_connection_info(&self, connection_id: u64) -> ConnectionInformation {
        match self {
            PeerAddr::Ip(addr) => ConnectionInformation {
                connection_id,
                peer_address: addr.ip().to_string(),
                peer_port: addr.port(),
                is_unix_domain: false,
            },
            PeerAddr::Unix(path) => ConnectionInformation {
                connection_id,
                peer_address: path.display().to_string(),
                peer_port: 0,
                is_unix_domain: true,
            },
        }
    }
}

/// A listening socket owned by one acceptor thread.
#[derive(Debug)]
pub enum Listener {
    Tcp(std::net::TcpListener),
    Unix {
        listener: std::os::unix::net::UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    /// Accept one pending connection. The accepted stream is still in
    /// blocking mode; the acceptor flips it before hand-off.
    pub fn accept(&self) -> io::Result<(Stream, PeerAddr)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((Stream::Tcp(stream), PeerAddr::Ip(addr)))
            }
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept()?;
                // Unix peers are anonymous; identify them by the listening path.
                Ok((Stream::Unix(stream), PeerAddr::Unix(path.clone())))
            }
        }
    }

    /// Remove the socket file of a Unix-domain listener. No-op for TCP.
    pub fn cleanup(&self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix { listener, .. } => listener.as_raw_fd(),
        }
    }
}

/// Parse a numeric IPv4 host into a socket address.
pub fn parse_ipv4(host: &str, port: u16) -> Option<SocketAddr> {
    let ip: Ipv4Addr = host.parse().ok()?;
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parse a numeric IPv6 host (RFC 4291 textual form) into a socket address.
pub fn parse_ipv6(host: &str, port: u16) -> Option<SocketAddr> {
    let ip: Ipv6Addr = host.trim_start_matches('[').trim_end_matches(']').parse().ok()?;
    Some(SocketAddr::new(IpAddr::V6(ip), port))
}

/// Build a non-blocking TCP listener. IPv6 listeners are v6-only so a
/// universal-IP server can bind both families on one port.
pub fn tcp_listener(addr: SocketAddr, backlog: i32) -> io::Result<Listener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(Listener::Tcp(socket.into()))
}

/// Build a non-blocking Unix-domain listener, replacing any stale socket
/// file left behind by a previous run.
pub fn unix_listener(path: &Path, backlog: i32) -> io::Result<Listener> {
    let _ = std::fs::remove_file(path);
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&SockAddr::unix(path)?)?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(Listener::Unix {
        listener: socket.into(),
        path: path.to_path_buf(),
    })
}

/// Connect to a TCP peer. The connect itself is blocking so refusal and
/// unreachability fail the call; the stream comes back non-blocking with
/// TCP_NODELAY and keepalive set.
pub fn tcp_connect(addr: SocketAddr) -> io::Result<(Stream, PeerAddr)> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect(&SockAddr::from(addr))?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    socket.set_nonblocking(true)?;
    Ok((Stream::Tcp(socket.into()), PeerAddr::Ip(addr)))
}

/// Connect to a Unix-domain peer. Blocking connect, non-blocking stream.
pub fn unix_connect(path: &Path) -> io::Result<(Stream, PeerAddr)> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.connect(&SockAddr::unix(path)?)?;
    socket.set_nonblocking(true)?;
    Ok((Stream::Unix(socket.into()), PeerAddr::Unix(path.to_path_buf())))
}
