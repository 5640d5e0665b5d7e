//! Network events — the only types that cross the reactor/worker boundary.
//!
//! Events carry a connection id, never a descriptor. The descriptor stays
//! with the reactor that owns it; worker threads and user code see only
//! [`ConnectionInformation`].

use bytes::Bytes;

/// Semantic error categories mapped from platform error numbers. Business
/// logic branches on these, never on raw errno values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Orderly shutdown by the peer (FIN, or EPIPE on write).
    #[error("peer closed the connection")]
    PeerClosed,

    /// Connection reset (RST).
    #[error("connection reset by peer")]
    ResetByPeer,

    /// Operation or connection timed out.
    #[error("connection timed out")]
    Timeout,

    /// The peer refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// Network or host unreachable.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// Framing violation reported by the protocol layer.
    #[error("protocol violation")]
    ProtocolViolation,

    /// Any other syscall failure.
    #[error("syscall failure")]
    SyscallFailure,
}

impl NetworkError {
    /// Map a raw errno value to its semantic category.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            ECONNRESET => NetworkError::ResetByPeer,
            ETIMEDOUT => NetworkError::Timeout,
            EPIPE => NetworkError::PeerClosed,
            ECONNREFUSED => NetworkError::ConnectionRefused,
            ENETUNREACH | EHOSTUNREACH => NetworkError::NetworkUnreachable,
            _ => NetworkError::SyscallFailure,
        }
    }

    /// Map an I/O error. Falls back on the portable `ErrorKind` when the
    /// raw OS error is unavailable.
    pub fn from_io_error(err: &std::io::Error) -> Self {
        if let Some(errno) = err.raw_os_error() {
            return Self::from_errno(errno);
        }
        match err.kind() {
            std::io::ErrorKind::ConnectionReset => NetworkError::ResetByPeer,
            std::io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused,
            std::io::ErrorKind::TimedOut => NetworkError::Timeout,
            std::io::ErrorKind::BrokenPipe => NetworkError::PeerClosed,
            _ => NetworkError::SyscallFailure,
        }
    }
}

// errno constants, spelled out so this crate stays free of a libc dependency.
// Values are identical on Linux and the BSDs for this set, except where noted.
const EPIPE: i32 = 32;
#[cfg(target_os = "linux")]
const ECONNRESET: i32 = 104;
#[cfg(not(target_os = "linux"))]
const ECONNRESET: i32 = 54;
#[cfg(target_os = "linux")]
const ETIMEDOUT: i32 = 110;
#[cfg(not(target_os = "linux"))]
const ETIMEDOUT: i32 = 60;
#[cfg(target_os = "linux")]
const ECONNREFUSED: i32 = 111;
#[cfg(not(target_os = "linux"))]
const ECONNREFUSED: i32 = 61;
#[cfg(target_os = "linux")]
const ENETUNREACH: i32 = 101;
#[cfg(not(target_os = "linux"))]
const ENETUNREACH: i32 = 51;
#[cfg(target_os = "linux")]
const EHOSTUNREACH: i32 = 113;
#[cfg(not(target_os = "linux"))]
const EHOSTUNREACH: i32 = 65;

/// Read-only view of a connection for worker threads and user code.
///
/// Never contains the descriptor. Stable for the connection's lifetime and
/// safe to cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInformation {
    pub connection_id: u64,
    /// Peer IP address, or the socket path for Unix-domain connections.
    pub peer_address: String,
    /// Peer port. 0 for Unix-domain connections.
    pub peer_port: u16,
    pub is_unix_domain: bool,
}

/// A network event produced by a reactor and consumed on a worker thread.
///
/// For any one connection id the sequence is: exactly one `Connected`, zero
/// or more `Data`, then exactly one of `Disconnected` or `Error`. Nothing is
/// emitted for an id after its terminal event.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Connected {
        connection_id: u64,
        info: ConnectionInformation,
    },
    Data {
        connection_id: u64,
        payload: Bytes,
    },
    Disconnected {
        connection_id: u64,
    },
    Error {
        connection_id: u64,
        error: NetworkError,
        message: String,
    },
}

impl NetworkEvent {
    /// The connection this event belongs to. Used by the worker pool to
    /// shard events so one connection is always handled by one worker.
    pub fn connection_id(&self) -> u64 {
        match self {
            NetworkEvent::Connected { connection_id, .. }
            | NetworkEvent::Data { connection_id, .. }
            | NetworkEvent::Disconnected { connection_id }
            | NetworkEvent::Error { connection_id, .. } => *connection_id,
        }
    }
}
