//! Thin wrapper over the OS readiness mechanism (epoll on Linux, kqueue on
//! the BSDs) via `mio::Poll`.
//!
//! One monitor per owning thread: the reactor and the acceptor each build
//! their own and drive it from their loop thread only. Registration uses the
//! raw descriptor as the token, so a readiness event maps straight back to
//! the connection map. Cross-thread code never touches the monitor — it
//! nudges the owning loop through the [`IoMonitor::waker`] handle instead.
//!
//! mio delivers edge-triggered readiness; callers drain reads until
//! would-block and keep draining writes while the send buffer has data.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

/// Reserved token for cross-thread wakeups. Never a valid descriptor.
pub const WAKER_TOKEN: Token = Token(usize::MAX);

/// A readiness monitor owned by exactly one loop thread.
pub struct IoMonitor {
    poll: Poll,
    waker: Arc<Waker>,
}

impl IoMonitor {
    /// Allocate the underlying readiness queue and its waker.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self { poll, waker })
    }

    /// Handle that wakes [`IoMonitor::wait`] from any thread.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register `fd` for read readiness. The descriptor is its own token.
    pub fn register_read(&self, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
    }

    /// Arm or disarm write interest, keeping read interest in place.
    pub fn set_write_interest(&self, fd: RawFd, enabled: bool) -> io::Result<()> {
        let interest = if enabled {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
    }

    /// Remove `fd` from the set. Safe to call for descriptors that were
    /// never registered.
    pub fn deregister(&self, fd: RawFd) {
        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
    }

    /// Block up to `timeout` for readiness events.
    ///
    /// An `ErrorKind::Interrupted` error is surfaced to the caller — a
    /// signal interrupted the wait and the loop should simply retry; any
    /// other error is fatal for the loop.
    pub fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }
}
