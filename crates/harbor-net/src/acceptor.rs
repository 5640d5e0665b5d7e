//! Acceptor — one thread, one listening descriptor.
//!
//! The acceptor waits for connection readiness on its own monitor, accepts
//! until would-block, flips each new descriptor to non-blocking, and hands
//! it to one of the reactors by round-robin. The hand-off never blocks: it
//! enqueues into the target reactor's command queue.

use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::Events;
use parking_lot::Mutex;

use crate::monitor::IoMonitor;
use crate::reactor::Reactor;
use crate::socket::Listener;

// Accept errors that mean the process (or system) is out of descriptors.
// A tight retry loop would spin at 100% CPU, so these back off briefly.
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;
const DESCRIPTOR_BACKOFF: Duration = Duration::from_millis(10);

struct Inner {
    running: AtomicBool,
    waker: Mutex<Option<Arc<mio::Waker>>>,
}

/// Owns a listening descriptor and feeds accepted connections to reactors.
pub struct Acceptor {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Start accepting on `listener`, distributing connections across
    /// `reactors`. None if the monitor cannot be allocated or the listener
    /// cannot be registered.
    pub fn start(listener: Listener, reactors: Vec<Arc<Reactor>>) -> Option<Self> {
        assert!(!reactors.is_empty(), "acceptor needs at least one reactor");

        let monitor = match IoMonitor::new() {
            Ok(monitor) => monitor,
            Err(e) => {
                tracing::error!(error = %e, "acceptor monitor allocation failed");
                return None;
            }
        };
        if let Err(e) = monitor.register_read(listener.as_raw_fd()) {
            tracing::error!(error = %e, "listener registration failed");
            return None;
        }

        let inner = Arc::new(Inner {
            running: AtomicBool::new(true),
            waker: Mutex::new(Some(monitor.waker())),
        });

        let loop_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("harbor-acceptor".into())
            .spawn(move || accept_loop(loop_inner, monitor, listener, reactors))
            .expect("failed to spawn acceptor thread");

        Some(Self {
            inner,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Close the listening descriptor and join the thread. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(waker) = self.inner.waker.lock().as_ref() {
            let _ = waker.wake();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        *self.inner.waker.lock() = None;
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    inner: Arc<Inner>,
    mut monitor: IoMonitor,
    listener: Listener,
    reactors: Vec<Arc<Reactor>>,
) {
    let mut events = Events::with_capacity(8);
    let mut round_robin = 0usize;

    tracing::debug!("acceptor started");
    while inner.running.load(Ordering::Acquire) {
        match monitor.wait(&mut events, Some(Duration::from_millis(100))) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "acceptor wait failed, terminating");
                break;
            }
        }

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(error = %e, "failed to set accepted socket non-blocking");
                        continue;
                    }

                    let reactor = &reactors[round_robin % reactors.len()];
                    round_robin = round_robin.wrapping_add(1);

                    match reactor.add_connection(stream, peer) {
                        Some(id) => tracing::debug!(
                            connection_id = id,
                            reactor_id = reactor.reactor_id(),
                            "connection accepted"
                        ),
                        None => tracing::warn!(
                            reactor_id = reactor.reactor_id(),
                            "reactor rejected connection hand-off"
                        ),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    if matches!(e.raw_os_error(), Some(EMFILE) | Some(ENFILE)) {
                        std::thread::sleep(DESCRIPTOR_BACKOFF);
                    }
                    break;
                }
            }
        }
    }

    monitor.deregister(listener.as_raw_fd());
    listener.cleanup();
    tracing::debug!("acceptor stopped");
}
