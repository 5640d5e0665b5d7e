//! Client façade — a single outbound connection over the same runtime.
//!
//! One reactor thread for I/O plus a one-worker pool, so user callbacks
//! never run on the reactor thread and the reactor never blocks on user
//! code. The connect itself is blocking: refusal and unreachability fail
//! the `connect_*` call instead of surfacing later as events.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;

use harbor_core::config::RuntimeConfig;
use harbor_core::event::{ConnectionInformation, NetworkError, NetworkEvent};

use crate::reactor::{EventSink, Reactor, SendCompletion};
use crate::socket::{self, PeerAddr, Stream};
use crate::worker::WorkerPool;

pub type OnConnected = Arc<dyn Fn(&ConnectionInformation) + Send + Sync>;
pub type OnMessage = Arc<dyn Fn(&Bytes) + Send + Sync>;
pub type OnDisconnected = Arc<dyn Fn() + Send + Sync>;
pub type OnError = Arc<dyn Fn(NetworkError, &str) + Send + Sync>;

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_CLOSING: u8 = 3;

/// How often blocked sends and graceful shutdown re-check the buffer.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Callbacks {
    on_connected: RwLock<Option<OnConnected>>,
    on_message: RwLock<Option<OnMessage>>,
    on_disconnected: RwLock<Option<OnDisconnected>>,
    on_error: RwLock<Option<OnError>>,
}

struct ClientRuntime {
    reactor: Arc<Reactor>,
    pool: Arc<WorkerPool>,
}

/// A single-connection network client.
///
/// Holds at most one connection at a time; a `connect_*` call while
/// connected fails. All callbacks run on the worker thread — do not call
/// [`Client::disconnect`] from inside one.
pub struct Client {
    config: RuntimeConfig,
    state: Arc<AtomicU8>,
    connection_id: Arc<AtomicU64>,
    runtime: RwLock<Option<ClientRuntime>>,
    callbacks: Arc<Callbacks>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            state: Arc::new(AtomicU8::new(STATE_DISCONNECTED)),
            connection_id: Arc::new(AtomicU64::new(0)),
            runtime: RwLock::new(None),
            callbacks: Arc::new(Callbacks::default()),
        }
    }

    // ── Connection management ─────────────────────────────────────────────────

    /// Connect to a numeric IPv4 address.
    pub fn connect_ipv4(&self, host: &str, port: u16) -> bool {
        let Some(addr) = socket::parse_ipv4(host, port) else {
            tracing::error!(host, "not a numeric IPv4 address");
            return false;
        };
        self.connect_with(|| socket::tcp_connect(addr))
    }

    /// Connect to a numeric IPv6 address.
    pub fn connect_ipv6(&self, host: &str, port: u16) -> bool {
        let Some(addr) = socket::parse_ipv6(host, port) else {
            tracing::error!(host, "not a numeric IPv6 address");
            return false;
        };
        self.connect_with(|| socket::tcp_connect(addr))
    }

    /// Connect to a Unix-domain socket path.
    pub fn connect_unix_domain(&self, path: &str) -> bool {
        let path = std::path::PathBuf::from(path);
        self.connect_with(move || socket::unix_connect(&path))
    }

    /// Close immediately, discarding anything still buffered. Also releases
    /// the runtime threads after the peer closed first.
    ///
    /// The client holds one connection, so this is also the per-connection
    /// close (the counterpart of `Server::disconnect`): an application that
    /// decides the server is misbehaving — for example after decoding its
    /// bytes — calls this to drop the connection.
    pub fn disconnect(&self) {
        let previous = self.state.swap(STATE_CLOSING, Ordering::SeqCst);
        if previous == STATE_CLOSING {
            return;
        }
        self.teardown();
    }

    /// Stop accepting sends, wait for the send buffer to drain, then close.
    /// `timeout_ms` of 0 waits indefinitely. Returns false if the buffer
    /// did not drain in time (the connection is closed regardless).
    pub fn graceful_shutdown(&self, timeout_ms: u64) -> bool {
        if self
            .state
            .compare_exchange(STATE_CONNECTED, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        let drained = loop {
            if self.buffered_bytes() == 0 {
                break true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break false;
            }
            std::thread::sleep(RETRY_INTERVAL);
        };

        self.teardown();
        drained
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Enqueue bytes for transmission, waiting up to `timeout_ms` for buffer
    /// headroom. `timeout_ms` of 0 is a plain non-blocking enqueue: it fails
    /// immediately when the 32 MiB ceiling is hit.
    pub fn send_data(&self, data: &[u8], timeout_ms: u64) -> bool {
        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        loop {
            if self.state.load(Ordering::Acquire) != STATE_CONNECTED {
                return false;
            }
            let accepted = {
                let runtime = self.runtime.read();
                let Some(runtime) = runtime.as_ref() else {
                    return false;
                };
                runtime
                    .reactor
                    .send_data(self.connection_id.load(Ordering::Acquire), data)
            };
            if accepted {
                return true;
            }
            match deadline {
                Some(d) if Instant::now() < d => std::thread::sleep(RETRY_INTERVAL),
                _ => return false,
            }
        }
    }

    /// Enqueue bytes and invoke `callback(success, bytes_sent)` on the
    /// reactor thread once they have fully left the send buffer. Returning
    /// true means enqueued, not delivered.
    pub fn send_async(&self, data: &[u8], callback: impl FnOnce(bool, usize) + Send + 'static) -> bool {
        if self.state.load(Ordering::Acquire) != STATE_CONNECTED {
            return false;
        }
        let runtime = self.runtime.read();
        let Some(runtime) = runtime.as_ref() else {
            return false;
        };
        let completion: SendCompletion = Box::new(callback);
        runtime
            .reactor
            .send_async(self.connection_id.load(Ordering::Acquire), data, completion)
    }

    /// Bytes currently sitting in the send buffer. Useful for application
    /// level flow control against the watermarks.
    pub fn get_send_buffer_size(&self) -> usize {
        self.buffered_bytes()
    }

    // ── State ─────────────────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CONNECTED
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────
    // All run on the worker thread. Replaceable at any time; the new
    // callback takes effect for the next event.

    pub fn set_on_connected(&self, callback: OnConnected) {
        *self.callbacks.on_connected.write() = Some(callback);
    }

    pub fn set_on_message(&self, callback: OnMessage) {
        *self.callbacks.on_message.write() = Some(callback);
    }

    pub fn set_on_disconnected(&self, callback: OnDisconnected) {
        *self.callbacks.on_disconnected.write() = Some(callback);
    }

    pub fn set_on_error(&self, callback: OnError) {
        *self.callbacks.on_error.write() = Some(callback);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn connect_with(
        &self,
        connect: impl FnOnce() -> std::io::Result<(Stream, PeerAddr)>,
    ) -> bool {
        if self
            .state
            .compare_exchange(
                STATE_DISCONNECTED,
                STATE_CONNECTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::warn!("connect refused: client is not disconnected");
            return false;
        }

        let (stream, peer) = match connect() {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?NetworkError::from_io_error(&e), "connect failed");
                self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                return false;
            }
        };

        let pool = Arc::new(WorkerPool::new(1, self.config.threads.queue_capacity));
        pool.set_callback(self.dispatcher());
        pool.start();

        let reactor = Arc::new(Reactor::new(0, EventSink::Pool(pool.clone()), &self.config));
        if !reactor.start() {
            pool.stop();
            self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
            return false;
        }

        let Some(id) = reactor.add_connection(stream, peer) else {
            reactor.stop();
            pool.stop();
            self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
            return false;
        };

        self.connection_id.store(id, Ordering::Release);
        *self.runtime.write() = Some(ClientRuntime { reactor, pool });
        // The TCP handshake already completed (blocking connect), so the
        // connection is usable before the Connected event reaches the
        // worker; the callback still fires there.
        self.state.store(STATE_CONNECTED, Ordering::SeqCst);
        true
    }

    fn dispatcher(&self) -> Arc<dyn Fn(&NetworkEvent) + Send + Sync> {
        let callbacks = self.callbacks.clone();
        let state = self.state.clone();
        let connection_id = self.connection_id.clone();
        Arc::new(move |event: &NetworkEvent| match event {
            NetworkEvent::Connected { info, .. } => {
                let snapshot = callbacks.on_connected.read().clone();
                if let Some(cb) = snapshot {
                    cb(info);
                }
            }
            NetworkEvent::Data { payload, .. } => {
                let snapshot = callbacks.on_message.read().clone();
                if let Some(cb) = snapshot {
                    cb(payload);
                }
            }
            NetworkEvent::Error { error, message, .. } => {
                // Don't stomp an in-progress close; otherwise the id is dead.
                let _ = state.compare_exchange(
                    STATE_CONNECTED,
                    STATE_DISCONNECTED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                connection_id.store(0, Ordering::Release);
                let snapshot = callbacks.on_error.read().clone();
                if let Some(cb) = snapshot {
                    cb(*error, message);
                }
                let snapshot = callbacks.on_disconnected.read().clone();
                if let Some(cb) = snapshot {
                    cb();
                }
            }
            NetworkEvent::Disconnected { .. } => {
                let _ = state.compare_exchange(
                    STATE_CONNECTED,
                    STATE_DISCONNECTED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                connection_id.store(0, Ordering::Release);
                let snapshot = callbacks.on_disconnected.read().clone();
                if let Some(cb) = snapshot {
                    cb();
                }
            }
        })
    }

    fn buffered_bytes(&self) -> usize {
        let runtime = self.runtime.read();
        runtime
            .as_ref()
            .map(|r| r.reactor.send_buffer_size(self.connection_id.load(Ordering::Acquire)))
            .unwrap_or(0)
    }

    fn teardown(&self) {
        let runtime = self.runtime.write().take();
        if let Some(runtime) = runtime {
            runtime.reactor.stop();
            runtime.pool.stop();
        }
        self.connection_id.store(0, Ordering::Release);
        self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
