//! Server façade — composes acceptors, reactors, and a worker pool behind a
//! callback API.
//!
//! Thread layout: one acceptor thread per listener, R reactor threads
//! (available parallelism by default), W worker threads. User callbacks run
//! on worker threads, sharded so one connection's events stay in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use harbor_core::config::RuntimeConfig;
use harbor_core::conn_id::ConnectionId;
use harbor_core::event::{ConnectionInformation, NetworkError, NetworkEvent};

use crate::acceptor::Acceptor;
use crate::reactor::{EventSink, Reactor};
use crate::socket::{self, Listener};
use crate::worker::WorkerPool;

pub type OnClientConnected = Arc<dyn Fn(&ConnectionInformation) + Send + Sync>;
pub type OnMessage = Arc<dyn Fn(u64, &Bytes) + Send + Sync>;
pub type OnClientDisconnected = Arc<dyn Fn(u64) + Send + Sync>;
pub type OnConnectionError = Arc<dyn Fn(u64, NetworkError, &str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_connected: RwLock<Option<OnClientConnected>>,
    on_message: RwLock<Option<OnMessage>>,
    on_disconnected: RwLock<Option<OnClientDisconnected>>,
    on_error: RwLock<Option<OnConnectionError>>,
}

struct ServerRuntime {
    reactors: Vec<Arc<Reactor>>,
    acceptors: Vec<Acceptor>,
    pool: Arc<WorkerPool>,
}

/// Multi-listener TCP/Unix-domain server.
pub struct Server {
    config: RuntimeConfig,
    callbacks: Arc<Callbacks>,
    runtime: RwLock<Option<ServerRuntime>>,
    running: AtomicBool,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            callbacks: Arc::new(Callbacks::default()),
            runtime: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Listen on a numeric IPv4 address.
    pub fn start_ipv4(&self, host: &str, port: u16, backlog: i32) -> bool {
        let Some(addr) = socket::parse_ipv4(host, port) else {
            tracing::error!(host, "not a numeric IPv4 address");
            return false;
        };
        match socket::tcp_listener(addr, backlog) {
            Ok(listener) => self.start_with(vec![listener]),
            Err(e) => {
                tracing::error!(%addr, error = %e, "listener bind failed");
                false
            }
        }
    }

    /// Listen on a numeric IPv6 address (v6-only, no IPv4 mapping).
    pub fn start_ipv6(&self, host: &str, port: u16, backlog: i32) -> bool {
        let Some(addr) = socket::parse_ipv6(host, port) else {
            tracing::error!(host, "not a numeric IPv6 address");
            return false;
        };
        match socket::tcp_listener(addr, backlog) {
            Ok(listener) => self.start_with(vec![listener]),
            Err(e) => {
                tracing::error!(%addr, error = %e, "listener bind failed");
                false
            }
        }
    }

    /// Listen on both IPv4 and IPv6 with two independent listeners sharing
    /// the port. `host` selects the IPv4 address; IPv6 binds the wildcard.
    pub fn start_universal_ip(&self, host: &str, port: u16, backlog: i32) -> bool {
        let Some(v4) = socket::parse_ipv4(host, port) else {
            tracing::error!(host, "not a numeric IPv4 address");
            return false;
        };
        let v6 = socket::parse_ipv6("::", port).expect("wildcard IPv6 parses");

        let v4_listener = match socket::tcp_listener(v4, backlog) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %v4, error = %e, "IPv4 listener bind failed");
                return false;
            }
        };
        let v6_listener = match socket::tcp_listener(v6, backlog) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %v6, error = %e, "IPv6 listener bind failed");
                return false;
            }
        };
        self.start_with(vec![v4_listener, v6_listener])
    }

    /// Listen on a Unix-domain socket path. Any stale socket file is
    /// replaced.
    pub fn start_unix_domain(&self, path: &str, backlog: i32) -> bool {
        match socket::unix_listener(std::path::Path::new(path), backlog) {
            Ok(listener) => self.start_with(vec![listener]),
            Err(e) => {
                tracing::error!(path, error = %e, "unix listener bind failed");
                false
            }
        }
    }

    /// Stop accepting, stop the reactors, drain the workers. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(runtime) = self.runtime.write().take() else {
            return;
        };
        for acceptor in &runtime.acceptors {
            acceptor.stop();
        }
        for reactor in &runtime.reactors {
            reactor.stop();
        }
        runtime.pool.stop();
        tracing::info!("server stopped");
    }

    // ── Data plane ────────────────────────────────────────────────────────────

    /// Send to a connection from any thread. The owning reactor is derived
    /// from the id's routing bits. False for unknown/closed ids or when the
    /// connection's 32 MiB send ceiling would be exceeded.
    pub fn send_data(&self, connection_id: u64, data: &[u8]) -> bool {
        let runtime = self.runtime.read();
        let Some(runtime) = runtime.as_ref() else {
            return false;
        };
        let reactor_idx = ConnectionId::reactor_id(connection_id) as usize;
        match runtime.reactors.get(reactor_idx) {
            Some(reactor) => reactor.send_data(connection_id, data),
            None => false,
        }
    }

    /// Close one connection, leaving the rest of the server untouched. The
    /// id becomes unusable immediately and no further events are emitted
    /// for it. This is the recovery path when the application itself
    /// decides a peer is misbehaving (for example after decoding its
    /// bytes). False if the id is unknown or already closed.
    pub fn disconnect(&self, connection_id: u64) -> bool {
        let runtime = self.runtime.read();
        let Some(runtime) = runtime.as_ref() else {
            return false;
        };
        let reactor_idx = ConnectionId::reactor_id(connection_id) as usize;
        match runtime.reactors.get(reactor_idx) {
            Some(reactor) => reactor.remove_connection(connection_id),
            None => false,
        }
    }

    /// Bytes queued for a connection. 0 for unknown ids.
    pub fn send_buffer_size(&self, connection_id: u64) -> usize {
        let runtime = self.runtime.read();
        let Some(runtime) = runtime.as_ref() else {
            return 0;
        };
        let reactor_idx = ConnectionId::reactor_id(connection_id) as usize;
        runtime
            .reactors
            .get(reactor_idx)
            .map(|reactor| reactor.send_buffer_size(connection_id))
            .unwrap_or(0)
    }

    /// Live connections across all reactors.
    pub fn connection_count(&self) -> usize {
        let runtime = self.runtime.read();
        runtime
            .as_ref()
            .map(|r| r.reactors.iter().map(|reactor| reactor.connection_count()).sum())
            .unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────
    // Replaceable at any time, including while the server is running. Each
    // takes effect for the next dispatched event.

    pub fn set_on_client_connected(&self, callback: OnClientConnected) {
        *self.callbacks.on_connected.write() = Some(callback);
    }

    pub fn set_on_message(&self, callback: OnMessage) {
        *self.callbacks.on_message.write() = Some(callback);
    }

    pub fn set_on_client_disconnected(&self, callback: OnClientDisconnected) {
        *self.callbacks.on_disconnected.write() = Some(callback);
    }

    pub fn set_on_connection_error(&self, callback: OnConnectionError) {
        *self.callbacks.on_error.write() = Some(callback);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn start_with(&self, listeners: Vec<Listener>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("server already running");
            return false;
        }

        let pool = Arc::new(WorkerPool::new(
            self.config.threads.effective_workers(),
            self.config.threads.queue_capacity,
        ));
        pool.set_callback(Self::dispatcher(self.callbacks.clone()));
        pool.start();

        let reactor_count = self.config.threads.effective_reactors();
        let mut reactors: Vec<Arc<Reactor>> = Vec::with_capacity(reactor_count);
        for reactor_id in 0..reactor_count {
            let reactor = Arc::new(Reactor::new(
                reactor_id as u8,
                EventSink::Pool(pool.clone()),
                &self.config,
            ));
            if !reactor.start() {
                for reactor in &reactors {
                    reactor.stop();
                }
                pool.stop();
                self.running.store(false, Ordering::SeqCst);
                return false;
            }
            reactors.push(reactor);
        }

        let mut acceptors = Vec::with_capacity(listeners.len());
        for listener in listeners {
            match Acceptor::start(listener, reactors.clone()) {
                Some(acceptor) => acceptors.push(acceptor),
                None => {
                    for acceptor in &acceptors {
                        acceptor.stop();
                    }
                    for reactor in &reactors {
                        reactor.stop();
                    }
                    pool.stop();
                    self.running.store(false, Ordering::SeqCst);
                    return false;
                }
            }
        }

        tracing::info!(
            reactors = reactor_count,
            workers = pool.worker_count(),
            listeners = acceptors.len(),
            "server started"
        );
        *self.runtime.write() = Some(ServerRuntime { reactors, acceptors, pool });
        true
    }

    fn dispatcher(callbacks: Arc<Callbacks>) -> Arc<dyn Fn(&NetworkEvent) + Send + Sync> {
        Arc::new(move |event: &NetworkEvent| match event {
            NetworkEvent::Connected { info, .. } => {
                let snapshot = callbacks.on_connected.read().clone();
                if let Some(cb) = snapshot {
                    cb(info);
                }
            }
            NetworkEvent::Data { connection_id, payload } => {
                let snapshot = callbacks.on_message.read().clone();
                if let Some(cb) = snapshot {
                    cb(*connection_id, payload);
                }
            }
            NetworkEvent::Disconnected { connection_id } => {
                let snapshot = callbacks.on_disconnected.read().clone();
                if let Some(cb) = snapshot {
                    cb(*connection_id);
                }
            }
            NetworkEvent::Error { connection_id, error, message } => {
                let snapshot = callbacks.on_error.read().clone();
                if let Some(cb) = snapshot {
                    cb(*connection_id, *error, message);
                }
            }
        })
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
