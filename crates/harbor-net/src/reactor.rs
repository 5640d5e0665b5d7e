//! Reactor — the I/O event loop.
//!
//! A reactor owns a set of descriptors for their entire life and is the only
//! thread that reads, writes, or closes them. Public methods are callable
//! from any thread; anything that touches a descriptor is forwarded to the
//! loop thread through a command queue drained after each poll wakeup.
//!
//! Cross-thread `send_data` works without waiting for the loop: the
//! per-connection send *buffer* (never the descriptor) lives behind a lock
//! shared with producer threads, so overflow and unknown-id failures report
//! synchronously while all socket writes stay on the loop thread.
//!
//! I/O outcomes become [`NetworkEvent`]s, delivered to the attached worker
//! pool — or straight into a callback when no pool is attached (embedders
//! accepting that the callback runs on the loop thread).

use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use mio::Events;
use parking_lot::Mutex;

use harbor_core::config::{IoConfig, RuntimeConfig};
use harbor_core::conn_id::ConnectionId;
use harbor_core::event::{NetworkError, NetworkEvent};
use harbor_core::Decoder;

use crate::monitor::{IoMonitor, WAKER_TOKEN};
use crate::send_buffer::SendBuffer;
use crate::socket::{PeerAddr, Stream};
use crate::worker::WorkerPool;

/// Completion for an asynchronous send: (success, bytes_sent).
pub type SendCompletion = Box<dyn FnOnce(bool, usize) + Send>;

/// How often the loop sweeps per-connection decoders for reassembly
/// entries that outlived the message timeout.
const DECODER_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Where a reactor delivers its events.
#[derive(Clone)]
pub enum EventSink {
    /// Deliver via the worker pool; callbacks run on worker threads.
    Pool(Arc<WorkerPool>),
    /// Invoke inline on the loop thread. The callback must not block.
    Callback(Arc<dyn Fn(&NetworkEvent) + Send + Sync>),
}

impl EventSink {
    fn deliver(&self, event: NetworkEvent) {
        match self {
            EventSink::Pool(pool) => {
                if !pool.submit_event(event) {
                    tracing::debug!("event dropped, worker pool stopped");
                }
            }
            EventSink::Callback(callback) => callback(&event),
        }
    }
}

/// Send-side state shared between producer threads and the loop thread.
/// The `armed` flag is only read or written under this lock, which is what
/// makes the disarm race-free: a producer that appends after the loop
/// disarmed always observes `armed == false` and posts a fresh arm command.
struct SendState {
    buffer: SendBuffer,
    armed: bool,
    /// Cumulative bytes accepted into the buffer. Async-send completions
    /// fire once the drained total passes their snapshot of this.
    enqueued: u64,
}

struct ConnState {
    send: Mutex<SendState>,
    open: AtomicBool,
}

impl ConnState {
    fn new() -> Self {
        Self {
            send: Mutex::new(SendState {
                buffer: SendBuffer::new(),
                armed: false,
                enqueued: 0,
            }),
            open: AtomicBool::new(true),
        }
    }
}

enum Command {
    Register { id: u64, stream: Stream, peer: PeerAddr },
    Close { id: u64 },
    ArmWrite { id: u64 },
    Completion { id: u64, target: u64, len: usize, callback: SendCompletion },
}

struct Inner {
    reactor_id: u8,
    sink: EventSink,
    io: IoConfig,
    message_timeout: Duration,
    registry: DashMap<u64, Arc<ConnState>>,
    commands: Mutex<VecDeque<Command>>,
    waker: Mutex<Option<Arc<mio::Waker>>>,
    running: AtomicBool,
    sequence: AtomicU16,
}

impl Inner {
    fn post(&self, command: Command) {
        self.commands.lock().push_back(command);
        if let Some(waker) = self.waker.lock().as_ref() {
            let _ = waker.wake();
        }
    }
}

/// One I/O event loop with exclusive ownership of its descriptors.
pub struct Reactor {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    pub fn new(reactor_id: u8, sink: EventSink, config: &RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                reactor_id,
                sink,
                io: config.io.clone(),
                message_timeout: Duration::from_millis(config.protocol.message_timeout_ms),
                registry: DashMap::new(),
                commands: Mutex::new(VecDeque::new()),
                waker: Mutex::new(None),
                running: AtomicBool::new(false),
                sequence: AtomicU16::new(1),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn reactor_id(&self) -> u8 {
        self.inner.reactor_id
    }

    /// Spawn the loop thread. False if already running or the readiness
    /// queue cannot be allocated.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(reactor_id = self.inner.reactor_id, "reactor already running");
            return false;
        }

        let monitor = match IoMonitor::new() {
            Ok(monitor) => monitor,
            Err(e) => {
                tracing::error!(reactor_id = self.inner.reactor_id, error = %e, "readiness queue allocation failed");
                self.inner.running.store(false, Ordering::SeqCst);
                return false;
            }
        };
        *self.inner.waker.lock() = Some(monitor.waker());

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("harbor-reactor-{}", self.inner.reactor_id))
            .spawn(move || event_loop(inner, monitor))
            .expect("failed to spawn reactor thread");
        *self.thread.lock() = Some(handle);
        true
    }

    /// Stop the loop, join the thread, close every owned descriptor.
    /// Idempotent; emits nothing further.
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
        self.inner.registry.clear();
        self.inner.commands.lock().clear();
    }

    /// Take ownership of an already non-blocking stream. The id is handed
    /// back immediately; registration and the `Connected` event happen on
    /// the loop thread.
    pub fn add_connection(&self, stream: Stream, peer: PeerAddr) -> Option<u64> {
        if !self.inner.running.load(Ordering::Acquire) {
            return None;
        }
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let fd_hint = stream.as_raw_fd() as u16;
        let id = ConnectionId::generate(self.inner.reactor_id, fd_hint, sequence);

        self.inner.registry.insert(id, Arc::new(ConnState::new()));
        self.inner.post(Command::Register { id, stream, peer });
        Some(id)
    }

    /// Initiate close. The id becomes unusable immediately; no further
    /// events are emitted for it.
    pub fn remove_connection(&self, id: u64) -> bool {
        let Some(state) = self.inner.registry.get(&id) else {
            return false;
        };
        state.open.store(false, Ordering::Release);
        drop(state);
        self.inner.post(Command::Close { id });
        true
    }

    /// Append to the connection's send buffer and arm write interest.
    /// False if the id is unknown/closed or the 32 MiB ceiling would be
    /// exceeded. Safe from any thread; never closes the connection.
    pub fn send_data(&self, id: u64, data: &[u8]) -> bool {
        let Some(state) = self.inner.registry.get(&id) else {
            return false;
        };
        if !state.open.load(Ordering::Acquire) {
            return false;
        }

        let mut send = state.send.lock();
        if !send.buffer.write(data) {
            return false;
        }
        send.enqueued += data.len() as u64;
        let need_arm = !send.armed;
        send.armed = true;
        drop(send);
        drop(state);

        if need_arm {
            self.inner.post(Command::ArmWrite { id });
        }
        true
    }

    /// Like [`Reactor::send_data`], but `callback(success, bytes_sent)`
    /// fires on the loop thread once the bytes have fully left the buffer
    /// (or the connection dies first).
    pub fn send_async(&self, id: u64, data: &[u8], callback: SendCompletion) -> bool {
        let Some(state) = self.inner.registry.get(&id) else {
            return false;
        };
        if !state.open.load(Ordering::Acquire) {
            return false;
        }

        let mut send = state.send.lock();
        if !send.buffer.write(data) {
            return false;
        }
        send.enqueued += data.len() as u64;
        let target = send.enqueued;
        send.armed = true;
        drop(send);
        drop(state);

        // The completion command doubles as the arm: its handler flushes.
        self.inner.post(Command::Completion { id, target, len: data.len(), callback });
        true
    }

    /// Bytes currently buffered for `id`. 0 for unknown ids.
    pub fn send_buffer_size(&self, id: u64) -> usize {
        self.inner
            .registry
            .get(&id)
            .map(|state| state.send.lock().buffer.size())
            .unwrap_or(0)
    }

    /// Backpressure signal: true when the connection's buffer is above the
    /// high watermark.
    pub fn is_high_water_mark(&self, id: u64) -> bool {
        self.inner
            .registry
            .get(&id)
            .map(|state| state.send.lock().buffer.is_high_water_mark())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Loop thread ───────────────────────────────────────────────────────────────

/// Loop-private connection state. The stream and the decoder never leave
/// this thread.
struct Conn {
    id: u64,
    stream: Stream,
    state: Arc<ConnState>,
    /// Validates inbound framing. A framing error here means the byte
    /// stream is compromised and the connection is closed.
    decoder: Decoder,
    /// Cumulative bytes that have left the buffer for the socket.
    drained: u64,
    /// Pending async-send completions: (enqueued-target, len, callback).
    completions: Vec<(u64, usize, SendCompletion)>,
}

/// What a readiness handler decided about the connection's fate.
enum Verdict {
    KeepOpen,
    Disconnected,
    Failed(NetworkError, String),
}

fn event_loop(inner: Arc<Inner>, mut monitor: IoMonitor) {
    let mut events = Events::with_capacity(inner.io.event_batch.max(8));
    let mut conns: HashMap<u64, Conn> = HashMap::new();
    let mut by_fd: HashMap<usize, u64> = HashMap::new();
    let mut read_buf = vec![0u8; inner.io.read_buffer.max(512)];
    let poll_timeout = Duration::from_millis(inner.io.poll_interval_ms.max(1));
    let mut last_sweep = Instant::now();

    tracing::debug!(reactor_id = inner.reactor_id, "event loop started");

    while inner.running.load(Ordering::Acquire) {
        match monitor.wait(&mut events, Some(poll_timeout)) {
            Ok(()) => {}
            // A signal interrupted the wait; not an error.
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(reactor_id = inner.reactor_id, error = %e, "wait failed, terminating loop");
                let ids: Vec<u64> = conns.keys().copied().collect();
                for id in ids {
                    let message = format!("reactor wait failed: {e}");
                    close_connection(
                        &inner,
                        &monitor,
                        &mut conns,
                        &mut by_fd,
                        id,
                        Some(NetworkEvent::Error {
                            connection_id: id,
                            error: NetworkError::SyscallFailure,
                            message,
                        }),
                    );
                }
                break;
            }
        }

        drain_commands(&inner, &monitor, &mut conns, &mut by_fd);

        // Reassembly entries abandoned mid-message only go away on a
        // sweep; the decoder itself owns no clock.
        if last_sweep.elapsed() >= DECODER_SWEEP_INTERVAL {
            for conn in conns.values_mut() {
                conn.decoder.cleanup_timeout_messages();
            }
            last_sweep = Instant::now();
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let Some(&id) = by_fd.get(&event.token().0) else {
                // Closed earlier in this batch, or a stale edge.
                continue;
            };

            if event.is_readable() || event.is_read_closed() || event.is_error() {
                let verdict = {
                    let conn = conns.get_mut(&id).expect("by_fd and conns agree");
                    handle_readable(&inner, conn, &mut read_buf)
                };
                if apply_verdict(&inner, &monitor, &mut conns, &mut by_fd, id, verdict) {
                    continue;
                }
            }

            if event.is_writable() {
                let verdict = {
                    let conn = conns.get_mut(&id).expect("by_fd and conns agree");
                    flush_send_buffer(conn, &monitor)
                };
                apply_verdict(&inner, &monitor, &mut conns, &mut by_fd, id, verdict);
            }
        }
    }

    // Shutdown: close every owned descriptor. No events are emitted.
    tracing::debug!(
        reactor_id = inner.reactor_id,
        connections = conns.len(),
        "event loop stopped, closing connections"
    );
    for (_, mut conn) in conns.drain() {
        monitor.deregister(conn.stream.as_raw_fd());
        conn.state.open.store(false, Ordering::Release);
        for (_, _, callback) in conn.completions.drain(..) {
            callback(false, 0);
        }
    }
    by_fd.clear();
}

fn drain_commands(
    inner: &Arc<Inner>,
    monitor: &IoMonitor,
    conns: &mut HashMap<u64, Conn>,
    by_fd: &mut HashMap<usize, u64>,
) {
    let pending = std::mem::take(&mut *inner.commands.lock());
    for command in pending {
        match command {
            Command::Register { id, stream, peer } => {
                // remove_connection may have won the race; drop quietly.
                let Some(state) = inner.registry.get(&id).map(|s| s.value().clone()) else {
                    continue;
                };
                let fd = stream.as_raw_fd();
                if let Err(e) = monitor.register_read(fd) {
                    tracing::warn!(
                        reactor_id = inner.reactor_id,
                        connection_id = id,
                        error = %e,
                        "descriptor registration failed"
                    );
                    inner.registry.remove(&id);
                    continue;
                }

                by_fd.insert(fd as usize, id);
                conns.insert(
                    id,
                    Conn {
                        id,
                        stream,
                        state,
                        decoder: Decoder::new(inner.message_timeout),
                        drained: 0,
                        completions: Vec::new(),
                    },
                );

                tracing::debug!(
                    reactor_id = inner.reactor_id,
                    connection_id = id,
                    "connection registered"
                );
                let info = peer.to_connection_info(id);
                inner.sink.deliver(NetworkEvent::Connected { connection_id: id, info });
            }
            Command::Close { id } => {
                close_connection(inner, monitor, conns, by_fd, id, None);
            }
            Command::ArmWrite { id } => {
                if conns.contains_key(&id) {
                    let verdict = {
                        let conn = conns.get_mut(&id).expect("checked");
                        flush_send_buffer(conn, monitor)
                    };
                    apply_verdict(inner, monitor, conns, by_fd, id, verdict);
                }
            }
            Command::Completion { id, target, len, callback } => {
                let Some(conn) = conns.get_mut(&id) else {
                    callback(false, 0);
                    continue;
                };
                conn.completions.push((target, len, callback));
                let verdict = {
                    let conn = conns.get_mut(&id).expect("checked");
                    flush_send_buffer(conn, monitor)
                };
                apply_verdict(inner, monitor, conns, by_fd, id, verdict);
            }
        }
    }
}

/// Read until would-block. Each non-empty read becomes one `Data` event.
///
/// Every read also runs through the connection's decoder: an irrecoverable
/// framing error (bad magic, bad version, impossible length, unknown type)
/// means the stream can no longer be trusted, so the connection fails with
/// `ProtocolViolation` and the poisoned bytes are never delivered. CRC
/// mismatches stay a data-plane matter — the decoder counts and drops them
/// without raising. Delivery itself is byte-oriented: the decoded copies
/// are discarded here and the application drives its own decoder.
fn handle_readable(inner: &Arc<Inner>, conn: &mut Conn, read_buf: &mut [u8]) -> Verdict {
    loop {
        match conn.stream.read(read_buf) {
            Ok(0) => return Verdict::Disconnected,
            Ok(n) => {
                if let Err(e) = conn.decoder.feed(&read_buf[..n]) {
                    return Verdict::Failed(NetworkError::ProtocolViolation, e.to_string());
                }
                while conn.decoder.get_message().is_some() {}
                while conn.decoder.get_stream_event().is_some() {}

                inner.sink.deliver(NetworkEvent::Data {
                    connection_id: conn.id,
                    payload: Bytes::copy_from_slice(&read_buf[..n]),
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Verdict::KeepOpen,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Verdict::Failed(NetworkError::from_io_error(&e), e.to_string());
            }
        }
    }
}

/// Drain the send buffer with non-blocking writes. Disarms write interest
/// once empty; fires any completions the drain satisfied.
fn flush_send_buffer(conn: &mut Conn, monitor: &IoMonitor) -> Verdict {
    let fd = conn.stream.as_raw_fd();
    let mut send = conn.state.send.lock();
    loop {
        match send.buffer.send_to_socket(&mut conn.stream) {
            Ok(0) => {
                if send.buffer.is_empty() {
                    if send.armed {
                        send.armed = false;
                        let _ = monitor.set_write_interest(fd, false);
                    }
                } else {
                    // Socket full: make sure the writable edge will come.
                    let _ = monitor.set_write_interest(fd, true);
                }
                break;
            }
            Ok(n) => {
                conn.drained += n as u64;
            }
            Err(e) => {
                drop(send);
                return Verdict::Failed(NetworkError::from_io_error(&e), e.to_string());
            }
        }
    }
    drop(send);

    let drained = conn.drained;
    let mut i = 0;
    while i < conn.completions.len() {
        if conn.completions[i].0 <= drained {
            let (_, len, callback) = conn.completions.remove(i);
            callback(true, len);
        } else {
            i += 1;
        }
    }
    Verdict::KeepOpen
}

/// Returns true when the connection was closed.
fn apply_verdict(
    inner: &Arc<Inner>,
    monitor: &IoMonitor,
    conns: &mut HashMap<u64, Conn>,
    by_fd: &mut HashMap<usize, u64>,
    id: u64,
    verdict: Verdict,
) -> bool {
    match verdict {
        Verdict::KeepOpen => false,
        Verdict::Disconnected => {
            close_connection(
                inner,
                monitor,
                conns,
                by_fd,
                id,
                Some(NetworkEvent::Disconnected { connection_id: id }),
            );
            true
        }
        Verdict::Failed(error, message) => {
            tracing::debug!(
                reactor_id = inner.reactor_id,
                connection_id = id,
                %error,
                detail = %message,
                "connection failed"
            );
            close_connection(
                inner,
                monitor,
                conns,
                by_fd,
                id,
                Some(NetworkEvent::Error { connection_id: id, error, message }),
            );
            true
        }
    }
}

/// Tear down one connection: deregister, close, fail pending completions,
/// then deliver the terminal event (if any). Nothing is emitted for the id
/// afterwards.
fn close_connection(
    inner: &Arc<Inner>,
    monitor: &IoMonitor,
    conns: &mut HashMap<u64, Conn>,
    by_fd: &mut HashMap<usize, u64>,
    id: u64,
    terminal: Option<NetworkEvent>,
) {
    let Some(mut conn) = conns.remove(&id) else {
        return;
    };
    let fd = conn.stream.as_raw_fd();
    by_fd.remove(&(fd as usize));
    monitor.deregister(fd);
    conn.state.open.store(false, Ordering::Release);
    inner.registry.remove(&id);

    for (_, _, callback) in conn.completions.drain(..) {
        callback(false, 0);
    }
    conn.stream.shutdown();
    drop(conn.stream);

    if let Some(event) = terminal {
        inner.sink.deliver(event);
    }
}
