//! Shutdown ordering: graceful client shutdown drains the send buffer;
//! stopping the server tears connections down exactly once and delivers
//! everything already observed.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder};
use harbor_net::{Client, Server};

use crate::{free_port, init_tracing, wait_until};

#[test]
fn graceful_shutdown_drains_before_closing() {
    init_tracing();
    let port = free_port();

    // Decode server-side and collect reassembled message payloads.
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let server = Arc::new(Server::new());
    {
        let received = received.clone();
        let decoder = Arc::new(Mutex::new(Decoder::default()));
        server.set_on_message(Arc::new(move |_, bytes| {
            let mut decoder = decoder.lock();
            decoder.feed(bytes).expect("client sends well-formed frames");
            while let Some(message) = decoder.get_message() {
                received.lock().extend_from_slice(&message.data);
            }
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));

    let payload = vec![0x7Eu8; 4 * 1024 * 1024];
    let frames = Encoder::encode_message(1, &payload, false).unwrap();
    let wire = Encoder::serialize_frames(&frames).concat();
    assert!(client.send_data(&wire, 10_000));

    assert!(client.graceful_shutdown(10_000), "buffer drained in time");
    assert!(!client.is_connected());

    assert!(wait_until(10_000, || received.lock().len() == payload.len()));
    assert!(received.lock().iter().all(|&b| b == 0x7E));

    server.stop();
}

#[test]
fn graceful_shutdown_when_idle_is_immediate() {
    init_tracing();
    let port = free_port();

    let server = Server::new();
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));
    assert_eq!(client.get_send_buffer_size(), 0);
    assert!(client.graceful_shutdown(1000));
    assert!(!client.is_connected());

    // A second shutdown has nothing to do.
    assert!(!client.graceful_shutdown(1000));

    server.stop();
}

#[test]
fn server_stop_closes_live_connections() {
    init_tracing();
    let port = free_port();

    let server = Server::new();
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let mut peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert!(wait_until(2000, || server.connection_count() == 1));

    server.stop();

    // The reactor closed our descriptor: the peer observes EOF.
    peer.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn events_observed_before_stop_are_delivered() {
    init_tracing();
    let port = free_port();

    let delivered = Arc::new(AtomicUsize::new(0));
    let server = Arc::new(Server::new());
    {
        let delivered = delivered.clone();
        server.set_on_message(Arc::new(move |_, bytes| {
            delivered.fetch_add(bytes.len(), Ordering::SeqCst);
            // A deliberately slow consumer so events queue up.
            std::thread::sleep(std::time::Duration::from_micros(200));
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));

    let frames = Encoder::encode_message(1, &vec![1u8; 64 * 1024], false).unwrap();
    let wire = Encoder::serialize_frames(&frames).concat();
    assert!(client.send_data(&wire, 5000));

    // Wait until the reactor has observed the bytes, then stop: the worker
    // pool must still deliver every queued event.
    assert!(wait_until(10_000, || delivered.load(Ordering::SeqCst) > 0));
    std::thread::sleep(std::time::Duration::from_millis(300));
    server.stop();

    assert!(wait_until(2000, || delivered.load(Ordering::SeqCst) == wire.len()));

    client.disconnect();
}
