//! Callback replacement: swapping on_message between sends routes each
//! payload to exactly the handler installed at dispatch time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harbor_core::Encoder;
use harbor_net::{Client, Server};

use crate::{free_port, init_tracing, wait_until};

fn framed(message_id: u64, payload: &[u8]) -> Vec<u8> {
    let frames = Encoder::encode_message(message_id, payload, false).expect("encodes");
    Encoder::serialize_frames(&frames).concat()
}

#[test]
fn replaced_on_message_takes_over() {
    init_tracing();
    let port = free_port();

    let server = Arc::new(Server::new());
    {
        let server_out = server.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            assert!(server_out.send_data(connection_id, bytes));
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));

    let client = Client::new();
    {
        let hits_a = hits_a.clone();
        client.set_on_message(Arc::new(move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert!(client.connect_ipv4("127.0.0.1", port));

    assert!(client.send_data(&framed(1, b"first"), 1000));
    assert!(wait_until(2000, || hits_a.load(Ordering::SeqCst) == 1));

    {
        let hits_b = hits_b.clone();
        client.set_on_message(Arc::new(move |_| {
            hits_b.fetch_add(1, Ordering::SeqCst);
        }));
    }

    assert!(client.send_data(&framed(2, b"second"), 1000));
    assert!(wait_until(2000, || hits_b.load(Ordering::SeqCst) == 1));

    // A invoked exactly once, then B exactly once.
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);

    client.disconnect();
    server.stop();
}

#[test]
fn server_connected_and_disconnected_fire_once_per_connection() {
    init_tracing();
    let port = free_port();

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let server = Arc::new(Server::new());
    {
        let connects = connects.clone();
        server.set_on_client_connected(Arc::new(move |_| {
            connects.fetch_add(1, Ordering::SeqCst);
        }));
    }
    {
        let disconnects = disconnects.clone();
        server.set_on_client_disconnected(Arc::new(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    for _ in 0..3 {
        let client = Client::new();
        assert!(client.connect_ipv4("127.0.0.1", port));
        client.disconnect();
    }

    assert!(wait_until(5000, || {
        connects.load(Ordering::SeqCst) == 3 && disconnects.load(Ordering::SeqCst) == 3
    }));
    // One terminal event each, never more.
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    assert_eq!(disconnects.load(Ordering::SeqCst), 3);

    server.stop();
}
