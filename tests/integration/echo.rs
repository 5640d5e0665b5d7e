//! Loopback echo: the client sends a protocol message, the server echoes
//! the frame bytes, and the client decodes its payload back.

use std::sync::Arc;

use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder};
use harbor_net::{Client, Server};

use crate::{init_tracing, wait_until};

/// One message on the wire.
fn framed(message_id: u64, payload: &[u8]) -> Vec<u8> {
    let frames = Encoder::encode_message(message_id, payload, false).expect("encodes");
    Encoder::serialize_frames(&frames).concat()
}

/// Client-side on_message handler that decodes frames and collects message
/// payloads.
fn decoding_collector(client: &Client) -> Arc<Mutex<Vec<u8>>> {
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let decoder = Arc::new(Mutex::new(Decoder::default()));
    let sink = received.clone();
    client.set_on_message(Arc::new(move |bytes| {
        let mut decoder = decoder.lock();
        decoder.feed(bytes).expect("server echoes well-formed frames");
        while let Some(message) = decoder.get_message() {
            sink.lock().extend_from_slice(&message.data);
        }
    }));
    received
}

#[test]
fn loopback_echo_within_deadline() {
    init_tracing();

    let server = Arc::new(Server::new());
    {
        let server_out = server.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            assert!(server_out.send_data(connection_id, bytes));
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", 9988, 128));

    let client = Client::new();
    let received = decoding_collector(&client);

    assert!(client.connect_ipv4("127.0.0.1", 9988));
    assert!(client.is_connected());

    assert!(client.send_data(&framed(1, b"Hello from Client"), 1000));

    // The 17 bytes must come back within 500 ms.
    assert!(wait_until(500, || received.lock().len() == 17));
    assert_eq!(received.lock().as_slice(), b"Hello from Client");

    client.disconnect();
    server.stop();
}

#[test]
fn echo_over_unix_domain_socket() {
    init_tracing();

    let path = std::env::temp_dir().join(format!("harbor-echo-{}.sock", std::process::id()));
    let path_str = path.to_str().unwrap().to_string();

    let server = Arc::new(Server::new());
    {
        let server_out = server.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            assert!(server_out.send_data(connection_id, bytes));
        }));
    }

    let connected_info: Arc<Mutex<Option<harbor_core::ConnectionInformation>>> =
        Arc::new(Mutex::new(None));
    {
        let connected_info = connected_info.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            *connected_info.lock() = Some(info.clone());
        }));
    }

    assert!(server.start_unix_domain(&path_str, 16));

    let client = Client::new();
    let received = decoding_collector(&client);

    assert!(client.connect_unix_domain(&path_str));
    assert!(client.send_data(&framed(2, b"over the socket file"), 1000));
    assert!(wait_until(2000, || received.lock().len() == 20));
    assert_eq!(received.lock().as_slice(), b"over the socket file");

    let info = connected_info.lock().clone().expect("connected callback fired");
    assert!(info.is_unix_domain);
    assert_eq!(info.peer_port, 0);
    assert_eq!(info.peer_address, path_str);

    client.disconnect();
    server.stop();
    assert!(!path.exists(), "socket file cleaned up on stop");
}

#[test]
fn server_disconnect_drops_a_misbehaving_peer() {
    init_tracing();
    let port = crate::free_port();

    let connected: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
    let server = Arc::new(Server::new());
    {
        let connected = connected.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            *connected.lock() = Some(info.connection_id);
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));
    assert!(wait_until(2000, || connected.lock().is_some()));
    let id = connected.lock().unwrap();

    // The application decides this peer has to go.
    assert!(server.disconnect(id));
    assert!(wait_until(2000, || server.connection_count() == 0));
    assert!(!server.send_data(id, b"late"));
    assert!(!server.disconnect(id), "id is already gone");

    client.disconnect();
    server.stop();
}
