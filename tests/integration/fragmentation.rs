//! Large-message fragmentation: payloads cross the wire as protocol frames
//! and reassemble to exactly the original bytes, once.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder, MessageComplete};
use harbor_net::{Client, Server};

use crate::{free_port, init_tracing, wait_until};

/// Server that feeds every connection's bytes into its own decoder and
/// collects completed messages.
fn decoding_server() -> (Arc<Server>, Arc<Mutex<Vec<MessageComplete>>>) {
    let server = Arc::new(Server::new());
    let decoders: Arc<DashMap<u64, Mutex<Decoder>>> = Arc::new(DashMap::new());
    let completed: Arc<Mutex<Vec<MessageComplete>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let decoders = decoders.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            decoders.insert(info.connection_id, Mutex::new(Decoder::default()));
        }));
    }
    {
        let decoders = decoders.clone();
        let completed = completed.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            let Some(decoder) = decoders.get(&connection_id) else {
                return;
            };
            let mut decoder = decoder.lock();
            decoder.feed(bytes).expect("well-formed frames");
            while let Some(message) = decoder.get_message() {
                completed.lock().push(message);
            }
        }));
    }
    {
        let decoders = decoders.clone();
        server.set_on_client_disconnected(Arc::new(move |connection_id| {
            decoders.remove(&connection_id);
        }));
    }

    (server, completed)
}

fn marked_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0x58u8; len];
    payload[0] = 0x53;
    *payload.last_mut().unwrap() = 0x45;
    payload
}

fn send_message(client: &Client, message_id: u64, payload: &[u8]) {
    let frames = Encoder::encode_message(message_id, payload, false).expect("encodes");
    for buf in Encoder::serialize_frames(&frames) {
        assert!(client.send_data(&buf, 5000), "send_data timed out");
    }
}

#[test]
fn hundred_kib_is_a_single_frame() {
    init_tracing();
    let port = free_port();

    let (server, completed) = decoding_server();
    assert!(server.start_ipv4("127.0.0.1", port, 64));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));

    let payload = marked_payload(100 * 1024);
    let frames = Encoder::encode_message(1, &payload, false).unwrap();
    assert_eq!(frames.len(), 1, "100 KiB fits one frame");

    send_message(&client, 1, &payload);

    assert!(wait_until(5000, || !completed.lock().is_empty()));
    let messages = completed.lock();
    assert_eq!(messages.len(), 1, "delivered exactly once");
    assert_eq!(messages[0].message_id, 1);
    assert_eq!(messages[0].data.as_ref(), payload.as_slice());
    assert_eq!(messages[0].data[0], 0x53);
    assert_eq!(messages[0].data[payload.len() - 1], 0x45);

    client.disconnect();
    server.stop();
}

#[test]
fn one_mib_reassembles_from_multiple_frames() {
    init_tracing();
    let port = free_port();

    let (server, completed) = decoding_server();
    assert!(server.start_ipv4("127.0.0.1", port, 64));

    let client = Client::new();
    assert!(client.connect_ipv4("127.0.0.1", port));

    let payload = marked_payload(1024 * 1024);
    let frames = Encoder::encode_message(2, &payload, false).unwrap();
    assert!(frames.len() >= 4, "1 MiB forces at least 4 frames");

    send_message(&client, 2, &payload);

    assert!(wait_until(10_000, || !completed.lock().is_empty()));
    let messages = completed.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data.len(), payload.len());
    assert_eq!(messages[0].data.as_ref(), payload.as_slice());

    client.disconnect();
    server.stop();
}
