//! Event ordering: with many connections sharing a worker pool, each
//! connection's messages arrive in submission order (verified with tagged
//! sequence payloads), even though connections interleave freely.

use std::io::Write;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder};
use harbor_net::Server;

use crate::{free_port, init_tracing, wait_until};

const CONNECTIONS: usize = 6;
const MESSAGES_PER_CONNECTION: usize = 200;

#[test]
fn per_connection_order_is_preserved_across_workers() {
    init_tracing();
    let port = free_port();

    // Decode per connection as workers deliver bytes; record each
    // connection's message payloads in delivery order.
    let decoders: Arc<DashMap<u64, Mutex<Decoder>>> = Arc::new(DashMap::new());
    let records: Arc<DashMap<u64, Vec<Vec<u8>>>> = Arc::new(DashMap::new());

    let server = Arc::new(Server::new());
    {
        let decoders = decoders.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            decoders.insert(info.connection_id, Mutex::new(Decoder::default()));
        }));
    }
    {
        let decoders = decoders.clone();
        let records = records.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            let Some(decoder) = decoders.get(&connection_id) else {
                return;
            };
            let mut decoder = decoder.lock();
            decoder.feed(bytes).expect("clients send well-formed frames");
            while let Some(message) = decoder.get_message() {
                records.entry(connection_id).or_default().push(message.data.to_vec());
            }
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 64));

    // Each client sends its own tag followed by a strictly increasing
    // sequence counter, one protocol message per record.
    let writers: Vec<_> = (0..CONNECTIONS)
        .map(|tag| {
            std::thread::spawn(move || {
                let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
                for seq in 0..MESSAGES_PER_CONNECTION {
                    let record = [tag as u8, (seq >> 8) as u8, (seq & 0xFF) as u8];
                    let frames = Encoder::encode_message(seq as u64, &record, false).unwrap();
                    for buf in Encoder::serialize_frames(&frames) {
                        stream.write_all(&buf).unwrap();
                    }
                }
                stream.flush().unwrap();
                // Keep the socket open until the server has read everything.
                std::thread::sleep(std::time::Duration::from_millis(500));
            })
        })
        .collect();

    assert!(wait_until(10_000, || {
        records.len() == CONNECTIONS
            && records.iter().all(|entry| entry.value().len() == MESSAGES_PER_CONNECTION)
    }));

    for entry in records.iter() {
        let messages = entry.value();
        let tag = messages[0][0];
        for (seq, record) in messages.iter().enumerate() {
            assert_eq!(record.len(), 3);
            assert_eq!(record[0], tag, "one connection, one tag");
            let found = ((record[1] as usize) << 8) | record[2] as usize;
            assert_eq!(found, seq, "messages observed in submission order");
        }
    }

    for writer in writers {
        writer.join().unwrap();
    }
    server.stop();
}
