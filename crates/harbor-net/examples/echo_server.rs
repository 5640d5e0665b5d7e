//! Frame-decoding echo server.
//!
//! Run with: cargo run --example echo_server -- 127.0.0.1 9988
//! Pair with the echo_client example.

use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder};
use harbor_net::Server;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = args.next().as_deref().unwrap_or("9988").parse()?;

    let server = Arc::new(Server::new());

    // One decoder per connection, created on connect, dropped on close.
    let decoders: Arc<DashMap<u64, Mutex<Decoder>>> = Arc::new(DashMap::new());

    {
        let decoders = decoders.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            tracing::info!(
                connection_id = info.connection_id,
                peer = %info.peer_address,
                port = info.peer_port,
                "client connected"
            );
            decoders.insert(info.connection_id, Mutex::new(Decoder::default()));
        }));
    }

    {
        let decoders = decoders.clone();
        let server_out = server.clone();
        server.set_on_message(Arc::new(move |connection_id, bytes| {
            let mut violation = false;
            {
                let Some(decoder) = decoders.get(&connection_id) else {
                    return;
                };
                let mut decoder = decoder.lock();
                if let Err(e) = decoder.feed(bytes) {
                    tracing::warn!(connection_id, error = %e, "protocol violation");
                    violation = true;
                } else {
                    while let Some(message) = decoder.get_message() {
                        tracing::info!(
                            message_id = message.message_id,
                            len = message.data.len(),
                            "echoing message"
                        );
                        let frames =
                            Encoder::encode_message(message.message_id, &message.data, true)
                                .expect("echo payload fits");
                        for buf in Encoder::serialize_frames(&frames) {
                            if !server_out.send_data(connection_id, &buf) {
                                tracing::warn!("send failed, peer gone or backpressured");
                                return;
                            }
                        }
                    }
                }
            }
            if violation {
                decoders.remove(&connection_id);
                server_out.disconnect(connection_id);
            }
        }));
    }

    {
        let decoders = decoders.clone();
        server.set_on_client_disconnected(Arc::new(move |connection_id| {
            decoders.remove(&connection_id);
            tracing::info!(connection_id, "client left");
        }));
    }

    server.set_on_connection_error(Arc::new(|connection_id, error, message| {
        tracing::warn!(connection_id, %error, detail = %message, "connection error");
    }));

    if !server.start_ipv4(&host, port, 128) {
        bail!("failed to listen on {host}:{port}");
    }
    tracing::info!(host, port, "echo server listening, ctrl-c to exit");

    loop {
        std::thread::park();
    }
}
