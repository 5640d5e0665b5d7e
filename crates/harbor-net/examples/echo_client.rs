//! Line-oriented client for the echo_server example: reads stdin, sends
//! each line as one protocol message, prints echoed replies.
//!
//! Run with: cargo run --example echo_client -- 127.0.0.1 9988

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use harbor_core::{Decoder, Encoder};
use harbor_net::Client;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = args.next().as_deref().unwrap_or("9988").parse()?;

    let client = Client::new();
    let decoder = Arc::new(Mutex::new(Decoder::default()));

    {
        let decoder = decoder.clone();
        client.set_on_message(Arc::new(move |bytes| {
            let mut decoder = decoder.lock();
            if decoder.feed(bytes).is_err() {
                eprintln!("protocol violation from server");
                return;
            }
            while let Some(message) = decoder.get_message() {
                println!("< {}", String::from_utf8_lossy(&message.data));
            }
        }));
    }

    client.set_on_disconnected(Arc::new(|| {
        eprintln!("server closed the connection");
        std::process::exit(0);
    }));

    if !client.connect_ipv4(&host, port) {
        bail!("failed to connect to {host}:{port}");
    }
    eprintln!("connected to {host}:{port}; type lines to echo");

    let next_message_id = AtomicU64::new(1);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let frames = Encoder::encode_message(
            next_message_id.fetch_add(1, Ordering::Relaxed),
            line.as_bytes(),
            true,
        )?;
        for buf in Encoder::serialize_frames(&frames) {
            if !client.send_data(&buf, 1000) {
                bail!("send failed");
            }
        }
    }

    client.graceful_shutdown(5000);
    Ok(())
}
