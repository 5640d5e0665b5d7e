//! Backpressure: a peer that stops draining pushes the send buffer to its
//! 32 MiB ceiling; the connection survives and service resumes on drain.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use harbor_net::Server;

use crate::{free_port, init_tracing, wait_until};

#[test]
fn ceiling_rejects_then_recovers_after_drain() {
    init_tracing();
    let port = free_port();

    let connection_id = Arc::new(AtomicU64::new(0));
    let server = Arc::new(Server::new());
    {
        let connection_id = connection_id.clone();
        server.set_on_client_connected(Arc::new(move |info| {
            connection_id.store(info.connection_id, Ordering::SeqCst);
        }));
    }
    assert!(server.start_ipv4("127.0.0.1", port, 16));

    // Raw client that reads nothing until told to.
    let peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert!(wait_until(2000, || connection_id.load(Ordering::SeqCst) != 0));
    let id = connection_id.load(Ordering::SeqCst);

    // Tight loop: 40+ MiB attempted, the ceiling must push back. The
    // kernel's socket buffers absorb a few MiB on top of Harbor's 32.
    let chunk = vec![0x5Au8; 1024 * 1024];
    let mut accepted: u64 = 0;
    let mut rejected = false;
    for _ in 0..64 {
        if server.send_data(id, &chunk) {
            accepted += chunk.len() as u64;
        } else {
            rejected = true;
            break;
        }
    }
    assert!(rejected, "32 MiB ceiling never enforced");
    assert!(accepted <= 48 * 1024 * 1024);
    assert_eq!(server.connection_count(), 1, "connection stays open");
    assert!(server.send_buffer_size(id) > 0);

    // Drain from the peer side until the buffer empties.
    let total = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let total = total.clone();
        let stop = stop.clone();
        peer.set_read_timeout(Some(std::time::Duration::from_millis(100))).unwrap();
        let mut peer = peer.try_clone().unwrap();
        std::thread::spawn(move || {
            let mut buf = vec![0u8; 64 * 1024];
            while !stop.load(Ordering::SeqCst) {
                match peer.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        total.fetch_add(n as u64, Ordering::SeqCst);
                    }
                    Err(_) => {}
                }
            }
        })
    };

    assert!(
        wait_until(30_000, || server.send_buffer_size(id) == 0),
        "buffer never drained"
    );

    // Service resumes: sends succeed again on the same connection.
    assert!(server.send_data(id, b"after the storm"));
    assert!(wait_until(5000, || {
        total.load(Ordering::SeqCst) >= accepted + 15
    }));

    stop.store(true, Ordering::SeqCst);
    reader.join().unwrap();
    drop(peer);
    server.stop();
}
