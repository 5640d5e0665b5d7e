//! End-to-end scenarios for the Harbor runtime, all over loopback.
//!
//! Each module is one scenario family. Shared helpers live here: tracing
//! init, free-port allocation, and a polling wait.

mod backpressure;
mod callbacks;
mod codec;
mod echo;
mod fragmentation;
mod ordering;
mod shutdown;

use std::sync::Once;
use std::time::{Duration, Instant};

pub fn init_tracing() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Grab a port the OS considers free right now. The tiny race against other
/// processes is acceptable for loopback tests.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Poll `predicate` until it holds or `deadline_ms` elapses.
pub fn wait_until(deadline_ms: u64, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
