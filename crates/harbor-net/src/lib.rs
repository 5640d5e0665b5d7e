//! harbor-net — the Harbor TCP runtime.
//!
//! A single-process, multi-threaded networking runtime built from three
//! pieces:
//!
//! * an **acceptor → reactor → worker** pipeline, where each descriptor is
//!   owned by exactly one reactor thread for its whole life and user
//!   callbacks run on sharded worker threads;
//! * per-connection **send buffering** with watermarks and a hard ceiling
//!   for backpressure;
//! * the [`harbor_core`] **frame protocol** riding on top of the byte
//!   stream (the runtime itself moves opaque bytes — applications own one
//!   [`harbor_core::Decoder`] per connection).
//!
//! [`Server`] and [`Client`] are the user-facing façades; the building
//! blocks ([`Reactor`], [`Acceptor`], [`WorkerPool`], [`IoMonitor`],
//! [`SendBuffer`], [`EventQueue`]) are public for embedders that need a
//! different composition.

pub mod acceptor;
pub mod client;
pub mod monitor;
pub mod queue;
pub mod reactor;
pub mod send_buffer;
pub mod server;
pub mod socket;
pub mod worker;

pub use acceptor::Acceptor;
pub use client::Client;
pub use monitor::IoMonitor;
pub use queue::EventQueue;
pub use reactor::{EventSink, Reactor};
pub use send_buffer::SendBuffer;
pub use server::Server;
pub use worker::WorkerPool;
