//! harbor-core — wire format, frame codec, and shared event types.
//! The runtime crate (harbor-net) and all application code depend on this one.

pub mod config;
pub mod conn_id;
pub mod decoder;
pub mod encoder;
pub mod event;
pub mod wire;

pub use decoder::{Decoder, DecoderStats, MessageComplete, StreamEvent};
pub use encoder::Encoder;
pub use event::{ConnectionInformation, NetworkError, NetworkEvent};
pub use wire::{Frame, FrameType, ProtocolError};
