//! Harbor wire format — on-wire types for the frame protocol.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format; changing anything here is a breaking change.
//!
//! All multi-byte fields are little-endian, encoded with zerocopy byteorder
//! types so the layout is fixed regardless of host endianness. All types are
//! #[repr(C)] with alignment-1 fields for deterministic layout and use
//! zerocopy derives for safe, allocation-free serialization. There is no
//! unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LE, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// First magic byte, used for frame synchronization.
pub const MAGIC1: u8 = 0x5A;
/// Second magic byte.
pub const MAGIC2: u8 = 0x5C;
/// Current protocol version.
pub const VERSION: u8 = 0x01;

/// Maximum payload carried by a single frame (256 KiB).
/// Larger data must be sliced by the encoder.
pub const MAX_FRAME_PAYLOAD: usize = 256 * 1024;

/// Maximum number of slices one logical message may span.
pub const MAX_MESSAGE_SLICES: u16 = 65_535;

/// Default reassembly timeout for partially received messages.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

/// Flags bit 0: the last 4 payload bytes are a CRC-32 of the rest.
pub const FLAG_CRC32: u16 = 0x0001;

/// Wire size of [`FrameHeader`].
pub const FRAME_HEADER_LEN: usize = 16;
/// Wire size of [`MessageHeader`].
pub const MESSAGE_HEADER_LEN: usize = 12;
/// Wire size of [`StreamChunkHeader`] (and [`StreamStartHeader`]).
pub const STREAM_CHUNK_HEADER_LEN: usize = 16;

// ── Frame types ───────────────────────────────────────────────────────────────

/// Frame type discriminator. Values 0x00 and 0x05..=0xFF are unassigned and
/// rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Application message frame, sliced and reassembled by message_id.
    Message = 0x01,
    /// Stream open. Carries the total size when known.
    StreamStart = 0x02,
    /// Stream data at an explicit offset. Not reassembled.
    StreamChunk = 0x03,
    /// Stream close, with an optional whole-stream CRC-32.
    StreamEnd = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Message),
            0x02 => Ok(FrameType::StreamStart),
            0x03 => Ok(FrameType::StreamChunk),
            0x04 => Ok(FrameType::StreamEnd),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> u8 {
        t as u8
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// The fixed 16-byte header preceding every payload on the wire.
///
/// The receiver can fully describe and validate a frame before reading a
/// single byte of payload.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Must be [`MAGIC1`]. A mismatch means the stream is desynchronized.
    pub magic1: u8,
    /// Must be [`MAGIC2`].
    pub magic2: u8,
    /// Protocol version. Currently [`VERSION`].
    pub version: u8,
    /// One of the [`FrameType`] values.
    pub frame_type: u8,
    /// Bit flags. Bit 0 = [`FLAG_CRC32`]; all other bits reserved, zero.
    pub flags: U16<LE>,
    /// Payload length in bytes, including the CRC suffix when flagged.
    pub payload_len: U32<LE>,
    /// Reserved, must be zero.
    pub reserved: U32<LE>,
    /// Reserved, must be zero. Pads the header to 16 bytes.
    pub reserved2: U16<LE>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 16]);

impl FrameHeader {
    /// Build a header for a frame of the given type and payload length.
    pub fn new(frame_type: FrameType, flags: u16, payload_len: u32) -> Self {
        Self {
            magic1: MAGIC1,
            magic2: MAGIC2,
            version: VERSION,
            frame_type: frame_type.into(),
            flags: U16::new(flags),
            payload_len: U32::new(payload_len),
            reserved: U32::new(0),
            reserved2: U16::new(0),
        }
    }

    /// True when the CRC-32 flag is set.
    pub fn has_crc(&self) -> bool {
        self.flags.get() & FLAG_CRC32 != 0
    }

    /// Validate magic, version, type, and length. Returns the parsed frame
    /// type on success.
    pub fn validate(&self) -> Result<FrameType, ProtocolError> {
        if self.magic1 != MAGIC1 || self.magic2 != MAGIC2 {
            return Err(ProtocolError::BadMagic);
        }
        if self.version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if self.payload_len.get() as usize > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(self.payload_len.get() as usize));
        }
        FrameType::try_from(self.frame_type)
    }
}

// ── Payload prefixes ──────────────────────────────────────────────────────────

/// Prefix of every Message frame payload. User bytes follow.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct MessageHeader {
    /// Identifies the logical message all slices belong to.
    pub message_id: U64<LE>,
    /// Slice count for the whole message. Identical across its frames.
    pub total_slices: U16<LE>,
    /// Zero-based index of this slice. Always < total_slices.
    pub sequence: U16<LE>,
}

assert_eq_size!(MessageHeader, [u8; 12]);

/// StreamStart payload.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct StreamStartHeader {
    pub stream_id: U64<LE>,
    /// Total stream size in bytes. 0 = unknown / open-ended.
    pub total_size: U64<LE>,
}

assert_eq_size!(StreamStartHeader, [u8; 16]);

/// Prefix of every StreamChunk payload. Chunk bytes follow.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct StreamChunkHeader {
    pub stream_id: U64<LE>,
    /// Byte offset of this chunk within the stream.
    pub offset: U64<LE>,
}

assert_eq_size!(StreamChunkHeader, [u8; 16]);

/// StreamEnd payload.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct StreamEndHeader {
    pub stream_id: U64<LE>,
    /// CRC-32 over the whole stream. 0 = not validated.
    pub crc32: U32<LE>,
}

assert_eq_size!(StreamEndHeader, [u8; 12]);

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One frame: header plus payload, ready for serialization.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize header + payload into one contiguous buffer for transmission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

// ── CRC-32 ────────────────────────────────────────────────────────────────────

/// CRC-32 (polynomial 0xEDB88320, reflected, init 0xFFFFFFFF, final XOR
/// 0xFFFFFFFF) — the standard IEEE checksum.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Irrecoverable framing errors. Raising one of these means the byte stream
/// is compromised and the connection must be closed; recoverable conditions
/// (CRC mismatch, incomplete trailing bytes) never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported protocol version: 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("payload length {0} exceeds maximum {MAX_FRAME_PAYLOAD}")]
    PayloadTooLarge(usize),

    #[error("message would span {0} slices, maximum is {MAX_MESSAGE_SLICES}")]
    MessageTooLarge(usize),

    #[error("slice index {sequence} out of range for {total} slices")]
    BadSliceIndex { sequence: u16, total: u16 },

    #[error("frame payload too short for its type")]
    TruncatedPayload,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
