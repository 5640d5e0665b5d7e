//! Frame encoder — turns application messages and stream events into wire
//! frames. Stateless; callers own message/stream id allocation.

use zerocopy::byteorder::{U16, U32, U64};
use zerocopy::AsBytes;

use crate::wire::{
    crc32, Frame, FrameHeader, FrameType, MessageHeader, ProtocolError, StreamChunkHeader,
    StreamEndHeader, StreamStartHeader, MAX_FRAME_PAYLOAD, MAX_MESSAGE_SLICES,
    MESSAGE_HEADER_LEN, STREAM_CHUNK_HEADER_LEN,
};

/// Protocol encoder. All constructors are associated functions; there is no
/// state to carry between calls.
pub struct Encoder;

impl Encoder {
    /// Encode one logical message into one or more `Message` frames.
    ///
    /// The payload is sliced so each frame stays within
    /// [`MAX_FRAME_PAYLOAD`] after the 12-byte message header and, when
    /// `enable_crc` is set, the 4-byte CRC suffix. An empty message encodes
    /// to exactly one frame carrying zero user bytes.
    pub fn encode_message(
        message_id: u64,
        data: &[u8],
        enable_crc: bool,
    ) -> Result<Vec<Frame>, ProtocolError> {
        let slice_payload =
            MAX_FRAME_PAYLOAD - MESSAGE_HEADER_LEN - if enable_crc { 4 } else { 0 };

        let total = data.len().div_ceil(slice_payload).max(1);
        if total > MAX_MESSAGE_SLICES as usize {
            return Err(ProtocolError::MessageTooLarge(total));
        }

        let mut frames = Vec::with_capacity(total);
        for i in 0..total {
            let offset = i * slice_payload;
            let chunk = &data[offset..(offset + slice_payload).min(data.len())];

            let header = MessageHeader {
                message_id: U64::new(message_id),
                total_slices: U16::new(total as u16),
                sequence: U16::new(i as u16),
            };

            let mut payload = Vec::with_capacity(MESSAGE_HEADER_LEN + chunk.len() + 4);
            payload.extend_from_slice(header.as_bytes());
            payload.extend_from_slice(chunk);

            frames.push(Self::make_frame(FrameType::Message, payload, enable_crc));
        }
        Ok(frames)
    }

    /// Encode a `StreamStart` frame. `total_size` of 0 means unknown.
    pub fn encode_stream_start(stream_id: u64, total_size: u64) -> Frame {
        let header = StreamStartHeader {
            stream_id: U64::new(stream_id),
            total_size: U64::new(total_size),
        };
        Self::make_frame(FrameType::StreamStart, header.as_bytes().to_vec(), false)
    }

    /// Encode a `StreamChunk` frame carrying `data` at `offset`.
    pub fn encode_stream_chunk(
        stream_id: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<Frame, ProtocolError> {
        if STREAM_CHUNK_HEADER_LEN + data.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(
                STREAM_CHUNK_HEADER_LEN + data.len(),
            ));
        }

        let header = StreamChunkHeader {
            stream_id: U64::new(stream_id),
            offset: U64::new(offset),
        };
        let mut payload = Vec::with_capacity(STREAM_CHUNK_HEADER_LEN + data.len());
        payload.extend_from_slice(header.as_bytes());
        payload.extend_from_slice(data);

        Ok(Self::make_frame(FrameType::StreamChunk, payload, false))
    }

    /// Encode a `StreamEnd` frame. `crc32` of 0 means not validated.
    pub fn encode_stream_end(stream_id: u64, crc32: u32) -> Frame {
        let header = StreamEndHeader {
            stream_id: U64::new(stream_id),
            crc32: U32::new(crc32),
        };
        Self::make_frame(FrameType::StreamEnd, header.as_bytes().to_vec(), false)
    }

    /// Serialize frames into send-ready byte buffers, one per frame.
    pub fn serialize_frames(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(Frame::serialize).collect()
    }

    /// Finish a frame: append the CRC suffix when requested and fill in the
    /// header. `payload` must already fit within [`MAX_FRAME_PAYLOAD`]
    /// after the suffix.
    fn make_frame(frame_type: FrameType, mut payload: Vec<u8>, with_crc: bool) -> Frame {
        let mut flags = 0u16;
        if with_crc {
            let crc = crc32(&payload);
            payload.extend_from_slice(&crc.to_le_bytes());
            flags |= crate::wire::FLAG_CRC32;
        }

        debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD);

        Frame {
            header: FrameHeader::new(frame_type, flags, payload.len() as u32),
            payload,
        }
    }
}
