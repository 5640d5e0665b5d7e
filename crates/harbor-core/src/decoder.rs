//! Frame decoder — turns a TCP byte stream back into messages and stream
//! events. Handles partial reads, interleaved slices, CRC verification, and
//! timeout cleanup of abandoned reassemblies.
//!
//! One decoder per connection. Feed it whatever the socket produced; it keeps
//! incomplete trailing bytes for the next call, so byte-at-a-time feeding is
//! equivalent to feeding the whole stream at once.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use zerocopy::FromBytes;

use crate::wire::{
    crc32, FrameHeader, FrameType, MessageHeader, ProtocolError, StreamChunkHeader,
    StreamEndHeader, StreamStartHeader, DEFAULT_MESSAGE_TIMEOUT_MS, FRAME_HEADER_LEN,
    MESSAGE_HEADER_LEN, STREAM_CHUNK_HEADER_LEN,
};

/// A fully reassembled message, ready for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageComplete {
    pub message_id: u64,
    pub data: Bytes,
}

/// A stream event, surfaced as soon as its frame arrives. Streams are not
/// reassembled; offset bookkeeping belongs to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start { stream_id: u64, total_size: u64 },
    Chunk { stream_id: u64, offset: u64, data: Bytes },
    End { stream_id: u64, crc32: u32 },
}

/// Decoder counters. All values are cumulative since construction or the
/// last [`Decoder::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_received: u64,
    pub messages_completed: u64,
    pub stream_events: u64,
    pub bytes_received: u64,
    pub crc_errors: u64,
    pub timeout_cleanups: u64,
    pub pending_messages: usize,
    pub buffer_size: usize,
}

/// Reassembly state for one in-flight message.
struct MessageAssembly {
    total: u16,
    slices: Vec<Option<Bytes>>,
    received: u16,
    first_seen: Instant,
}

/// Protocol decoder.
pub struct Decoder {
    buffer: Vec<u8>,
    messages: HashMap<u64, MessageAssembly>,
    completed: VecDeque<MessageComplete>,
    stream_events: VecDeque<StreamEvent>,
    message_timeout: Duration,
    stats: DecoderStats,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS))
    }
}

impl Decoder {
    /// Build a decoder with the given reassembly timeout.
    pub fn new(message_timeout: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            messages: HashMap::new(),
            completed: VecDeque::new(),
            stream_events: VecDeque::new(),
            message_timeout,
            stats: DecoderStats::default(),
        }
    }

    /// Append received bytes and drain as many complete frames as possible.
    ///
    /// Errors are fatal for the connection: the byte stream can no longer be
    /// trusted and the caller must close. CRC mismatches are NOT errors —
    /// the frame is counted and dropped.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.stats.bytes_received += data.len() as u64;
        self.buffer.extend_from_slice(data);
        self.drain_frames()
    }

    /// Pop the next completed message, if any.
    pub fn get_message(&mut self) -> Option<MessageComplete> {
        self.completed.pop_front()
    }

    /// Pop the next stream event, if any.
    pub fn get_stream_event(&mut self) -> Option<StreamEvent> {
        self.stream_events.pop_front()
    }

    /// Drop reassembly entries older than the configured timeout. Returns
    /// how many were removed. The decoder owns no timer; callers invoke this
    /// on their own cadence (e.g. alongside a periodic maintenance tick).
    pub fn cleanup_timeout_messages(&mut self) -> usize {
        let now = Instant::now();
        let timeout = self.message_timeout;
        let before = self.messages.len();
        self.messages
            .retain(|_, assembly| now.duration_since(assembly.first_seen) < timeout);
        let cleaned = before - self.messages.len();
        self.stats.timeout_cleanups += cleaned as u64;
        cleaned
    }

    /// Clear all state, including statistics.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.messages.clear();
        self.completed.clear();
        self.stream_events.clear();
        self.stats = DecoderStats::default();
    }

    /// Current counters. `pending_messages` and `buffer_size` reflect live
    /// state rather than cumulative counts.
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            pending_messages: self.messages.len(),
            buffer_size: self.buffer.len(),
            ..self.stats
        }
    }

    fn drain_frames(&mut self) -> Result<(), ProtocolError> {
        loop {
            if self.buffer.len() < FRAME_HEADER_LEN {
                return Ok(());
            }

            let header = FrameHeader::read_from_prefix(self.buffer.as_slice())
                .expect("buffer holds at least one header");
            let frame_type = header.validate()?;

            let payload_len = header.payload_len.get() as usize;
            let frame_len = FRAME_HEADER_LEN + payload_len;
            if self.buffer.len() < frame_len {
                return Ok(());
            }

            self.stats.frames_received += 1;

            // CRC check: count and drop the frame, never raise. The data
            // plane treats this as silent corruption.
            let mut data_len = payload_len;
            if header.has_crc() && payload_len >= 4 {
                data_len -= 4;
                let payload = &self.buffer[FRAME_HEADER_LEN..frame_len];
                let stored = u32::from_le_bytes(payload[data_len..].try_into().unwrap());
                if stored != crc32(&payload[..data_len]) {
                    self.stats.crc_errors += 1;
                    self.buffer.drain(..frame_len);
                    continue;
                }
            }

            // Detach the payload before dispatch so reassembly can keep
            // zero-copy slices of it.
            let payload =
                Bytes::copy_from_slice(&self.buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + data_len]);
            self.buffer.drain(..frame_len);

            match frame_type {
                FrameType::Message => self.dispatch_message(payload)?,
                FrameType::StreamStart => {
                    let h = StreamStartHeader::read_from_prefix(payload.as_ref())
                        .ok_or(ProtocolError::TruncatedPayload)?;
                    self.stats.stream_events += 1;
                    self.stream_events.push_back(StreamEvent::Start {
                        stream_id: h.stream_id.get(),
                        total_size: h.total_size.get(),
                    });
                }
                FrameType::StreamChunk => {
                    let h = StreamChunkHeader::read_from_prefix(payload.as_ref())
                        .ok_or(ProtocolError::TruncatedPayload)?;
                    self.stats.stream_events += 1;
                    self.stream_events.push_back(StreamEvent::Chunk {
                        stream_id: h.stream_id.get(),
                        offset: h.offset.get(),
                        data: payload.slice(STREAM_CHUNK_HEADER_LEN..),
                    });
                }
                FrameType::StreamEnd => {
                    let h = StreamEndHeader::read_from_prefix(payload.as_ref())
                        .ok_or(ProtocolError::TruncatedPayload)?;
                    self.stats.stream_events += 1;
                    self.stream_events.push_back(StreamEvent::End {
                        stream_id: h.stream_id.get(),
                        crc32: h.crc32.get(),
                    });
                }
            }
        }
    }

    fn dispatch_message(&mut self, payload: Bytes) -> Result<(), ProtocolError> {
        let mh = MessageHeader::read_from_prefix(payload.as_ref())
            .ok_or(ProtocolError::TruncatedPayload)?;
        let message_id = mh.message_id.get();
        let total = mh.total_slices.get();
        let sequence = mh.sequence.get();

        if sequence >= total {
            return Err(ProtocolError::BadSliceIndex { sequence, total });
        }

        let assembly = self.messages.entry(message_id).or_insert_with(|| MessageAssembly {
            total,
            slices: vec![None; total as usize],
            received: 0,
            first_seen: Instant::now(),
        });

        // A peer changing total_slices mid-message is lying about the frame
        // layout; treat the earlier announcement as authoritative.
        if sequence >= assembly.total {
            return Err(ProtocolError::BadSliceIndex { sequence, total: assembly.total });
        }

        // Duplicate slices are ignored; first arrival wins.
        let slot = &mut assembly.slices[sequence as usize];
        if slot.is_none() {
            *slot = Some(payload.slice(MESSAGE_HEADER_LEN..));
            assembly.received += 1;
        }

        if assembly.received == assembly.total {
            let assembly = self.messages.remove(&message_id).expect("entry exists");
            let len: usize = assembly
                .slices
                .iter()
                .map(|s| s.as_ref().map_or(0, Bytes::len))
                .sum();
            let mut data = Vec::with_capacity(len);
            for slice in &assembly.slices {
                data.extend_from_slice(slice.as_ref().expect("all slices received"));
            }
            self.completed.push_back(MessageComplete {
                message_id,
                data: Bytes::from(data),
            });
            self.stats.messages_completed += 1;
        }
        Ok(())
    }
}
