//! Codec data-plane scenarios: CRC corruption is silent, reassembly
//! timeouts reclaim abandoned partial messages.

use std::time::Duration;

use harbor_core::wire::{FRAME_HEADER_LEN, MESSAGE_HEADER_LEN};
use harbor_core::{Decoder, Encoder};

#[test]
fn crc_corruption_single_slice_never_completes() {
    let frames = Encoder::encode_message(0xC0FFEE, b"checksummed payload", true).unwrap();
    assert_eq!(frames.len(), 1);

    let mut wire = frames[0].serialize();
    wire[FRAME_HEADER_LEN + MESSAGE_HEADER_LEN + 3] ^= 0x40;

    let mut decoder = Decoder::default();
    decoder.feed(&wire).expect("corruption is not a protocol error");

    assert_eq!(decoder.stats().crc_errors, 1);
    assert!(decoder.get_message().is_none(), "corrupted frame must not deliver");
}

#[test]
fn crc_corruption_multi_slice_blocks_completion_until_cleanup() {
    let payload = vec![0x58u8; 600 * 1024];
    let frames = Encoder::encode_message(7, &payload, true).unwrap();
    assert!(frames.len() >= 3);

    let mut decoder = Decoder::new(Duration::from_millis(30));

    // Corrupt the middle slice only.
    for (i, frame) in frames.iter().enumerate() {
        let mut wire = frame.serialize();
        if i == 1 {
            wire[FRAME_HEADER_LEN + MESSAGE_HEADER_LEN] ^= 0xFF;
        }
        decoder.feed(&wire).unwrap();
    }

    assert_eq!(decoder.stats().crc_errors, 1);
    assert!(decoder.get_message().is_none(), "missing slice prevents completion");
    assert_eq!(decoder.stats().pending_messages, 1);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(decoder.cleanup_timeout_messages(), 1);
    assert_eq!(decoder.stats().pending_messages, 0);
    assert_eq!(decoder.stats().timeout_cleanups, 1);
}

#[test]
fn reassembly_timeout_scenario() {
    let payload = vec![0xABu8; 900 * 1024];
    let frames = Encoder::encode_message(11, &payload, false).unwrap();
    assert!(frames.len() >= 4);

    let mut decoder = Decoder::new(Duration::from_millis(40));

    // Feed only the first half of the slices.
    for frame in frames.iter().take(frames.len() / 2) {
        decoder.feed(&frame.serialize()).unwrap();
    }
    assert_eq!(decoder.stats().pending_messages, 1);
    assert!(decoder.get_message().is_none());

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(decoder.cleanup_timeout_messages(), 1);

    let stats = decoder.stats();
    assert_eq!(stats.pending_messages, 0);
    assert_eq!(stats.timeout_cleanups, 1);
    assert!(decoder.get_message().is_none(), "no MessageComplete ever appears");
}

#[test]
fn round_trip_with_and_without_crc() {
    for crc in [false, true] {
        for len in [0usize, 1, 17, 4096, 300 * 1024] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames = Encoder::encode_message(len as u64, &payload, crc).unwrap();

            let mut decoder = Decoder::default();
            for buf in Encoder::serialize_frames(&frames) {
                decoder.feed(&buf).unwrap();
            }

            let message = decoder.get_message().expect("round trip completes");
            assert_eq!(message.message_id, len as u64);
            assert_eq!(message.data.as_ref(), payload.as_slice(), "crc={crc} len={len}");
            assert!(decoder.get_message().is_none());
        }
    }
}
