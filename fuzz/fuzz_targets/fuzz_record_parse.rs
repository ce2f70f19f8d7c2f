#![no_main]

//! Fuzz target for the DTLS record framing check.
//!
//! Sockets run every inbound datagram through `record::inspect` before it
//! reaches the engine, so it must never panic on arbitrary input.
//!
//! DTLS record format:
//! - ContentType: 1 byte (20-24 valid values)
//! - ProtocolVersion: 2 bytes (0xFEFD for DTLS 1.2, 0xFEFF for DTLS 1.0)
//! - Epoch: 2 bytes
//! - Sequence Number: 6 bytes (u48)
//! - Length: 2 bytes
//! - Fragment: variable

use libfuzzer_sys::fuzz_target;

use nbtls::record::{compare_seq, inspect, HEADER_LEN, MAX_RECORD_LEN};

fuzz_target!(|data: &[u8]| {
    if let Some(header) = inspect(data) {
        assert!(header.version.is_dtls());
        assert!(HEADER_LEN + header.length as usize <= data.len());

        let seq = header.wire_sequence();
        assert_eq!(compare_seq(seq, seq), 0);
    }

    if data.is_empty() {
        return;
    }

    // Wrap the input in a well formed header so the fragment checks run too.
    let frag_len = data.len().min(MAX_RECORD_LEN as usize);

    let mut record = Vec::with_capacity(HEADER_LEN + frag_len);
    record.push(23u8); // ContentType::ApplicationData
    record.extend_from_slice(&[0xFE, 0xFD]);
    record.extend_from_slice(&[0, 1]);
    record.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
    record.extend_from_slice(&(frag_len as u16).to_be_bytes());
    record.extend_from_slice(&data[..frag_len]);

    let header = inspect(&record);
    assert!(header.is_some());
});
