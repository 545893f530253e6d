//! Wire framing: a fixed 20-byte big-endian header plus payload.
//!
//! Header layout: `version(4) | payload_length(4) | biz_code(4) | seq_id(8)`.
//! `payload_length` must be strictly less than [`MAX_PAYLOAD_SIZE`]; a header
//! claiming `>= MAX_PAYLOAD_SIZE` is rejected rather than trusted, whether it
//! is framing an outbound send or parsing an inbound stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NacError, Result};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 20;

/// Payload length must be strictly less than this many bytes (10 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// A fully decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol version this packet was framed with.
    pub version: u32,
    /// Application-defined operation tag.
    pub biz_code: u32,
    /// Correlates a response to its originating request.
    pub seq_id: u64,
    /// The packet's payload bytes.
    pub payload: Bytes,
}

/// Frames outbound packets and validates their header's configured version
/// against every inbound header it parses.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolAdapter {
    version: u32,
}

impl ProtocolAdapter {
    /// Creates an adapter fixed to `version`; every inbound header is
    /// compared against it.
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// The version this adapter was constructed with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Serializes `payload` into a framed packet. Rejects payloads whose
    /// length meets or exceeds [`MAX_PAYLOAD_SIZE`] without touching the wire.
    pub fn create_packet(&self, biz_code: u32, seq_id: u64, payload: &[u8]) -> Result<Bytes> {
        if payload.len() >= MAX_PAYLOAD_SIZE {
            return Err(NacError::PayloadTooLarge {
                limit: MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32(self.version);
        buf.put_u32(payload.len() as u32);
        buf.put_u32(biz_code);
        buf.put_u64(seq_id);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

/// The result of feeding bytes into an [`InboundFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete, well-formed packet was decoded.
    Packet(Packet),
    /// The header's version did not match the adapter's configured version.
    VersionMismatch {
        /// This adapter's configured version.
        expected: u32,
        /// The version found on the wire.
        actual: u32,
    },
    /// The header's payload length met or exceeded [`MAX_PAYLOAD_SIZE`].
    LengthAbnormal {
        /// The configured limit.
        limit: usize,
        /// The length found on the wire.
        actual: u32,
    },
}

/// A stateful byte-stream framer: accumulates partial reads and emits
/// [`FrameEvent`]s as complete headers/payloads become available.
///
/// A version mismatch or an oversized length is unrecoverable for the bytes
/// already buffered (the header is the only guide to where the next packet
/// starts) so the framer discards its buffer and waits for the caller to
/// decide whether to keep feeding it.
pub struct InboundFramer {
    version: u32,
    buffer: BytesMut,
}

impl InboundFramer {
    /// Creates a framer that expects every header to declare `version`.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            buffer: BytesMut::new(),
        }
    }

    /// Feeds newly received bytes, returning every event produced by
    /// decoding as much of the buffer as is currently complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        loop {
            if self.buffer.len() < HEADER_SIZE {
                break;
            }
            let mut header = &self.buffer[..HEADER_SIZE];
            let version = header.get_u32();
            let payload_len = header.get_u32();
            let biz_code = header.get_u32();
            let seq_id = header.get_u64();

            if version != self.version {
                events.push(FrameEvent::VersionMismatch {
                    expected: self.version,
                    actual: version,
                });
                self.buffer.clear();
                break;
            }
            if payload_len as usize >= MAX_PAYLOAD_SIZE {
                events.push(FrameEvent::LengthAbnormal {
                    limit: MAX_PAYLOAD_SIZE,
                    actual: payload_len,
                });
                self.buffer.clear();
                break;
            }

            let total = HEADER_SIZE + payload_len as usize;
            if self.buffer.len() < total {
                break;
            }

            let mut frame = self.buffer.split_to(total);
            frame.advance(HEADER_SIZE);
            events.push(FrameEvent::Packet(Packet {
                version,
                biz_code,
                seq_id,
                payload: frame.freeze(),
            }));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_packet_through_the_framer() {
        let adapter = ProtocolAdapter::new(1);
        let wire = adapter.create_packet(7, 42, b"ping").unwrap();

        let mut framer = InboundFramer::new(1);
        let events = framer.feed(&wire);
        assert_eq!(
            events,
            vec![FrameEvent::Packet(Packet {
                version: 1,
                biz_code: 7,
                seq_id: 42,
                payload: Bytes::from_static(b"ping"),
            })]
        );
    }

    #[test]
    fn feeds_byte_at_a_time_without_losing_the_packet() {
        let adapter = ProtocolAdapter::new(1);
        let wire = adapter.create_packet(7, 42, b"ping").unwrap();

        let mut framer = InboundFramer::new(1);
        let mut events = Vec::new();
        for byte in wire.iter() {
            events.extend(framer.feed(&[*byte]));
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], FrameEvent::Packet(p) if p.seq_id == 42));
    }

    #[test]
    fn create_packet_rejects_oversized_payload() {
        let adapter = ProtocolAdapter::new(1);
        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        let err = adapter.create_packet(1, 1, &payload).unwrap_err();
        assert!(matches!(err, NacError::PayloadTooLarge { limit, actual } if limit == MAX_PAYLOAD_SIZE && actual == MAX_PAYLOAD_SIZE));
    }

    #[test]
    fn create_packet_accepts_payload_one_byte_under_the_limit() {
        let adapter = ProtocolAdapter::new(1);
        let payload = vec![0u8; MAX_PAYLOAD_SIZE - 1];
        assert!(adapter.create_packet(1, 1, &payload).is_ok());
    }

    #[test]
    fn inbound_framer_flags_version_mismatch() {
        let mut framer = InboundFramer::new(2);
        let wire = ProtocolAdapter::new(1).create_packet(7, 1, b"x").unwrap();
        let events = framer.feed(&wire);
        assert_eq!(events, vec![FrameEvent::VersionMismatch { expected: 2, actual: 1 }]);
    }

    #[test]
    fn inbound_framer_flags_length_abnormal_on_forged_header() {
        let mut framer = InboundFramer::new(1);
        let mut forged = BytesMut::with_capacity(HEADER_SIZE);
        forged.put_u32(1);
        forged.put_u32(MAX_PAYLOAD_SIZE as u32);
        forged.put_u32(1);
        forged.put_u64(1);
        let events = framer.feed(&forged);
        assert_eq!(
            events,
            vec![FrameEvent::LengthAbnormal {
                limit: MAX_PAYLOAD_SIZE,
                actual: MAX_PAYLOAD_SIZE as u32,
            }]
        );
    }

    #[test]
    fn inbound_framer_decodes_multiple_packets_from_one_feed() {
        let adapter = ProtocolAdapter::new(1);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&adapter.create_packet(1, 1, b"a").unwrap());
        wire.extend_from_slice(&adapter.create_packet(2, 2, b"bb").unwrap());

        let mut framer = InboundFramer::new(1);
        let events = framer.feed(&wire);
        assert_eq!(events.len(), 2);
    }
}
