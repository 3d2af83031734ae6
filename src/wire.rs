//! Binary wire framing for the `FULL`/`HEADERONLY`/`STREAMHEADER` serialize
//! formats (spec.md §6, §4.8).
//!
//! Grounded on the original's `Serialization::BinarySerializer::Serialize`
//! (`examples/original_source/src/data/serialize.cpp`): a packet header of
//! `[u16 stream_id][u64 packet_id]` precedes the data-specific layout, except
//! under `COMPACT` (data only) and `NONE` (nothing at all) — `STREAMHEADER`
//! still carries a body in the binary path; only the YAML serializer omits it
//! there. The header is a
//! `bytemuck` `Pod` struct so it round-trips through raw bytes without a
//! hand-rolled byte-order dance; a trailing CRC32 (the teacher's own
//! `crc32fast`, as in `flux/src/crc32.rs`) lets a reader detect a truncated
//! or corrupted packet before trusting the payload that follows.

use bytemuck::{Pod, Zeroable};

use crate::data::{RingPayload, SerializeFormat};

/// `[u16 stream_id][u64 packet_id]`, packed with no padding so its `Pod`
/// byte representation matches the wire layout exactly.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PacketHeader {
    pub stream_id: u16,
    pub packet_id: u64,
}

impl PacketHeader {
    pub fn new(stream_id: u16, packet_id: u64) -> Self {
        Self { stream_id, packet_id }
    }

    pub fn to_bytes(self) -> [u8; std::mem::size_of::<PacketHeader>()] {
        bytemuck::cast(self)
    }

    pub fn from_bytes(bytes: [u8; std::mem::size_of::<PacketHeader>()]) -> Self {
        bytemuck::cast(bytes)
    }
}

/// Encodes one packet exactly as the original's `BinarySerializer` does:
/// `NONE` emits nothing, `COMPACT` emits the payload body only, everything
/// else (including `STREAMHEADER`) is the packet header followed by the
/// body — only the YAML serializer drops the body under `STREAMHEADER`.
pub fn encode_packet(format: SerializeFormat, stream_id: u16, packet_id: u64, item: &dyn RingPayload) -> Vec<u8> {
    match format {
        SerializeFormat::None => Vec::new(),
        SerializeFormat::Compact => item.serialize(format),
        _ => {
            let mut out = Vec::new();
            out.extend_from_slice(&PacketHeader::new(stream_id, packet_id).to_bytes());
            out.extend_from_slice(&item.serialize(format));
            out
        }
    }
}

/// Appends a CRC32 trailer (teacher's `crc32fast`, as in `flux/src/crc32.rs`)
/// so a reader can detect a truncated or corrupted packet before parsing it.
pub fn append_checksum(mut packet: Vec<u8>) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&packet);
    packet.extend_from_slice(&hasher.finalize().to_le_bytes());
    packet
}

/// Verifies and strips a trailer written by [`append_checksum`]. Returns
/// `None` if the packet is too short to carry a trailer or the checksum
/// doesn't match.
pub fn verify_checksum(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < 4 {
        return None;
    }
    let (body, trailer) = packet.split_at(packet.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().ok()?);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    if hasher.finalize() == expected {
        Some(body)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Sample(u64);

    impl RingPayload for Sample {
        fn clear_data(&mut self) {
            self.0 = 0;
        }
        fn serialize(&self, _format: SerializeFormat) -> Vec<u8> {
            self.0.to_le_bytes().to_vec()
        }
        fn describe(&self, _format: SerializeFormat) -> String {
            format!("Sample({})", self.0)
        }
        fn serial(&self) -> u64 {
            self.0
        }
        fn set_serial(&mut self, serial: u64) {
            self.0 = serial;
        }
        fn source_timestamp_ns(&self) -> i64 {
            0
        }
        fn set_source_timestamp_ns(&mut self, _ts: i64) {}
        fn hardware_timestamp_us(&self) -> u64 {
            0
        }
        fn set_hardware_timestamp_us(&mut self, _ts: u64) {}
        fn end_of_stream(&self) -> bool {
            false
        }
        fn set_end_of_stream(&mut self, _eos: bool) {}
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let header = PacketHeader::new(7, 42);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(PacketHeader::from_bytes(bytes), header);
    }

    #[test]
    fn full_format_prefixes_header_before_body() {
        let packet = encode_packet(SerializeFormat::Full, 3, 9, &Sample(0xAABB));
        assert_eq!(packet.len(), 10 + 8);
        assert_eq!(&packet[..10], &PacketHeader::new(3, 9).to_bytes());
        assert_eq!(&packet[10..], &0xAABBu64.to_le_bytes());
    }

    #[test]
    fn compact_format_omits_the_header() {
        let packet = encode_packet(SerializeFormat::Compact, 3, 9, &Sample(5));
        assert_eq!(packet, 5u64.to_le_bytes().to_vec());
    }

    #[test]
    fn none_format_is_empty() {
        assert!(encode_packet(SerializeFormat::None, 3, 9, &Sample(5)).is_empty());
    }

    #[test]
    fn stream_header_prefixes_header_before_body() {
        let packet = encode_packet(SerializeFormat::StreamHeader, 3, 9, &Sample(5));
        assert_eq!(packet.len(), 10 + 8);
        assert_eq!(&packet[..10], &PacketHeader::new(3, 9).to_bytes());
        assert_eq!(&packet[10..], &5u64.to_le_bytes());
    }

    #[test]
    fn checksum_detects_corruption() {
        let packet = append_checksum(encode_packet(SerializeFormat::Full, 1, 1, &Sample(123)));
        let verified = verify_checksum(&packet).unwrap();
        assert_eq!(verified.len(), 10 + 8);

        let mut corrupted = packet.clone();
        corrupted[0] ^= 0xFF;
        assert!(verify_checksum(&corrupted).is_none());
    }
}
