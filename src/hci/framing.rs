//! H4 packet boundary tracking for the received byte stream
//!
//! eHCILL control bytes can only appear where the controller would otherwise
//! start a new HCI packet. The framer follows packet headers and lengths so
//! the transport knows, byte by byte, whether it is looking at packet data or
//! at a packet type position.

use crate::ehcill::ControlByte;
use log::warn;

/// H4 packet type indicators
pub mod packet_type {
    pub const COMMAND: u8 = 0x01;
    pub const ACL_DATA: u8 = 0x02;
    pub const SCO_DATA: u8 = 0x03;
    pub const EVENT: u8 = 0x04;
    pub const ISO_DATA: u8 = 0x05;
}

/// What a received byte turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    /// Part of an HCI packet, forward upwards
    Hci,
    /// eHCILL control byte at a packet boundary
    Control(ControlByte),
    /// Neither a packet type nor a control byte, dropped
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Next byte is a packet type or control byte
    PacketStart,
    /// Collecting the header of a packet
    Header { kind: u8, seen: usize, len: usize },
    /// Payload bytes still to come
    Payload { remaining: usize },
}

/// Tracks H4 packet boundaries one byte at a time.
pub struct PacketFramer {
    stage: Stage,
    header: [u8; 4],
}

fn header_len(kind: u8) -> Option<usize> {
    match kind {
        packet_type::COMMAND | packet_type::SCO_DATA => Some(3),
        packet_type::ACL_DATA | packet_type::ISO_DATA => Some(4),
        packet_type::EVENT => Some(2),
        _ => None,
    }
}

fn payload_len(kind: u8, header: &[u8; 4]) -> usize {
    match kind {
        packet_type::ACL_DATA => usize::from(u16::from_le_bytes([header[2], header[3]])),
        packet_type::ISO_DATA => usize::from(u16::from_le_bytes([header[2], header[3]]) & 0x3FFF),
        packet_type::EVENT => usize::from(header[1]),
        _ => usize::from(header[2]),
    }
}

impl PacketFramer {
    pub const fn new() -> Self {
        Self {
            stage: Stage::PacketStart,
            header: [0; 4],
        }
    }

    /// Classify the next received byte and advance.
    pub fn feed(&mut self, byte: u8) -> ByteClass {
        match self.stage {
            Stage::PacketStart => {
                if let Some(len) = header_len(byte) {
                    self.stage = Stage::Header {
                        kind: byte,
                        seen: 0,
                        len,
                    };
                    ByteClass::Hci
                } else if let Some(control) = ControlByte::from_byte(byte) {
                    ByteClass::Control(control)
                } else {
                    warn!("dropping invalid packet start 0x{:02X}", byte);
                    ByteClass::Invalid
                }
            }
            Stage::Header { kind, seen, len } => {
                self.header[seen] = byte;
                let seen = seen + 1;
                self.stage = if seen < len {
                    Stage::Header { kind, seen, len }
                } else {
                    match payload_len(kind, &self.header) {
                        0 => Stage::PacketStart,
                        remaining => Stage::Payload { remaining },
                    }
                };
                ByteClass::Hci
            }
            Stage::Payload { remaining } => {
                self.stage = if remaining > 1 {
                    Stage::Payload {
                        remaining: remaining - 1,
                    }
                } else {
                    Stage::PacketStart
                };
                ByteClass::Hci
            }
        }
    }

    /// True when the next byte starts a packet.
    pub fn at_packet_start(&self) -> bool {
        self.stage == Stage::PacketStart
    }

    /// Forget any partial packet.
    pub fn reset(&mut self) {
        self.stage = Stage::PacketStart;
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(framer: &mut PacketFramer, bytes: &[u8]) {
        for &byte in bytes {
            assert_eq!(framer.feed(byte), ByteClass::Hci);
        }
    }

    #[test]
    fn test_event_packet_boundaries() {
        let mut framer = PacketFramer::new();

        // Command Complete for HCI_Reset
        feed_all(&mut framer, &[0x04, 0x0E, 0x04, 0x01, 0x03, 0x0C]);
        assert!(!framer.at_packet_start());
        feed_all(&mut framer, &[0x00]);
        assert!(framer.at_packet_start());
    }

    #[test]
    fn test_control_byte_only_at_boundary() {
        let mut framer = PacketFramer::new();

        assert_eq!(
            framer.feed(0x30),
            ByteClass::Control(ControlByte::SleepIndication)
        );

        // 0x30 inside an event payload is data
        feed_all(&mut framer, &[0x04, 0x05, 0x02, 0x30, 0x30]);
        assert!(framer.at_packet_start());
        assert_eq!(
            framer.feed(0x32),
            ByteClass::Control(ControlByte::WakeIndication)
        );
    }

    #[test]
    fn test_acl_length_is_little_endian() {
        let mut framer = PacketFramer::new();

        // Handle 0x0040, length 0x0102
        feed_all(&mut framer, &[0x02, 0x40, 0x00, 0x02, 0x01]);
        for _ in 0..0x0102 {
            assert!(!framer.at_packet_start());
            assert_eq!(framer.feed(0x33), ByteClass::Hci);
        }
        assert!(framer.at_packet_start());
    }

    #[test]
    fn test_iso_length_masks_flags() {
        let mut framer = PacketFramer::new();
        feed_all(&mut framer, &[0x05, 0x01, 0x00, 0x01, 0xC0]);
        feed_all(&mut framer, &[0xAA]);
        assert!(framer.at_packet_start());
    }

    #[test]
    fn test_zero_length_packet() {
        let mut framer = PacketFramer::new();
        feed_all(&mut framer, &[0x04, 0x13, 0x00]);
        assert!(framer.at_packet_start());
    }

    #[test]
    fn test_invalid_start_dropped() {
        let mut framer = PacketFramer::new();
        assert_eq!(framer.feed(0xFF), ByteClass::Invalid);
        assert!(framer.at_packet_start());
    }

    #[test]
    fn test_reset() {
        let mut framer = PacketFramer::new();
        framer.feed(0x04);
        framer.reset();
        assert!(framer.at_packet_start());
    }
}
