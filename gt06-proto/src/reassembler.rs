//! C2: turns an unbounded byte stream into whole, validated GT06 frames.

use crate::codec::{self, Frame, START_MARKER, STOP_MARKER};
use crate::error::{DecodeError, FramingError};

/// Growable receive buffer plus the scan/resync state machine: find a
/// start marker, validate the declared length fits what's buffered, and
/// drop a byte to resync on any structural mismatch.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buf: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends freshly-read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drains as many complete frames as are currently buffered. Returns
    /// them in stream order. Never crosses the buffer boundary and never
    /// drops bytes on partial/coalesced delivery.
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>, DecodeError> {
        let mut frames = Vec::new();
        loop {
            match self.try_take_one()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    /// Extracts one frame if enough bytes are buffered, else `Ok(None)`.
    /// Desyncs (missing stop marker) drop one byte and retry in-loop.
    fn try_take_one(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            // 1. find the start marker, drop anything before it.
            let start = match self.find_start_marker() {
                Some(idx) => idx,
                None => {
                    // Keep the final byte in case it is the first half of
                    // a split start marker.
                    if self.buf.len() > 1 {
                        let keep_from = self.buf.len() - 1;
                        tracing::warn!(
                            error = %FramingError::StartMarkerNotFound(keep_from),
                            "gt06_reassembler_resync"
                        );
                        self.buf.drain(0..keep_from);
                    }
                    return Ok(None);
                }
            };
            if start > 0 {
                self.buf.drain(0..start);
            }

            // 2. need at least 3 bytes to read the length byte.
            if self.buf.len() < 3 {
                return Ok(None);
            }

            // 3. compute total packet length.
            let len = self.buf[2] as usize;
            let packet_len = len + 6;

            // 4. wait for the full packet.
            if self.buf.len() < packet_len {
                return Ok(None);
            }

            // 5. verify the stop marker; resync by dropping one byte on mismatch.
            if self.buf[packet_len - 2..packet_len] != STOP_MARKER {
                tracing::warn!(
                    error = %FramingError::StopMarkerMismatch(packet_len - 2),
                    "gt06_reassembler_resync"
                );
                self.buf.drain(0..1);
                continue;
            }

            // 6. hand the complete packet to the codec.
            let packet: Vec<u8> = self.buf.drain(0..packet_len).collect();
            return Ok(Some(codec::decode_frame(&packet)?));
        }
    }

    fn find_start_marker(&self) -> Option<usize> {
        if self.buf.len() < 2 {
            return None;
        }
        self.buf.windows(2).position(|w| w == START_MARKER)
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Imei;

    fn login_packet(serial: u16) -> Vec<u8> {
        let imei = Imei::normalize("356932080000000").unwrap();
        codec::encode_login(&imei, serial)
    }

    #[test]
    fn single_whole_frame() {
        let mut r = FrameReassembler::new();
        r.feed(&login_packet(1));
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].serial, 1);
    }

    #[test]
    fn two_coalesced_frames() {
        let mut r = FrameReassembler::new();
        let mut buf = login_packet(1);
        buf.extend_from_slice(&login_packet(2));
        r.feed(&buf);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].serial, 1);
        assert_eq!(frames[1].serial, 2);
    }

    #[test]
    fn byte_at_a_time_fragmentation_s4() {
        let mut r = FrameReassembler::new();
        let packet = login_packet(3);
        let mut frames = Vec::new();
        for b in packet {
            r.feed(&[b]);
            frames.extend(r.drain_frames().unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].serial, 3);
    }

    #[test]
    fn garbage_before_start_marker_is_dropped() {
        let mut r = FrameReassembler::new();
        let mut buf = vec![0xAA, 0xBB, 0xCC];
        buf.extend_from_slice(&login_packet(9));
        r.feed(&buf);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].serial, 9);
    }

    #[test]
    fn desync_drops_one_byte_and_resyncs() {
        let mut r = FrameReassembler::new();
        // A start marker that lies about its length (points past the
        // real stop marker), followed by a genuine frame.
        let mut buf = vec![0x78, 0x78, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&login_packet(11));
        r.feed(&buf);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].serial, 11);
    }

    #[test]
    fn never_emits_partial_frame() {
        let mut r = FrameReassembler::new();
        let packet = login_packet(4);
        r.feed(&packet[..packet.len() - 2]);
        assert!(r.drain_frames().unwrap().is_empty());
        r.feed(&packet[packet.len() - 2..]);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
    }
}
