//! C1: bit-exact GT06 frame encode/decode.

use crate::error::DecodeError;
use crate::model::Imei;

pub const START_MARKER: [u8; 2] = [0x78, 0x78];
pub const STOP_MARKER: [u8; 2] = [0x0D, 0x0A];

pub const PROTO_LOGIN: u8 = 0x01;
pub const PROTO_LOCATION: u8 = 0x12;
pub const PROTO_HEARTBEAT: u8 = 0x13;
pub const PROTO_ALARM: u8 = 0x16;
pub const PROTO_COMMAND: u8 = 0x80;
pub const PROTO_COMMAND_RESPONSE: u8 = 0x21;

/// An immutable, already-framed GT06 packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub protocol: u8,
    pub content: Vec<u8>,
    pub serial: u16,
    pub checksum_ok: bool,
    pub raw: Vec<u8>,
}

/// A decoded protocol-0x80 inbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub server_flag: u8,
    pub subtype: u8,
    pub payload_len: u16,
    pub payload: String,
    /// Raw payload bytes, preserved so a lossy UTF-8 decode can still be
    /// inspected in the event record.
    pub payload_raw: Vec<u8>,
}

/// XOR of every byte given; used as the GT06 wire checksum, over the
/// range `[len]..=[serial_lo]`.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// `CRC16/ARC`-style variant with a private, non-standard polynomial
/// (`0xA6BC`), right-shift feedback, seed 0. Present only as a codec
/// utility: the GT06 wire frame always uses [`xor_checksum`], never this.
pub fn crc16_a6bc(data: &[u8]) -> u16 {
    const POLY: u16 = 0xA6BC;
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// X.25 CRC16 (polynomial `0x8408`, right-shift feedback, seed `0xFFFF`).
/// Same status as [`crc16_a6bc`]: a codec utility never used on the GT06
/// wire itself.
pub fn crc16_x25(data: &[u8]) -> u16 {
    const POLY: u16 = 0x8408;
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xFFFF
}

/// `raw_u32 = round(|deg| * 30000 * 60)`; the sign is carried separately
/// in the course/status word, never in this value.
pub fn encode_coord(deg: f64) -> u32 {
    (deg.abs() * 30000.0 * 60.0).round() as u32
}

pub fn decode_coord(raw: u32, negative: bool) -> f64 {
    let magnitude = raw as f64 / (30000.0 * 60.0);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Bit flags of the course/status word.
pub struct CourseStatus {
    pub course_deg: f64,
    pub south: bool,
    pub west: bool,
    pub gps_valid: bool,
}

impl CourseStatus {
    pub fn encode(&self) -> u16 {
        let course_field = (self.course_deg / 10.0).floor().clamp(0.0, 0x3FF as f64) as u16 & 0x3FF;
        let mut word = course_field;
        if self.south {
            word |= 1 << 10;
        }
        if self.west {
            word |= 1 << 11;
        }
        if self.gps_valid {
            word |= 1 << 12;
        }
        word
    }

    pub fn decode(word: u16) -> Self {
        CourseStatus {
            course_deg: (word & 0x3FF) as f64 * 10.0,
            south: word & (1 << 10) != 0,
            west: word & (1 << 11) != 0,
            gps_valid: word & (1 << 12) != 0,
        }
    }
}

/// Terminal info byte bits used by HEARTBEAT.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalInfo {
    pub acc_on: bool,
    pub gps_positioned: bool,
    pub gps_realtime: bool,
}

impl TerminalInfo {
    pub fn encode(&self) -> u8 {
        let mut b = 0u8;
        if self.acc_on {
            b |= 1 << 0;
        }
        if self.gps_positioned {
            b |= 1 << 1;
        }
        if self.gps_realtime {
            b |= 1 << 6;
        }
        b
    }

    pub fn decode(byte: u8) -> Self {
        TerminalInfo {
            acc_on: byte & (1 << 0) != 0,
            gps_positioned: byte & (1 << 1) != 0,
            gps_realtime: byte & (1 << 6) != 0,
        }
    }
}

fn build_frame(proto: u8, content: &[u8], serial: u16) -> Vec<u8> {
    let len = 1 + content.len() + 2;
    debug_assert!(len <= u8::MAX as usize, "content too large for a GT06 frame");
    let mut body = Vec::with_capacity(1 + len);
    body.push(len as u8);
    body.push(proto);
    body.extend_from_slice(content);
    body.extend_from_slice(&serial.to_be_bytes());

    let chk = xor_checksum(&body);

    let mut out = Vec::with_capacity(2 + body.len() + 1 + 2);
    out.extend_from_slice(&START_MARKER);
    out.extend_from_slice(&body);
    out.push(chk);
    out.extend_from_slice(&STOP_MARKER);
    out
}

/// Encodes a LOGIN frame (proto 0x01): content is the 8-byte BCD IMEI.
pub fn encode_login(imei: &Imei, serial: u16) -> Vec<u8> {
    build_frame(PROTO_LOGIN, &imei.to_bcd(), serial)
}

#[derive(Debug, Clone, Copy)]
pub struct LocationFields {
    pub ts: chrono::DateTime<chrono::Utc>,
    pub satellites: u8,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub gps_valid: bool,
}

fn location_content(f: &LocationFields) -> Vec<u8> {
    let mut content = Vec::with_capacity(18);
    content.extend_from_slice(&crate::counter::encode_datetime(f.ts));
    content.push(f.satellites);
    content.extend_from_slice(&encode_coord(f.lat_deg).to_be_bytes());
    content.extend_from_slice(&encode_coord(f.lon_deg).to_be_bytes());
    let speed = f.speed_kmh.round().clamp(0.0, 255.0) as u8;
    content.push(speed);
    let status = CourseStatus {
        course_deg: f.course_deg,
        south: f.lat_deg < 0.0,
        west: f.lon_deg < 0.0,
        gps_valid: f.gps_valid,
    };
    content.extend_from_slice(&status.encode().to_be_bytes());
    content
}

/// Encodes a LOCATION frame (proto 0x12).
pub fn encode_location(f: &LocationFields, serial: u16) -> Vec<u8> {
    build_frame(PROTO_LOCATION, &location_content(f), serial)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatFields {
    pub terminal_info: TerminalInfo,
    pub voltage_level: u8,
    pub gsm_signal: u8,
    pub alarm_lang: u16,
}

/// Encodes a HEARTBEAT frame (proto 0x13).
pub fn encode_heartbeat(f: &HeartbeatFields, serial: u16) -> Vec<u8> {
    let mut content = Vec::with_capacity(5);
    content.push(f.terminal_info.encode());
    content.push(f.voltage_level.min(6));
    content.push(f.gsm_signal.min(4));
    content.extend_from_slice(&f.alarm_lang.to_be_bytes());
    build_frame(PROTO_HEARTBEAT, &content, serial)
}

/// Encodes an ALARM frame (proto 0x16).
pub fn encode_alarm(loc: &LocationFields, alarm_type: u8, alarm_status: u32, serial: u16) -> Vec<u8> {
    let mut content = Vec::with_capacity(23);
    content.extend_from_slice(&crate::counter::encode_datetime(loc.ts));
    content.push(alarm_type);
    content.push(loc.satellites);
    content.extend_from_slice(&encode_coord(loc.lat_deg).to_be_bytes());
    content.extend_from_slice(&encode_coord(loc.lon_deg).to_be_bytes());
    let speed = loc.speed_kmh.round().clamp(0.0, 255.0) as u8;
    content.push(speed);
    let status = CourseStatus {
        course_deg: loc.course_deg,
        south: loc.lat_deg < 0.0,
        west: loc.lon_deg < 0.0,
        gps_valid: loc.gps_valid,
    };
    content.extend_from_slice(&status.encode().to_be_bytes());
    content.extend_from_slice(&alarm_status.to_be_bytes());
    build_frame(PROTO_ALARM, &content, serial)
}

/// Encodes a COMMAND RESPONSE frame (proto 0x21): `server_flag=0x00`,
/// `subtype=0x01` (ASCII text), `text_len` big-endian, then the text.
pub fn encode_command_response(text: &str, serial: u16) -> Vec<u8> {
    let text_bytes = text.as_bytes();
    let mut content = Vec::with_capacity(4 + text_bytes.len());
    content.push(0x00); // server_flag
    content.push(0x01); // subtype: ASCII text
    content.extend_from_slice(&(text_bytes.len() as u16).to_be_bytes());
    content.extend_from_slice(text_bytes);
    build_frame(PROTO_COMMAND_RESPONSE, &content, serial)
}

/// Generic ACK used for LOGIN-ACK, HEARTBEAT-ACK, LOCATION-ACK, and the
/// catch-all ACK for unrecognized protocols: echoes the request serial
/// with a single status byte of content.
pub fn encode_ack(proto: u8, status: u8, serial: u16) -> Vec<u8> {
    build_frame(proto, &[status], serial)
}

/// Decodes one complete, already-delimited wire packet (start through
/// stop markers inclusive) into a [`Frame`]. The reassembler (C2)
/// guarantees `raw` spans exactly one packet; this function only
/// re-validates structure and reports the checksum verdict, it never
/// drops a structurally valid frame on a checksum mismatch — callers
/// decide what to do with `checksum_ok == false`.
pub fn decode_frame(raw: &[u8]) -> Result<Frame, DecodeError> {
    if raw.len() < 2 + 1 + 1 + 2 + 1 + 2 {
        return Err(DecodeError::TooShort { need: 9, have: raw.len() });
    }
    let len = raw[2] as usize;
    if len < 3 {
        return Err(DecodeError::TooShort { need: 3, have: len });
    }
    let content_len = len - 3;
    let expected_total = len + 6;
    if raw.len() != expected_total {
        return Err(DecodeError::TooShort { need: expected_total, have: raw.len() });
    }

    let proto = raw[3];
    let content = raw[4..4 + content_len].to_vec();
    let serial_offset = 4 + content_len;
    let serial = u16::from_be_bytes([raw[serial_offset], raw[serial_offset + 1]]);
    let chk_offset = serial_offset + 2;
    let chk = raw[chk_offset];

    let checksum_range = &raw[2..chk_offset];
    let checksum_ok = xor_checksum(checksum_range) == chk;

    Ok(Frame {
        protocol: proto,
        content,
        serial,
        checksum_ok,
        raw: raw.to_vec(),
    })
}

/// Decodes a protocol-0x80 COMMAND content body:
/// `flag(1) | subtype(1) | text_len(2 BE) | text(text_len)`.
pub fn decode_command_frame(content: &[u8]) -> Result<CommandFrame, DecodeError> {
    if content.len() < 4 {
        return Err(DecodeError::TooShort { need: 4, have: content.len() });
    }
    let server_flag = content[0];
    let subtype = content[1];
    let payload_len = u16::from_be_bytes([content[2], content[3]]);
    let available = content.len() - 4;
    if payload_len as usize > available {
        return Err(DecodeError::TextLenOverflow { declared: payload_len as usize, available });
    }
    let payload_raw = content[4..4 + payload_len as usize].to_vec();
    let payload = String::from_utf8(payload_raw.clone())
        .unwrap_or_else(|_| String::from_utf8_lossy(&payload_raw).into_owned());

    Ok(CommandFrame { server_flag, subtype, payload_len, payload, payload_raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn checksum_law_holds_for_built_frame() {
        let imei = Imei::normalize("356932080000000").unwrap();
        let frame = encode_login(&imei, 7);
        // frame = START(2) LEN(1) PROTO(1) CONTENT(8) SERIAL(2) CHK(1) STOP(2)
        let chk_range = &frame[2..frame.len() - 3];
        let chk = frame[frame.len() - 3];
        assert_eq!(xor_checksum(chk_range), chk);
    }

    #[test]
    fn login_round_trip() {
        let imei = Imei::normalize("356932080000000").unwrap();
        let raw = encode_login(&imei, 42);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.protocol, PROTO_LOGIN);
        assert_eq!(frame.serial, 42);
        assert!(frame.checksum_ok);
        assert_eq!(Imei::from_bcd(&frame.content.clone().try_into().unwrap()).as_str(), "356932080000000");
    }

    #[test]
    fn bcd_imei_law() {
        let imei = Imei::normalize("356932080000000").unwrap();
        assert_eq!(imei.to_bcd(), [0x03, 0x56, 0x93, 0x20, 0x80, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn coordinate_law_sign_lives_in_course_status() {
        let raw = encode_coord(-23.55052);
        // magnitude only; sign is not encoded here.
        assert_eq!(raw, encode_coord(23.55052));
        let status = CourseStatus { course_deg: 0.0, south: true, west: false, gps_valid: true };
        assert_eq!(status.encode() & (1 << 10), 1 << 10);
    }

    #[test]
    fn location_frame_round_trip() {
        let f = LocationFields {
            ts: chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            satellites: 8,
            lat_deg: -23.55052,
            lon_deg: -46.63331,
            speed_kmh: 50.0,
            course_deg: 180.0,
            gps_valid: true,
        };
        let raw = encode_location(&f, 99);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.protocol, PROTO_LOCATION);
        assert!(frame.checksum_ok);
        assert_eq!(&frame.content[0..6], &crate::counter::encode_datetime(f.ts));
        assert_eq!(frame.content[6], 8);
        let lat_raw = u32::from_be_bytes(frame.content[7..11].try_into().unwrap());
        assert_eq!(lat_raw, encode_coord(-23.55052));
        let status_word = u16::from_be_bytes(frame.content[16..18].try_into().unwrap());
        let status = CourseStatus::decode(status_word);
        assert!(status.south);
        assert!(status.west);
        assert!(status.gps_valid);
        assert_eq!(status.course_deg, 180.0);
    }

    #[test]
    fn speed_clamped_to_u8_range() {
        let f = LocationFields {
            ts: chrono::Utc::now(),
            satellites: 8,
            lat_deg: 1.0,
            lon_deg: 1.0,
            speed_kmh: 999.0,
            course_deg: 0.0,
            gps_valid: true,
        };
        let raw = encode_location(&f, 1);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.content[11], 255);
    }

    #[test]
    fn checksum_mismatch_is_reported_not_rejected() {
        let imei = Imei::normalize("356932080000000").unwrap();
        let mut raw = encode_login(&imei, 1);
        let chk_idx = raw.len() - 3;
        raw[chk_idx] ^= 0xFF;
        let frame = decode_frame(&raw).unwrap();
        assert!(!frame.checksum_ok);
        assert_eq!(frame.protocol, PROTO_LOGIN);
    }

    #[test]
    fn command_frame_decode() {
        let content = {
            let mut c = vec![0x00, 0x01];
            c.extend_from_slice(&4u16.to_be_bytes());
            c.extend_from_slice(b"STOP");
            c
        };
        let cmd = decode_command_frame(&content).unwrap();
        assert_eq!(cmd.payload, "STOP");
        assert_eq!(cmd.subtype, 0x01);
    }

    #[test]
    fn command_frame_text_len_overflow_is_decode_error() {
        let content = {
            let mut c = vec![0x00, 0x01];
            c.extend_from_slice(&100u16.to_be_bytes());
            c.extend_from_slice(b"x");
            c
        };
        assert!(decode_command_frame(&content).is_err());
    }

    #[test]
    fn command_response_frame_round_trips() {
        let raw = encode_command_response("CMD OK:STOP", 5);
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.protocol, PROTO_COMMAND_RESPONSE);
        let cmd = decode_command_frame(&frame.content).unwrap();
        assert_eq!(cmd.payload, "CMD OK:STOP");
    }

    #[test]
    fn crc16_variants_are_not_the_wire_checksum() {
        // Sanity: the two CRC utilities exist and differ from the XOR
        // checksum and from each other; they are never invoked by
        // build_frame/decode_frame.
        let data = b"gt06";
        assert_ne!(crc16_a6bc(data), crc16_x25(data));
    }
}
