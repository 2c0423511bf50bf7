//! Value types shared across the codec, state machines, and bridge.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated 15-digit GT06 IMEI.
///
/// Normalization rule: left-pad with `'0'` if shorter, truncate the
/// leftmost digits if longer, then require exactly 15 decimal digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Imei(String);

impl Imei {
    pub fn normalize(raw: &str) -> Result<Self, ConfigError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidImei(raw.to_string()));
        }
        let normalized = if raw.len() < 15 {
            format!("{:0>15}", raw)
        } else if raw.len() > 15 {
            raw[raw.len() - 15..].to_string()
        } else {
            raw.to_string()
        };
        Ok(Imei(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 8-byte BCD encoding: pad with one leading `'0'` to 16 digits, then
    /// pack two digits per byte, high nibble first.
    pub fn to_bcd(&self) -> [u8; 8] {
        let padded = format!("0{}", self.0);
        let digits: Vec<u8> = padded.bytes().map(|b| b - b'0').collect();
        let mut out = [0u8; 8];
        for i in 0..8 {
            out[i] = (digits[2 * i] << 4) | digits[2 * i + 1];
        }
        out
    }

    /// Inverse of [`Imei::to_bcd`]; used to decode an inbound LOGIN frame.
    pub fn from_bcd(bytes: &[u8; 8]) -> Self {
        let mut digits = String::with_capacity(16);
        for &b in bytes {
            digits.push((b'0' + (b >> 4)) as char);
            digits.push((b'0' + (b & 0x0F)) as char);
        }
        // drop the synthetic leading pad digit
        Imei(digits[1..].to_string())
    }
}

impl std::fmt::Display for Imei {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A GPS fix pushed into the engine by the GPS-source collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub ts_utc: DateTime<Utc>,
    pub gps_valid: bool,
    pub satellites: u8,
}

impl Position {
    pub fn new(lat_deg: f64, lon_deg: f64, speed_kmh: f64, course_deg: f64, ts_utc: DateTime<Utc>, gps_valid: bool) -> Self {
        Self {
            lat_deg,
            lon_deg,
            speed_kmh,
            course_deg,
            ts_utc,
            gps_valid,
            satellites: 8,
        }
    }
}

/// Observable state of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    LoggingIn,
    Online,
    Error,
}

/// Kinds of alarm reported over protocol 0x16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmKind {
    Sos,
    PowerCut,
    Shock,
    Geofence,
    LowBattery,
    Other(u8),
}

impl AlarmKind {
    pub fn code(self) -> u8 {
        match self {
            AlarmKind::Sos => 0x01,
            AlarmKind::PowerCut => 0x02,
            AlarmKind::Shock => 0x03,
            AlarmKind::Geofence => 0x04,
            AlarmKind::LowBattery => 0x05,
            AlarmKind::Other(code) => code,
        }
    }
}

/// Per-session counters, reset at `connect()`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub heartbeats_ok: u64,
    pub locations_ok: u64,
    pub commands_received: u64,
    pub last_activity_ts: Option<DateTime<Utc>>,
}

impl Counters {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_ts = Some(now);
    }
}

/// Bridge-side observable state, mirroring the per-session client
/// counters for the serial link instead of the network link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeState {
    pub serial_connected: bool,
    pub last_line_rx: Option<String>,
    pub last_line_tx: Option<String>,
    pub commands_received: u64,
    pub commands_forwarded: u64,
    pub responses_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imei_normalize_pads_short() {
        let imei = Imei::normalize("12345").unwrap();
        assert_eq!(imei.as_str(), "000000000012345");
    }

    #[test]
    fn imei_normalize_truncates_long() {
        let imei = Imei::normalize("1234567890123456789").unwrap();
        assert_eq!(imei.as_str().len(), 15);
    }

    #[test]
    fn imei_bcd_round_trip() {
        let imei = Imei::normalize("356932080000000").unwrap();
        let bcd = imei.to_bcd();
        assert_eq!(bcd, [0x03, 0x56, 0x93, 0x20, 0x80, 0x00, 0x00, 0x00]);
        assert_eq!(Imei::from_bcd(&bcd).as_str(), "356932080000000");
    }

    #[test]
    fn imei_rejects_non_digits() {
        assert!(Imei::normalize("").is_err());
    }
}
