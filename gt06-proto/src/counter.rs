//! C3: the per-session serial counter and the UTC clock source used for
//! GT06 timestamp fields.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Session-local monotonic serial number. Starts at 1, wraps `65535 -> 1`,
/// never yields 0 — 0 is reserved as the pre-first-frame sentinel value.
#[derive(Debug, Clone, Copy)]
pub struct SerialCounter(u16);

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCounter {
    pub fn new() -> Self {
        SerialCounter(0)
    }

    /// Advances the counter and returns the newly assigned serial.
    pub fn next(&mut self) -> u16 {
        self.0 = if self.0 == 65535 { 1 } else { self.0 + 1 };
        self.0
    }

    pub fn current(&self) -> u16 {
        self.0
    }
}

/// Encodes a UTC timestamp into the six-byte `YY MM DD hh mm ss` field used
/// by LOCATION and ALARM frames.
pub fn encode_datetime(ts: DateTime<Utc>) -> [u8; 6] {
    [
        (ts.year() % 100) as u8,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
    ]
}

/// Decodes the six-byte `YY MM DD hh mm ss` field, assuming the 2000s.
pub fn decode_datetime(bytes: [u8; 6]) -> Option<DateTime<Utc>> {
    use chrono::{NaiveDate, TimeZone};
    let year = 2000 + bytes[0] as i32;
    let naive = NaiveDate::from_ymd_opt(year, bytes[1] as u32, bytes[2] as u32)?
        .and_hms_opt(bytes[3] as u32, bytes[4] as u32, bytes[5] as u32)?;
    Some(Utc.from_utc_datetime(&naive))
}
