//! Error taxonomy for the GT06 engine.
//!
//! Only [`ConfigError`] is ever returned synchronously out of a public
//! entry point; every other variant is recoverable and is surfaced as an
//! [`crate::event::Event`] instead of propagated to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Gt06Error>;

#[derive(Debug, Error)]
pub enum Gt06Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IMEI must be 15 decimal digits, got {0:?}")]
    InvalidImei(String),

    #[error("port {0} out of range 1..=65535")]
    InvalidPort(u32),

    #[error("heartbeat_seconds {0} out of range 5..=300")]
    InvalidHeartbeatInterval(u32),

    #[error("location_seconds {0} out of range 5..=3600")]
    InvalidLocationInterval(u32),

    #[error("host must not be empty")]
    EmptyHost,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("socket closed by peer")]
    Closed,

    #[error("read failed: {0}")]
    Read(std::io::Error),

    #[error("write failed: {0}")]
    Write(std::io::Error),

    #[error("login timed out waiting for LOGIN-ACK")]
    LoginTimeout,
}

/// Reassembler desync conditions. Never propagated out of
/// [`crate::reassembler::FrameReassembler`] — each one is recovered
/// in-place (drop a byte, resync) and only ever reaches a `tracing::warn!`
/// call, never a `Result`.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("start marker not found after discarding {0} noise bytes")]
    StartMarkerNotFound(usize),

    #[error("stop marker mismatch at offset {0}, resyncing")]
    StopMarkerMismatch(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame too short: need at least {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("declared text_len {declared} exceeds remaining payload {available}")]
    TextLenOverflow { declared: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("serial link is not open")]
    NotOpen,

    #[error("serial write failed: {0}")]
    WriteFailed(std::io::Error),
}
