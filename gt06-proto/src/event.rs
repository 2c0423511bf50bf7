//! Observability surface: the structured [`Event`] enum the engine emits
//! for every lifecycle transition, packet, and bridge action, plus the
//! bounded [`EventLog`] ring buffer that records them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cap on [`EventLog`] entries; oldest entries are evicted first.
pub const EVENT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Connecting,
    Connected,
    LoggingIn,
    Online,
    Disconnected,
    Error { msg: String },

    PacketSent { proto: u8, len: usize, hex: String },
    PacketReceived { proto: u8, len: usize, hex: String },

    HeartbeatAck,
    LocationAck,
    CommandReceived { text: String },
    CommandAck,

    Warning { msg: String },

    BridgeConnected,
    BridgeDisconnected,
    BridgeTx { line: String },
    BridgeRx { line: String },
}

impl Event {
    /// Mirrors the event back as a `tracing` record at an appropriate
    /// level, in addition to being pushed onto the [`EventLog`].
    pub fn trace(&self) {
        match self {
            Event::Error { msg } => tracing::error!(msg = %msg, "gt06_error"),
            Event::Warning { msg } => tracing::warn!(msg = %msg, "gt06_warning"),
            Event::Connecting => tracing::info!("gt06_connecting"),
            Event::Connected => tracing::info!("gt06_connected"),
            Event::LoggingIn => tracing::info!("gt06_logging_in"),
            Event::Online => tracing::info!("gt06_online"),
            Event::Disconnected => tracing::info!("gt06_disconnected"),
            Event::PacketSent { proto, len, hex } => {
                tracing::debug!(proto = format_args!("0x{:02X}", proto), len, hex = %hex, "gt06_packet_sent")
            }
            Event::PacketReceived { proto, len, hex } => {
                tracing::debug!(proto = format_args!("0x{:02X}", proto), len, hex = %hex, "gt06_packet_received")
            }
            Event::HeartbeatAck => tracing::debug!("gt06_heartbeat_ack"),
            Event::LocationAck => tracing::debug!("gt06_location_ack"),
            Event::CommandReceived { text } => tracing::info!(text = %text, "gt06_command_received"),
            Event::CommandAck => tracing::debug!("gt06_command_ack"),
            Event::BridgeConnected => tracing::info!("gt06_bridge_connected"),
            Event::BridgeDisconnected => tracing::warn!("gt06_bridge_disconnected"),
            Event::BridgeTx { line } => tracing::debug!(line = %line, "gt06_bridge_tx"),
            Event::BridgeRx { line } => tracing::debug!(line = %line, "gt06_bridge_rx"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
    pub detail: Option<String>,
}

/// Bounded ring buffer of [`EventRecord`]s; oldest-evicted at
/// [`EVENT_LOG_CAPACITY`].
#[derive(Debug, Default)]
pub struct EventLog {
    buf: VecDeque<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { buf: VecDeque::with_capacity(EVENT_LOG_CAPACITY) }
    }

    pub fn push(&mut self, ts: DateTime<Utc>, event: Event) {
        event.trace();
        if self.buf.len() == EVENT_LOG_CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(EventRecord { ts, event, detail: None });
    }

    pub fn push_with_detail(&mut self, ts: DateTime<Utc>, event: Event, detail: impl Into<String>) {
        event.trace();
        if self.buf.len() == EVENT_LOG_CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(EventRecord { ts, event, detail: Some(detail.into()) });
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.buf.iter()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.buf.back()
    }
}
