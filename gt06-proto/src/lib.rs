//! GT06 (Concox) tracker protocol codec, client/server state machines,
//! and serial command bridge.
//!
//! Module map:
//! - [`codec`] — C1, bit-exact frame encode/decode.
//! - [`reassembler`] — C2, byte-stream to whole-frame reassembly.
//! - [`counter`] — C3, the per-session serial counter and GT06 datetime field.
//! - [`client`] — C4, the outbound tracker connection lifecycle.
//! - [`server`] — C5, the inbound tracker listener.
//! - [`bridge`] — C6, command-to-serial-line translation.

pub mod bridge;
pub mod client;
pub mod codec;
pub mod config;
pub mod counter;
pub mod error;
pub mod event;
pub mod model;
pub mod reassembler;
pub mod server;

pub use client::{channel, ClientCommand, ClientEngine, ClientHandle, StopReason};
pub use codec::{CommandFrame, Frame};
pub use config::{ClientConfig, ServerConfig};
pub use error::{BridgeError, ConfigError, DecodeError, FramingError, Gt06Error, Result, TransportError};
pub use event::{Event, EventLog, EventRecord};
pub use model::{AlarmKind, BridgeState, ClientState, Counters, Imei, Position};
pub use reassembler::FrameReassembler;
pub use server::{serve, ServerConnection, ServerEvent};
