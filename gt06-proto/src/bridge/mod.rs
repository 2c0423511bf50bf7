//! C6: translates decoded inbound commands into a line-oriented serial
//! protocol and interprets the microcontroller's text replies as events.

pub mod mapping;
pub mod serial;

use crate::codec::CommandFrame;
use crate::error::BridgeError;
use crate::event::{Event, EventLog};
use crate::model::BridgeState;
use mapping::{classify_reply, map_output_command, map_text_command, ReplyKind};
use serial::SerialTransport;
use tokio::sync::mpsc;

/// The OUTPUT pseudo-command's subtype on protocol 0x80.
pub const SUBTYPE_OUTPUT: u8 = 0x80;
/// The plain ASCII text subtype on protocol 0x80/0x21.
pub const SUBTYPE_TEXT: u8 = 0x01;

pub struct Bridge<T: SerialTransport> {
    transport: T,
    state: BridgeState,
    events: EventLog,
}

impl<T: SerialTransport> Bridge<T> {
    pub fn new(transport: T) -> Self {
        let serial_connected = transport.is_open();
        Self { transport, state: BridgeState { serial_connected, ..Default::default() }, events: EventLog::new() }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn clear_stats(&mut self) {
        self.state.commands_received = 0;
        self.state.commands_forwarded = 0;
        self.state.responses_received = 0;
    }

    /// Translates and forwards one decoded command. Attempts one
    /// synchronous reconnect if the link is closed; never buffers
    /// commands across reconnects — a command that arrives while the
    /// link is down and fails to reconnect is dropped, not queued.
    pub async fn handle_command(&mut self, cmd: &CommandFrame) -> Result<(), BridgeError> {
        self.state.commands_received += 1;
        let line = translate(cmd);

        if !self.transport.is_open() {
            if self.transport.reconnect().await.is_ok() {
                self.state.serial_connected = true;
                self.events.push(chrono::Utc::now(), Event::BridgeConnected);
            } else {
                self.state.serial_connected = false;
                self.events.push(chrono::Utc::now(), Event::BridgeDisconnected);
                self.events.push(chrono::Utc::now(), Event::Error { msg: "serial link not open, command dropped".into() });
                return Err(BridgeError::NotOpen);
            }
        }

        match self.transport.write_line(&line).await {
            Ok(()) => {
                self.state.last_line_tx = Some(line.clone());
                self.state.commands_forwarded += 1;
                self.events.push(chrono::Utc::now(), Event::BridgeTx { line });
                Ok(())
            }
            Err(e) => {
                self.state.serial_connected = false;
                self.events.push(chrono::Utc::now(), Event::Error { msg: format!("serial write failed: {e}") });
                Err(BridgeError::WriteFailed(e))
            }
        }
    }

    /// Reads one reply line (if any is waiting) and classifies it,
    /// pushing the corresponding event. Returns `Ok(None)` when nothing
    /// was read, `Ok(Some(kind))` on a classified line, `Err` on EOF.
    pub async fn poll_reply(&mut self) -> Result<Option<ReplyKind>, BridgeError> {
        match self.transport.read_line().await {
            Ok(Some(line)) => {
                self.state.last_line_rx = Some(line.clone());
                self.state.responses_received += 1;
                self.events.push(chrono::Utc::now(), Event::BridgeRx { line: line.clone() });
                Ok(Some(classify_reply(&line)))
            }
            Ok(None) => {
                self.state.serial_connected = false;
                self.events.push(chrono::Utc::now(), Event::BridgeDisconnected);
                Ok(None)
            }
            Err(e) => {
                self.events.push(chrono::Utc::now(), Event::Error { msg: format!("serial read failed: {e}") });
                Err(BridgeError::WriteFailed(e))
            }
        }
    }

    /// Drives the bridge for the lifetime of the mailbox: forwards each
    /// incoming [`CommandFrame`] and concurrently drains reply lines,
    /// until `commands` is closed.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<CommandFrame>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            let _ = self.handle_command(&cmd).await;
                        }
                        None => break,
                    }
                }
                reply = self.poll_reply() => {
                    let _ = reply;
                }
            }
        }
    }
}

/// Picks the text or structured mapping table based on the command's
/// subtype.
fn translate(cmd: &CommandFrame) -> String {
    if cmd.subtype == SUBTYPE_OUTPUT {
        if let Some((output, state)) = parse_output_payload(&cmd.payload) {
            return map_output_command(output, state);
        }
    }
    map_text_command(&cmd.payload)
}

/// Parses an `output=N, state=S` structured payload.
fn parse_output_payload(payload: &str) -> Option<(u8, u8)> {
    let mut output = None;
    let mut state = None;
    for part in payload.split(',') {
        let mut kv = part.splitn(2, '=');
        let key = kv.next()?.trim().to_ascii_lowercase();
        let value = kv.next()?.trim();
        match key.as_str() {
            "output" => output = value.parse().ok(),
            "state" => state = value.parse().ok(),
            _ => {}
        }
    }
    Some((output?, state?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_command_frame;
    use serial::mock::MockSerialHandle;

    fn text_command(text: &str) -> CommandFrame {
        let mut content = vec![0x00, 0x01];
        content.extend_from_slice(&(text.len() as u16).to_be_bytes());
        content.extend_from_slice(text.as_bytes());
        decode_command_frame(&content).unwrap()
    }

    fn output_command(output: u8, state: u8) -> CommandFrame {
        let payload = format!("output={output}, state={state}");
        let mut content = vec![0x00, SUBTYPE_OUTPUT];
        content.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        content.extend_from_slice(payload.as_bytes());
        decode_command_frame(&content).unwrap()
    }

    #[tokio::test]
    async fn stop_command_forwards_bloquear_line() {
        let (handle, other) = MockSerialHandle::new();
        let mut bridge = Bridge::new(other);
        bridge.handle_command(&text_command("STOP")).await.unwrap();
        assert_eq!(handle.sent_lines().await, vec!["CMD:BLOQUEAR".to_string()]);
        assert_eq!(bridge.state().commands_forwarded, 1);
    }

    #[tokio::test]
    async fn output_command_maps_to_engine_stop() {
        let (handle, other) = MockSerialHandle::new();
        let mut bridge = Bridge::new(other);
        bridge.handle_command(&output_command(1, 1)).await.unwrap();
        assert_eq!(handle.sent_lines().await, vec!["ENGINE_STOP".to_string()]);
    }

    #[tokio::test]
    async fn closed_link_with_failing_reconnect_drops_command() {
        let (handle, other) = MockSerialHandle::new();
        handle.set_open(false).await;
        handle.set_reconnect_ok(false).await;
        let mut bridge = Bridge::new(other);
        let result = bridge.handle_command(&text_command("STOP")).await;
        assert!(matches!(result, Err(BridgeError::NotOpen)));
        assert_eq!(bridge.state().commands_forwarded, 0);
        assert!(handle.sent_lines().await.is_empty());
    }

    #[tokio::test]
    async fn closed_link_auto_reconnects_then_forwards() {
        let (handle, other) = MockSerialHandle::new();
        handle.set_open(false).await;
        let mut bridge = Bridge::new(other);
        bridge.handle_command(&text_command("STOP")).await.unwrap();
        assert_eq!(handle.sent_lines().await, vec!["CMD:BLOQUEAR".to_string()]);
    }

    #[test]
    fn output_payload_parses_either_order() {
        assert_eq!(parse_output_payload("output=1, state=0"), Some((1, 0)));
        assert_eq!(parse_output_payload("state=1,output=2"), Some((2, 1)));
        assert_eq!(parse_output_payload("garbage"), None);
    }
}
