//! C5: accepts inbound GT06 tracker connections and ACKs them
//! per-protocol.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::codec::{self, Frame, PROTO_ALARM, PROTO_COMMAND, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};
use crate::config::ServerConfig;
use crate::counter::decode_datetime;
use crate::error::{Gt06Error, TransportError};
use crate::event::{Event, EventLog};
use crate::model::Position;
use crate::reassembler::FrameReassembler;
use serde::Serialize;

const READ_BUF_SIZE: usize = 1024;

/// What a connection handler surfaces upstream to the owning server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerEvent {
    Login { peer: String, imei: String },
    Position { peer: String, pos: Position },
    Alarm { peer: String, pos: Position, alarm_type: u8 },
    Command { peer: String, text: String },
    Warning { peer: String, msg: String },
}

/// One accepted tracker connection: its own reassembler and ACK dispatch.
/// ACK serials echo the request rather than drawing from a
/// connection-owned counter, so no `SerialCounter` is kept here.
pub struct ServerConnection {
    peer: String,
    logged_in: bool,
    events: EventLog,
}

impl ServerConnection {
    fn new(peer: String) -> Self {
        Self { peer, logged_in: false, events: EventLog::new() }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Runs the per-connection dispatch loop until the peer closes or an
    /// I/O error occurs. Tolerant of partial/coalesced reads and of
    /// frames arriving before a LOGIN.
    pub async fn run<S>(&mut self, mut stream: S, upstream: mpsc::UnboundedSender<ServerEvent>) -> Result<(), Gt06Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut reassembler = FrameReassembler::new();
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            let n = stream.read(&mut buf).await.map_err(TransportError::Read)?;
            if n == 0 {
                return Ok(());
            }
            reassembler.feed(&buf[..n]);
            for frame in reassembler.drain_frames().map_err(Gt06Error::Decode)? {
                self.dispatch(&mut stream, frame, &upstream).await?;
            }
        }
    }

    async fn dispatch<S: AsyncWriteExt + Unpin>(
        &mut self,
        stream: &mut S,
        frame: Frame,
        upstream: &mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<(), Gt06Error> {
        if !frame.checksum_ok {
            self.events.push(chrono::Utc::now(), Event::Warning { msg: format!("checksum mismatch on proto 0x{:02X}", frame.protocol) });
        }
        if !self.logged_in && frame.protocol != PROTO_LOGIN {
            self.events.push(chrono::Utc::now(), Event::Warning { msg: format!("proto 0x{:02X} received before LOGIN", frame.protocol) });
        }

        match frame.protocol {
            PROTO_LOGIN => {
                self.logged_in = true;
                let imei = if frame.content.len() == 8 {
                    let bytes: [u8; 8] = frame.content.clone().try_into().unwrap();
                    crate::model::Imei::from_bcd(&bytes).as_str().to_string()
                } else {
                    String::new()
                };
                self.ack(stream, PROTO_LOGIN, 0x00, frame.serial).await?;
                self.events.push(chrono::Utc::now(), Event::Connected);
                let _ = upstream.send(ServerEvent::Login { peer: self.peer.clone(), imei });
            }
            PROTO_HEARTBEAT => {
                self.ack(stream, PROTO_HEARTBEAT, 0x00, frame.serial).await?;
                self.events.push(chrono::Utc::now(), Event::HeartbeatAck);
            }
            PROTO_LOCATION => {
                self.ack(stream, PROTO_LOCATION, 0x00, frame.serial).await?;
                if let Some(pos) = decode_location_content(&frame.content) {
                    let _ = upstream.send(ServerEvent::Position { peer: self.peer.clone(), pos });
                }
                self.events.push(chrono::Utc::now(), Event::LocationAck);
            }
            PROTO_ALARM => {
                self.ack(stream, PROTO_ALARM, 0x00, frame.serial).await?;
                if let Some((pos, alarm_type)) = decode_alarm_content(&frame.content) {
                    let _ = upstream.send(ServerEvent::Alarm { peer: self.peer.clone(), pos, alarm_type });
                }
            }
            PROTO_COMMAND => {
                match codec::decode_command_frame(&frame.content) {
                    Ok(cmd) => {
                        let reply = codec::encode_command_response(&cmd.payload, frame.serial);
                        stream.write_all(&reply).await.map_err(TransportError::Write)?;
                        self.events.push(chrono::Utc::now(), Event::CommandReceived { text: cmd.payload.clone() });
                        let _ = upstream.send(ServerEvent::Command { peer: self.peer.clone(), text: cmd.payload });
                    }
                    Err(e) => {
                        self.events.push(chrono::Utc::now(), Event::Warning { msg: format!("bad command frame: {e}") });
                    }
                }
            }
            other => {
                self.ack(stream, other, 0x00, frame.serial).await?;
                self.events.push(chrono::Utc::now(), Event::Warning { msg: format!("unknown protocol 0x{other:02X}, ACKed anyway") });
                let _ = upstream.send(ServerEvent::Warning { peer: self.peer.clone(), msg: format!("unknown protocol 0x{other:02X}") });
            }
        }
        Ok(())
    }

    async fn ack<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S, proto: u8, status: u8, request_serial: u16) -> Result<(), Gt06Error> {
        let raw = codec::encode_ack(proto, status, request_serial);
        stream.write_all(&raw).await.map_err(TransportError::Write)?;
        Ok(())
    }
}

fn decode_location_content(content: &[u8]) -> Option<Position> {
    if content.len() < 18 {
        return None;
    }
    let ts = decode_datetime(content[0..6].try_into().ok()?)?;
    let satellites = content[6];
    let lat_raw = u32::from_be_bytes(content[7..11].try_into().ok()?);
    let lon_raw = u32::from_be_bytes(content[11..15].try_into().ok()?);
    let speed = content[15] as f64;
    let status_word = u16::from_be_bytes(content[16..18].try_into().ok()?);
    let status = codec::CourseStatus::decode(status_word);
    Some(Position {
        lat_deg: codec::decode_coord(lat_raw, status.south),
        lon_deg: codec::decode_coord(lon_raw, status.west),
        speed_kmh: speed,
        course_deg: status.course_deg,
        ts_utc: ts,
        gps_valid: status.gps_valid,
        satellites,
    })
}

fn decode_alarm_content(content: &[u8]) -> Option<(Position, u8)> {
    if content.len() < 23 {
        return None;
    }
    let ts = decode_datetime(content[0..6].try_into().ok()?)?;
    let alarm_type = content[6];
    let satellites = content[7];
    let lat_raw = u32::from_be_bytes(content[8..12].try_into().ok()?);
    let lon_raw = u32::from_be_bytes(content[12..16].try_into().ok()?);
    let speed = content[16] as f64;
    let status_word = u16::from_be_bytes(content[17..19].try_into().ok()?);
    let status = codec::CourseStatus::decode(status_word);
    let pos = Position {
        lat_deg: codec::decode_coord(lat_raw, status.south),
        lon_deg: codec::decode_coord(lon_raw, status.west),
        speed_kmh: speed,
        course_deg: status.course_deg,
        ts_utc: ts,
        gps_valid: status.gps_valid,
        satellites,
    };
    Some((pos, alarm_type))
}

/// Binds the configured port and spawns one [`ServerConnection`] task
/// per accepted peer.
pub async fn serve(config: ServerConfig, upstream: mpsc::UnboundedSender<ServerEvent>) -> Result<(), Gt06Error> {
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Gt06Error::Transport(TransportError::ConnectFailed { addr: addr.clone(), source: e }))?;
    tracing::info!(addr = %addr, "gt06_server_listening");

    loop {
        let (stream, peer_addr) = listener
            .accept()
            .await
            .map_err(|e| Gt06Error::Transport(TransportError::ConnectFailed { addr: addr.clone(), source: e }))?;
        let peer = peer_addr.to_string();
        let upstream = upstream.clone();
        tokio::spawn(async move {
            tracing::info!(peer = %peer, "gt06_peer_connected");
            let mut conn = ServerConnection::new(peer.clone());
            if let Err(e) = conn.run(stream, upstream).await {
                tracing::warn!(peer = %peer, error = %e, "gt06_peer_disconnected_with_error");
            } else {
                tracing::info!(peer = %peer, "gt06_peer_disconnected");
            }
        });
    }
}

/// Helper used by the CLI binary to accept exactly one connection off a
/// bound listener; mostly useful in tests that want deterministic
/// single-peer control.
pub async fn accept_one(listener: &TcpListener) -> Result<(TcpStream, String), Gt06Error> {
    let (stream, addr) = listener
        .accept()
        .await
        .map_err(|e| Gt06Error::Transport(TransportError::ConnectFailed { addr: "listener".into(), source: e }))?;
    Ok((stream, addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_location_content_round_trips_from_encoder() {
        use chrono::TimeZone;
        let fields = codec::LocationFields {
            ts: chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            satellites: 8,
            lat_deg: -23.55052,
            lon_deg: -46.63331,
            speed_kmh: 50.0,
            course_deg: 180.0,
            gps_valid: true,
        };
        let raw = codec::encode_location(&fields, 1);
        let frame = codec::decode_frame(&raw).unwrap();
        let pos = decode_location_content(&frame.content).unwrap();
        assert!(pos.lat_deg < 0.0);
        assert!(pos.lon_deg < 0.0);
        assert_eq!(pos.satellites, 8);
        assert!(pos.gps_valid);
    }
}
