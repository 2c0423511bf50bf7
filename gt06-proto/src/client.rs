//! C4: the client connection lifecycle — connect, login, heartbeat/location
//! cadence, command dispatch, disconnect, reconnect.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::codec::{self, CommandFrame, Frame, LocationFields, PROTO_COMMAND, PROTO_COMMAND_RESPONSE,
    PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};
use crate::config::ClientConfig;
use crate::error::{Gt06Error, TransportError};
use crate::event::{Event, EventLog};
use crate::model::{AlarmKind, ClientState, Counters, Position};
use crate::reassembler::FrameReassembler;
use crate::counter::SerialCounter;

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const READ_BUF_SIZE: usize = 1024;

/// Commands a host (GPS source, command UI, or the bridge fan-out) may
/// send into a running client. The engine never exposes its socket
/// directly — all interaction crosses this mailbox.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    SendPosition(Position),
    SendAlarm(AlarmKind, Position),
    Disconnect,
}

/// A cheaply-clonable handle used by collaborators to drive a running
/// [`ClientEngine`] without touching its internals.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    pub fn send_position(&self, pos: Position) {
        let _ = self.tx.send(ClientCommand::SendPosition(pos));
    }

    pub fn send_alarm(&self, kind: AlarmKind, pos: Position) {
        let _ = self.tx.send(ClientCommand::SendAlarm(kind, pos));
    }

    pub fn disconnect(&self) {
        let _ = self.tx.send(ClientCommand::Disconnect);
    }
}

pub fn channel() -> (ClientHandle, mpsc::UnboundedReceiver<ClientCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle { tx }, rx)
}

/// Why [`ClientEngine::run`] returned, for a CLI wrapper picking an exit
/// code (`0` on a clean disconnect, `4` once reconnection has given up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `disconnect()`/`ClientCommand::Disconnect` was requested.
    Disconnected,
    /// `max_reconnect_attempts` was reached without reaching `Online`.
    ReconnectAttemptsExhausted,
}

pub struct ClientEngine {
    config: ClientConfig,
    state: ClientState,
    counters: Counters,
    events: EventLog,
    serial: SerialCounter,
    should_be_connected: bool,
    reconnect_attempts: u32,
    command_sink: Option<mpsc::UnboundedSender<CommandFrame>>,
}

impl ClientEngine {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            counters: Counters::default(),
            events: EventLog::new(),
            serial: SerialCounter::new(),
            should_be_connected: false,
            reconnect_attempts: 0,
            command_sink: None,
        }
    }

    /// Registers the sink that decoded inbound commands (proto 0x80) are
    /// fanned out to, typically the bridge (C6).
    pub fn set_command_sink(&mut self, tx: mpsc::UnboundedSender<CommandFrame>) {
        self.command_sink = Some(tx);
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    fn transition(&mut self, to: ClientState) {
        self.state = to;
        let ev = match to {
            ClientState::Disconnected => Event::Disconnected,
            ClientState::Connecting => Event::Connecting,
            ClientState::Connected => Event::Connected,
            ClientState::LoggingIn => Event::LoggingIn,
            ClientState::Online => Event::Online,
            ClientState::Error => Event::Error { msg: "unrecoverable configuration".into() },
        };
        self.events.push(chrono::Utc::now(), ev);
    }

    fn touch(&mut self, frame: &Frame) {
        self.counters.touch(chrono::Utc::now());
        self.counters.packets_received += 1;
        if !frame.checksum_ok {
            self.events.push(
                chrono::Utc::now(),
                Event::Warning { msg: format!("checksum mismatch on proto 0x{:02X} serial {}", frame.protocol, frame.serial) },
            );
        }
        self.events.push(
            chrono::Utc::now(),
            Event::PacketReceived { proto: frame.protocol, len: frame.raw.len(), hex: hex_string(&frame.raw) },
        );
    }

    async fn write_raw<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S, proto: u8, raw: &[u8]) -> Result<(), Gt06Error> {
        stream.write_all(raw).await.map_err(TransportError::Write)?;
        self.counters.packets_sent += 1;
        self.events.push(
            chrono::Utc::now(),
            Event::PacketSent { proto, len: raw.len(), hex: hex_string(raw) },
        );
        Ok(())
    }

    async fn send_heartbeat<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S) -> Result<(), Gt06Error> {
        let serial = self.serial.next();
        let fields = codec::HeartbeatFields { voltage_level: 4, gsm_signal: 3, ..Default::default() };
        let raw = codec::encode_heartbeat(&fields, serial);
        self.write_raw(stream, PROTO_HEARTBEAT, &raw).await
    }

    async fn send_location<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S, pos: Position) -> Result<(), Gt06Error> {
        let serial = self.serial.next();
        let fields = LocationFields {
            ts: pos.ts_utc,
            satellites: pos.satellites,
            lat_deg: pos.lat_deg,
            lon_deg: pos.lon_deg,
            speed_kmh: pos.speed_kmh,
            course_deg: pos.course_deg,
            gps_valid: pos.gps_valid,
        };
        let raw = codec::encode_location(&fields, serial);
        self.write_raw(stream, PROTO_LOCATION, &raw).await
    }

    async fn send_alarm<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S, kind: AlarmKind, pos: Position) -> Result<(), Gt06Error> {
        let serial = self.serial.next();
        let fields = LocationFields {
            ts: pos.ts_utc,
            satellites: pos.satellites,
            lat_deg: pos.lat_deg,
            lon_deg: pos.lon_deg,
            speed_kmh: pos.speed_kmh,
            course_deg: pos.course_deg,
            gps_valid: pos.gps_valid,
        };
        let raw = codec::encode_alarm(&fields, kind.code(), 0, serial);
        self.write_raw(stream, codec::PROTO_ALARM, &raw).await
    }

    fn handle_command_not_online(&mut self, what: &str) {
        self.events.push(chrono::Utc::now(), Event::Warning { msg: format!("{what} dropped: not online") });
    }

    /// Runs a single connection attempt to completion: LOGIN, wait for
    /// LOGIN-ACK (30s timeout), then the Online dispatch/timer loop,
    /// until the peer closes, an I/O error occurs, or `Disconnect` is
    /// received. The stream is assumed already TCP-connected.
    pub async fn run_session<S>(
        &mut self,
        mut stream: S,
        inbound: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> Result<(), Gt06Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        self.transition(ClientState::Connected);

        let serial = self.serial.next();
        let login_raw = codec::encode_login(&self.config.imei, serial);
        self.write_raw(&mut stream, PROTO_LOGIN, &login_raw).await?;
        self.transition(ClientState::LoggingIn);

        let mut reassembler = FrameReassembler::new();
        let mut buf = [0u8; READ_BUF_SIZE];

        let login_result = timeout(LOGIN_TIMEOUT, async {
            loop {
                tokio::select! {
                    n = stream.read(&mut buf) => {
                        let n = n.map_err(TransportError::Read)?;
                        if n == 0 {
                            return Err(Gt06Error::Transport(TransportError::Closed));
                        }
                        reassembler.feed(&buf[..n]);
                        for frame in reassembler.drain_frames().map_err(Gt06Error::Decode)? {
                            self.touch(&frame);
                            if frame.protocol == PROTO_LOGIN {
                                return Ok(());
                            }
                        }
                    }
                    cmd = inbound.recv() => {
                        match cmd {
                            Some(ClientCommand::Disconnect) | None => {
                                return Err(Gt06Error::Transport(TransportError::Closed));
                            }
                            Some(_) => self.handle_command_not_online("command"),
                        }
                    }
                }
            }
        })
        .await;

        match login_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.transition(ClientState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                self.events.push(chrono::Utc::now(), Event::Warning { msg: "login timed out".into() });
                self.transition(ClientState::Disconnected);
                return Err(Gt06Error::Transport(TransportError::LoginTimeout));
            }
        }

        self.transition(ClientState::Online);
        self.reconnect_attempts = 0;

        let mut heartbeat_timer = tokio::time::interval(Duration::from_secs(self.config.heartbeat_seconds as u64));
        let mut location_timer = tokio::time::interval(Duration::from_secs(self.config.location_seconds as u64));
        let mut last_position: Option<Position> = None;

        let result: Result<(), Gt06Error> = 'session: loop {
            tokio::select! {
                n = stream.read(&mut buf) => {
                    let n = match n {
                        Ok(n) => n,
                        Err(e) => break 'session Err(Gt06Error::Transport(TransportError::Read(e))),
                    };
                    if n == 0 {
                        break 'session Err(Gt06Error::Transport(TransportError::Closed));
                    }
                    reassembler.feed(&buf[..n]);
                    let frames = match reassembler.drain_frames() {
                        Ok(f) => f,
                        Err(e) => break 'session Err(Gt06Error::Decode(e)),
                    };
                    for frame in frames {
                        self.touch(&frame);
                        if let Err(e) = self.dispatch_online(&mut stream, frame).await {
                            break 'session Err(e);
                        }
                    }
                }
                _ = heartbeat_timer.tick() => {
                    if let Err(e) = self.send_heartbeat(&mut stream).await {
                        break 'session Err(e);
                    }
                }
                _ = location_timer.tick() => {
                    if let Some(pos) = last_position {
                        if let Err(e) = self.send_location(&mut stream, pos).await {
                            break 'session Err(e);
                        }
                    }
                }
                cmd = inbound.recv() => {
                    match cmd {
                        Some(ClientCommand::SendPosition(pos)) => {
                            last_position = Some(pos);
                        }
                        Some(ClientCommand::SendAlarm(kind, pos)) => {
                            if let Err(e) = self.send_alarm(&mut stream, kind, pos).await {
                                break 'session Err(e);
                            }
                        }
                        Some(ClientCommand::Disconnect) | None => {
                            self.should_be_connected = false;
                            break 'session Ok(());
                        }
                    }
                }
            }
        };

        self.transition(ClientState::Disconnected);
        result
    }

    async fn dispatch_online<S: AsyncWriteExt + Unpin>(&mut self, stream: &mut S, frame: Frame) -> Result<(), Gt06Error> {
        match frame.protocol {
            PROTO_HEARTBEAT => {
                self.counters.heartbeats_ok += 1;
                self.events.push(chrono::Utc::now(), Event::HeartbeatAck);
            }
            PROTO_LOCATION => {
                self.counters.locations_ok += 1;
                self.events.push(chrono::Utc::now(), Event::LocationAck);
            }
            PROTO_COMMAND => {
                self.counters.commands_received += 1;
                let cmd = codec::decode_command_frame(&frame.content).map_err(Gt06Error::Decode)?;
                self.events.push(chrono::Utc::now(), Event::CommandReceived { text: cmd.payload.clone() });

                let ack_serial = self.serial.next();
                let ack_text = format!("CMD OK:{}", cmd.payload);
                let ack_raw = codec::encode_command_response(&ack_text, ack_serial);
                self.write_raw(stream, PROTO_COMMAND_RESPONSE, &ack_raw).await?;
                self.events.push(chrono::Utc::now(), Event::CommandAck);

                if let Some(sink) = &self.command_sink {
                    let _ = sink.send(cmd);
                }
            }
            PROTO_COMMAND_RESPONSE => {
                self.events.push(chrono::Utc::now(), Event::CommandAck);
            }
            other => {
                let ack_raw = codec::encode_ack(other, 0x00, frame.serial);
                self.write_raw(stream, other, &ack_raw).await?;
            }
        }
        Ok(())
    }

    /// Production entry point: owns TCP connect, the 30s connect
    /// timeout, and the fixed-delay reconnect policy. Runs until
    /// `Disconnect` is received or `max_reconnect_attempts` is exhausted.
    pub async fn run(&mut self, inbound: &mut mpsc::UnboundedReceiver<ClientCommand>) -> StopReason {
        self.should_be_connected = true;
        let addr = format!("{}:{}", self.config.host, self.config.port);

        while self.should_be_connected {
            self.transition(ClientState::Connecting);

            let connect_attempt = timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(&addr));
            tokio::select! {
                result = connect_attempt => {
                    match result {
                        Ok(Ok(stream)) => {
                            if let Err(e) = self.run_session(stream, inbound).await {
                                self.events.push(chrono::Utc::now(), Event::Error { msg: e.to_string() });
                            }
                        }
                        Ok(Err(e)) => {
                            self.events.push(
                                chrono::Utc::now(),
                                Event::Error { msg: TransportError::ConnectFailed { addr: addr.clone(), source: e }.to_string() },
                            );
                            self.transition(ClientState::Disconnected);
                        }
                        Err(_) => {
                            self.events.push(
                                chrono::Utc::now(),
                                Event::Error { msg: TransportError::ConnectTimeout(addr.clone()).to_string() },
                            );
                            self.transition(ClientState::Disconnected);
                        }
                    }
                }
                cmd = inbound.recv() => {
                    match cmd {
                        Some(ClientCommand::Disconnect) | None => {
                            self.should_be_connected = false;
                            self.transition(ClientState::Disconnected);
                            return StopReason::Disconnected;
                        }
                        Some(_) => self.handle_command_not_online("command"),
                    }
                }
            }

            if !self.should_be_connected {
                break;
            }

            self.reconnect_attempts += 1;
            if self.config.max_reconnect_attempts > 0
                && self.reconnect_attempts as i32 >= self.config.max_reconnect_attempts
            {
                self.events.push(chrono::Utc::now(), Event::Warning { msg: "max reconnect attempts exhausted".into() });
                return StopReason::ReconnectAttemptsExhausted;
            }
            tokio::time::sleep(Duration::from_secs(self.config.reconnect_seconds as u64)).await;
        }
        StopReason::Disconnected
    }

    /// Cancels timers/reads in progress and closes the session. Modeled
    /// as sending [`ClientCommand::Disconnect`] through the mailbox;
    /// callers normally use [`ClientHandle::disconnect`].
    pub fn disconnect(&mut self) {
        self.should_be_connected = false;
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
