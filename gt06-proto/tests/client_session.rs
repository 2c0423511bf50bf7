//! Integration tests driving [`gt06_proto::client::ClientEngine`] over a
//! real loopback `TcpStream`: happy login (S1), command fan-out (S3),
//! fragmented delivery (S4), checksum tolerance (S5), and reconnect
//! discipline (S6).

use std::time::Duration;

use gt06_proto::client::{channel, ClientEngine, StopReason};
use gt06_proto::codec::{self, PROTO_LOGIN};
use gt06_proto::config::ClientConfig;
use gt06_proto::model::Position;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = TcpStream::connect(addr);
    let accept = listener.accept();
    let (client_side, (server_side, _)) = tokio::join!(connect, accept);
    (client_side.unwrap(), server_side)
}

fn config() -> ClientConfig {
    ClientConfig::new("127.0.0.1", 5023, "123456789012345", 30, 60, 10, -1).unwrap()
}

/// S1: a fresh connection logs in, receives a LOGIN-ACK, and reaches
/// `Online` before any location/heartbeat traffic is sent.
#[tokio::test(start_paused = false)]
async fn happy_login_reaches_online() {
    let (client_stream, mut server_stream) = loopback_pair().await;
    let mut engine = ClientEngine::new(config());
    let (handle, mut inbound) = channel();

    let server_task = tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        assert_eq!(frame.protocol, PROTO_LOGIN);
        let ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        server_stream.write_all(&ack).await.unwrap();
        server_stream
    });

    let session = tokio::spawn(async move {
        let result = tokio::time::timeout(Duration::from_secs(5), engine.run_session(client_stream, &mut inbound));
        // Disconnect shortly after reaching Online so the session ends cleanly.
        result.await
    });

    // give the session a moment to process the ACK, then ask it to stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.disconnect();

    let outcome = session.await.unwrap().expect("run_session should complete within the timeout");
    assert!(outcome.is_ok(), "a clean Disconnect must not surface as an error");
    server_task.await.unwrap();
}

/// S3: an inbound COMMAND frame is ACKed with `CMD OK:<text>` and fanned
/// out to the registered command sink.
#[tokio::test]
async fn command_is_acked_and_fanned_out() {
    let (client_stream, mut server_stream) = loopback_pair().await;
    let mut engine = ClientEngine::new(config());
    let (handle, mut inbound) = channel();
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    engine.set_command_sink(cmd_tx);

    let server_task = tokio::spawn(async move {
        let mut buf = [0u8; 256];
        // LOGIN
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        let ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        server_stream.write_all(&ack).await.unwrap();

        // Push a COMMAND frame down to the client.
        let content = {
            let mut c = vec![0x00u8, 0x01];
            c.extend_from_slice(&4u16.to_be_bytes());
            c.extend_from_slice(b"STOP");
            c
        };
        let raw = build_command_frame(&content, 7);
        server_stream.write_all(&raw).await.unwrap();

        // Read back the CMD OK response.
        let n = server_stream.read(&mut buf).await.unwrap();
        let reply = codec::decode_frame(&buf[..n]).unwrap();
        let cmd = codec::decode_command_frame(&reply.content).unwrap();
        assert_eq!(cmd.payload, "CMD OK:STOP");
        server_stream
    });

    let session = tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), engine.run_session(client_stream, &mut inbound)).await
    });

    let fanned = tokio::time::timeout(Duration::from_secs(5), cmd_rx.recv()).await.unwrap().unwrap();
    assert_eq!(fanned.payload, "STOP");

    handle.disconnect();
    session.await.unwrap().unwrap().unwrap();
    server_task.await.unwrap();
}

/// S4: the server writes the LOGIN-ACK one byte at a time; the client's
/// reassembler must still recognize it as soon as the frame completes.
#[tokio::test]
async fn fragmented_login_ack_is_still_recognized() {
    let (client_stream, mut server_stream) = loopback_pair().await;
    let mut engine = ClientEngine::new(config());
    let (handle, mut inbound) = channel();

    let server_task = tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        let ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        for byte in ack {
            server_stream.write_all(&[byte]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        server_stream
    });

    let session = tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), engine.run_session(client_stream, &mut inbound)).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.disconnect();
    session.await.unwrap().unwrap().unwrap();
    server_task.await.unwrap();
}

/// S5: a LOGIN-ACK with a deliberately corrupted checksum byte is still
/// accepted as a structurally valid frame.
#[tokio::test]
async fn checksum_mismatch_does_not_abort_the_session() {
    let (client_stream, mut server_stream) = loopback_pair().await;
    let mut engine = ClientEngine::new(config());
    let (handle, mut inbound) = channel();

    let server_task = tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        let mut ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        let chk_idx = ack.len() - 3;
        ack[chk_idx] ^= 0xFF;
        server_stream.write_all(&ack).await.unwrap();
        server_stream
    });

    let session = tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), engine.run_session(client_stream, &mut inbound)).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.disconnect();
    // Must complete normally: a bad checksum is logged, not fatal.
    session.await.unwrap().unwrap().unwrap();
    server_task.await.unwrap();
}

/// A queued position sent before login completes is delivered as a
/// LOCATION frame once the location timer fires, not dropped. Uses the
/// minimum allowed `location_seconds` (5) and a real-time wait past one
/// full interval so the assertion does not race the timer's immediate
/// first tick (which can fire before the queued command is drained).
#[tokio::test]
async fn queued_position_is_not_lost() {
    use chrono::Utc;

    let (client_stream, mut server_stream) = loopback_pair().await;
    let mut engine = ClientEngine::new(ClientConfig::new("127.0.0.1", 5023, "123456789012345", 30, 5, 10, -1).unwrap());
    let (handle, mut inbound) = channel();

    let server_task = tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        let ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        server_stream.write_all(&ack).await.unwrap();

        // Drain frames until a LOCATION frame shows up; a HEARTBEAT may
        // legitimately interleave first.
        loop {
            let n = server_stream.read(&mut buf).await.unwrap();
            let frame = codec::decode_frame(&buf[..n]).unwrap();
            if frame.protocol == codec::PROTO_LOCATION {
                break;
            }
        }
        server_stream
    });

    handle.send_position(Position::new(-23.55052, -46.63331, 10.0, 90.0, Utc::now(), true));
    let session = tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(10), engine.run_session(client_stream, &mut inbound)).await
    });

    // One full location interval plus slack guarantees the queued
    // position has been drained and sent at least once.
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    handle.disconnect();
    session.await.unwrap().unwrap().unwrap();
    server_task.await.unwrap();
}

/// S6: a client that can never connect gives up after
/// `max_reconnect_attempts` and reports `ReconnectAttemptsExhausted`, not
/// a silent `Disconnected`. The target port is bound then immediately
/// dropped so every connect attempt fails fast with connection-refused
/// rather than timing out, keeping the test quick without faking time.
#[tokio::test]
async fn reconnect_exhaustion_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(addr.ip().to_string(), addr.port() as u32, "123456789012345", 30, 60, 0, 2).unwrap();
    let mut engine = ClientEngine::new(config);
    let (_handle, mut inbound) = channel();

    let reason = tokio::time::timeout(Duration::from_secs(10), engine.run(&mut inbound)).await.expect("run should not hang");

    assert_eq!(reason, StopReason::ReconnectAttemptsExhausted);
    assert_eq!(engine.reconnect_attempts(), 2);
}

/// A `Disconnect` received while `Online` must stop `run()` outright, not
/// just end the current session and let the reconnect loop pick back up.
#[tokio::test]
async fn disconnect_while_online_stops_run_without_reconnecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let (mut server_stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let n = server_stream.read(&mut buf).await.unwrap();
        let frame = codec::decode_frame(&buf[..n]).unwrap();
        let ack = codec::encode_ack(PROTO_LOGIN, 0x00, frame.serial);
        server_stream.write_all(&ack).await.unwrap();
        // Keep draining (heartbeats etc.) until the client closes its end.
        let mut idle = [0u8; 256];
        loop {
            match server_stream.read(&mut idle).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });

    let config = ClientConfig::new(addr.ip().to_string(), addr.port() as u32, "123456789012345", 30, 60, 1, -1).unwrap();
    let mut engine = ClientEngine::new(config);
    let (handle, mut inbound) = channel();

    let run = tokio::spawn(async move {
        let reason = tokio::time::timeout(Duration::from_secs(5), engine.run(&mut inbound)).await.expect("run should not hang");
        (reason, engine.reconnect_attempts())
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.disconnect();

    let (reason, reconnect_attempts) = run.await.unwrap();
    assert_eq!(reason, StopReason::Disconnected);
    assert_eq!(reconnect_attempts, 0, "disconnecting while Online must not count as a reconnect attempt");
    server_task.await.unwrap();
}

fn build_command_frame(content: &[u8], serial: u16) -> Vec<u8> {
    let len = 1 + content.len() + 2;
    let mut body = Vec::with_capacity(1 + len);
    body.push(len as u8);
    body.push(codec::PROTO_COMMAND);
    body.extend_from_slice(content);
    body.extend_from_slice(&serial.to_be_bytes());
    let chk = codec::xor_checksum(&body);
    let mut out = Vec::new();
    out.extend_from_slice(&codec::START_MARKER);
    out.extend_from_slice(&body);
    out.push(chk);
    out.extend_from_slice(&codec::STOP_MARKER);
    out
}
