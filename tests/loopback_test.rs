//! End-to-end tests against a mock TWAMP server and reflector on loopback.
//!
//! The control server speaks just enough TWAMP-Control to walk the client
//! through the handshake; the reflector echoes test packets the way an
//! RFC 5357 Session-Reflector does, optionally corrupting the echoed
//! sequence number.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use twamp_client::dscp;
use twamp_client::messages::*;
use twamp_client::full::ControlState;
use twamp_client::packets::{FormatError, MeasurementPacket};
use twamp_client::time::TwampTimestamp;
use twamp_client::{
    FullClient, LightClient, NegotiationError, SessionConfig, TwampError, TwampTest,
};

const SID: [u8; 16] = [0xAB; 16];

/// Accept values the mock control server answers with.
#[derive(Clone, Copy)]
struct MockServer {
    modes: u32,
    server_start: u8,
    session_accept: u8,
    start_ack: u8,
    test_port: u16,
}

impl MockServer {
    fn accepting(test_port: u16) -> Self {
        MockServer {
            modes: 1,
            server_start: 0,
            session_accept: 0,
            start_ack: 0,
            test_port,
        }
    }
}

/// What the mock control server observed from the client.
#[derive(Debug)]
struct ControlTranscript {
    request: RequestTwSession,
    stop: Option<StopSessions>,
}

async fn serve_control(listener: TcpListener, mock: MockServer) -> Option<ControlTranscript> {
    let (mut stream, _) = listener.accept().await.ok()?;

    let greeting = ServerGreeting {
        modes: mock.modes,
        count: 1024,
        ..Default::default()
    };
    stream.write_all(&greeting.to_bytes()).await.ok()?;

    let mut setup = [0u8; ClientSetupResponse::SIZE];
    stream.read_exact(&mut setup).await.ok()?;
    let setup = ClientSetupResponse::from_bytes(&setup).ok()?;
    assert_eq!(setup.mode, 1);

    let start = ServerStart {
        accept: mock.server_start,
        ..Default::default()
    };
    stream.write_all(&start.to_bytes()).await.ok()?;

    let request = read_request(&mut stream).await?;
    let accept = AcceptSession {
        accept: mock.session_accept,
        port: mock.test_port,
        sid: SID,
    };
    stream.write_all(&accept.to_bytes()).await.ok()?;

    let mut start_sessions = [0u8; StartSessions::SIZE];
    stream.read_exact(&mut start_sessions).await.ok()?;
    assert_eq!(
        StartSessions::command_of(&start_sessions).ok()?,
        StartSessions::COMMAND
    );
    let ack = StartAck {
        accept: mock.start_ack,
    };
    stream.write_all(&ack.to_bytes()).await.ok()?;

    let mut stop = [0u8; StopSessions::SIZE];
    let stop = match stream.read_exact(&mut stop).await {
        Ok(_) if stop[0] == StopSessions::COMMAND => StopSessions::from_bytes(&stop).ok(),
        _ => None,
    };

    Some(ControlTranscript { request, stop })
}

async fn read_request(stream: &mut TcpStream) -> Option<RequestTwSession> {
    let mut buf = [0u8; RequestTwSession::SIZE];
    stream.read_exact(&mut buf).await.ok()?;
    assert_eq!(buf[0], RequestTwSession::COMMAND);
    RequestTwSession::from_bytes(&buf).ok()
}

async fn spawn_control_server(mock: MockServer) -> (u16, JoinHandle<Option<ControlTranscript>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, tokio::spawn(serve_control(listener, mock)))
}

/// How the mock reflector answers test packets.
#[derive(Clone, Copy, Default)]
struct Reflector {
    /// Added to the echoed sender sequence number.
    seq_offset: u32,
    /// Holds back the reply to the first packet.
    delay_first: Option<Duration>,
    /// Padding bytes cut from every reply.
    truncate_padding: usize,
}

/// Spawns a reflector that answers every test packet. Every received
/// datagram is forwarded on the returned channel.
async fn spawn_reflector(seq_offset: u32) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    spawn_custom_reflector(Reflector {
        seq_offset,
        ..Default::default()
    })
    .await
}

async fn spawn_custom_reflector(
    behaviour: Reflector,
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        let mut sequence = 0u32;
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(_) => return,
            };
            let received = TwampTimestamp::now();
            let request = match MeasurementPacket::from_bytes(&buf[..len]) {
                Ok(p) => p,
                Err(_) => continue,
            };

            let reply = MeasurementPacket {
                sequence_number: sequence,
                timestamp: TwampTimestamp::now(),
                error_estimate: 0x8001,
                receive_timestamp: received,
                sender_sequence_number: request.sequence_number.wrapping_add(behaviour.seq_offset),
                sender_timestamp: request.timestamp,
                sender_error_estimate: request.error_estimate,
                sender_ttl: 255,
                ..Default::default()
            };

            let padding_end = len.saturating_sub(behaviour.truncate_padding).max(MeasurementPacket::SIZE);
            let mut pdu = reply.to_bytes().to_vec();
            pdu.extend_from_slice(&buf[MeasurementPacket::SIZE..padding_end]);

            match behaviour.delay_first {
                Some(delay) if sequence == 0 => {
                    let late = socket.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = late.send_to(&pdu, src).await;
                    });
                }
                _ => {
                    if socket.send_to(&pdu, src).await.is_err() {
                        return;
                    }
                }
            }
            sequence += 1;
            let _ = tx.send(buf[..len].to_vec());
        }
    });

    (addr, rx)
}

async fn light_test(reflector: SocketAddr, config: SessionConfig) -> TwampTest {
    LightClient::new()
        .connect("127.0.0.1", reflector.port())
        .create_session(config)
        .create_test()
        .await
        .unwrap()
}

fn fast_config() -> SessionConfig {
    SessionConfig::default().with_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn test_full_mode_success() {
    let (reflector, _rx) = spawn_reflector(0).await;
    let (cport, server) = spawn_control_server(MockServer::accepting(reflector.port())).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    assert_eq!(connection.state().await, ControlState::SessionReady);
    let config = fast_config().with_padding(42).with_tos(dscp::AF11);
    let session = connection.create_session(config.clone()).await.unwrap();
    assert_eq!(session.port(), reflector.port());
    assert_eq!(session.session_id(), SID);

    let mut test = session.create_test().await.unwrap();
    assert_eq!(connection.state().await, ControlState::TestActive);
    assert_eq!(test.remote_addr().port(), reflector.port());
    assert_eq!(test.session_id(), Some(SID));

    let result = test.run_once().await.unwrap();
    assert_eq!(result.sender_seq_num, 0);
    assert_eq!(result.sender_size, 41 + 42);
    assert_eq!(test.sequence(), 1);

    let results = test.run_x(3, |_, _, _| {}, CancellationToken::new()).await;
    assert_eq!(results.stat.transmitted, 3);
    assert_eq!(results.stat.received, 3);
    assert_eq!(results.stat.loss, 0.0);

    session.stop().await;
    assert_eq!(connection.state().await, ControlState::Stopped);
    connection.close().await;

    let transcript = server.await.unwrap().unwrap();
    assert_eq!(transcript.request.ip_version, 4);
    assert_eq!(transcript.request.padding_length, 42);
    assert_eq!(transcript.request.type_p, dscp::AF11 as u32);
    let stop = transcript.stop.unwrap();
    assert_eq!(stop.accept, 0);
    assert_eq!(stop.sessions, 1);
}

#[tokio::test]
async fn test_out_of_order_control_operations() {
    let (reflector, _rx) = spawn_reflector(0).await;
    let (cport, server) = spawn_control_server(MockServer::accepting(reflector.port())).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let session = connection.create_session(fast_config()).await.unwrap();
    let _test = session.create_test().await.unwrap();

    match session.create_test().await {
        Err(TwampError::InvalidState { state, .. }) => assert_eq!(state, ControlState::TestActive),
        other => panic!("second start accepted: {:?}", other.map(|t| t.remote_addr())),
    }
    assert!(matches!(
        connection.create_session(fast_config()).await,
        Err(TwampError::InvalidState { .. })
    ));

    session.stop().await;
    match connection.create_session(fast_config()).await {
        Err(TwampError::InvalidState { state, .. }) => assert_eq!(state, ControlState::Stopped),
        other => panic!("session after stop accepted: {:?}", other.map(|s| s.port())),
    }
    connection.close().await;

    // Nothing but Stop-Sessions may follow Start-Ack on the wire.
    let transcript = server.await.unwrap().unwrap();
    assert_eq!(transcript.stop.unwrap().sessions, 1);
}

#[tokio::test]
async fn test_stop_without_started_test() {
    let (cport, _server) = spawn_control_server(MockServer::accepting(0)).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let session = connection
        .create_session(SessionConfig::default())
        .await
        .unwrap();
    session.stop().await;
    assert_eq!(connection.state().await, ControlState::SessionReady);
    connection.close().await;
    assert_eq!(connection.state().await, ControlState::Stopped);
}

#[tokio::test]
async fn test_server_start_internal_error() {
    let mock = MockServer {
        server_start: 2,
        ..MockServer::accepting(0)
    };
    let (cport, _server) = spawn_control_server(mock).await;

    let err = FullClient::new()
        .connect("127.0.0.1", cport)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TwampError::Negotiation(_)));
    assert!(err.to_string().contains("internal error"), "{}", err);
    assert!(err.to_string().contains("connection"), "{}", err);
}

#[tokio::test]
async fn test_unknown_accept_status_is_not_success() {
    let mock = MockServer {
        session_accept: 9,
        ..MockServer::accepting(0)
    };
    let (cport, _server) = spawn_control_server(mock).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let err = connection
        .create_session(SessionConfig::default())
        .await
        .err()
        .unwrap();
    match err {
        TwampError::Negotiation(NegotiationError::UnknownStatus { context, code }) => {
            assert_eq!(context, "session");
            assert_eq!(code, 9);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_start_ack_rejected() {
    let mock = MockServer {
        start_ack: 1,
        ..MockServer::accepting(0)
    };
    let (cport, _server) = spawn_control_server(mock).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let session = connection
        .create_session(SessionConfig::default())
        .await
        .unwrap();
    let err = session.create_test().await.err().unwrap();
    assert_eq!(err.to_string(), "negotiation failed: the test setup failed");
}

#[tokio::test]
async fn test_unwilling_server() {
    let mock = MockServer {
        modes: 0,
        ..MockServer::accepting(0)
    };
    let (cport, _server) = spawn_control_server(mock).await;

    let err = FullClient::new()
        .connect("127.0.0.1", cport)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        TwampError::Negotiation(NegotiationError::ServerUnwilling)
    ));
}

#[tokio::test]
async fn test_session_after_close() {
    let (cport, _server) = spawn_control_server(MockServer::accepting(0)).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let session = connection
        .create_session(SessionConfig::default())
        .await
        .unwrap();
    connection.close().await;

    let err = session.create_test().await.err().unwrap();
    assert!(matches!(err, TwampError::ConnectionClosed));
    assert!(err.is_transport());

    drop(connection);
    let err = session.create_test().await.err().unwrap();
    assert!(matches!(err, TwampError::ConnectionClosed));
}

#[tokio::test]
async fn test_test_after_close() {
    let (reflector, _rx) = spawn_reflector(0).await;
    let (cport, _server) = spawn_control_server(MockServer::accepting(reflector.port())).await;

    let connection = FullClient::new().connect("127.0.0.1", cport).await.unwrap();
    let session = connection.create_session(fast_config()).await.unwrap();
    let mut test = session.create_test().await.unwrap();
    test.run_once().await.unwrap();

    connection.close().await;
    let err = test.run_once().await.err().unwrap();
    assert!(matches!(err, TwampError::ConnectionClosed));
    assert!(err.is_transport());

    drop(connection);
    assert!(matches!(
        test.run_once().await,
        Err(TwampError::ConnectionClosed)
    ));

    let results = test.run_x(2, |_, _, _| {}, CancellationToken::new()).await;
    assert_eq!(results.stat.transmitted, 2);
    assert_eq!(results.stat.received, 0);
}

#[tokio::test]
async fn test_late_reply_does_not_cascade() {
    let (reflector, _rx) = spawn_custom_reflector(Reflector {
        delay_first: Some(Duration::from_millis(1500)),
        ..Default::default()
    })
    .await;

    let config = SessionConfig::default()
        .with_timeout(1)
        .with_interval(Duration::from_millis(200));
    let test = light_test(reflector, config).await;

    let mut outcomes = Vec::new();
    let results = test
        .run_x(
            6,
            |_, outcome, _| outcomes.push(outcome.as_ref().map(|r| r.sender_seq_num).ok()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcomes, vec![None, Some(1), Some(2), Some(3), Some(4), Some(5)]);
    assert_eq!(results.stat.transmitted, 6);
    assert_eq!(results.stat.received, 5);
}

#[tokio::test]
async fn test_short_padding_is_loss() {
    let (reflector, _rx) = spawn_custom_reflector(Reflector {
        truncate_padding: 10,
        ..Default::default()
    })
    .await;

    let mut test = light_test(reflector, fast_config().with_padding(42)).await;
    match test.run_once().await {
        Err(TwampError::Format(FormatError::ShortPadding { expected, actual })) => {
            assert_eq!(expected, 42);
            assert_eq!(actual, 32);
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.sender_size)),
    }

    let results = test.run_x(2, |_, _, _| {}, CancellationToken::new()).await;
    assert_eq!(results.stat.transmitted, 2);
    assert_eq!(results.stat.received, 0);
    assert_eq!(results.stat.loss, 100.0);
}

#[tokio::test]
async fn test_sequence_mismatch_is_loss() {
    let (reflector, _rx) = spawn_reflector(1).await;

    let mut test = light_test(reflector, fast_config()).await.with_sequence(7);
    match test.run_once().await {
        Err(TwampError::SequenceMismatch { expected, received }) => {
            assert_eq!(expected, 7);
            assert_eq!(received, 8);
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.sender_seq_num)),
    }

    let mut failures = 0;
    let results = test
        .run_x(
            3,
            |_, outcome, stats| {
                assert!(outcome.is_err());
                assert_eq!(stats.received, 0);
                failures += 1;
            },
            CancellationToken::new(),
        )
        .await;
    assert_eq!(failures, 3);
    assert_eq!(results.stat.transmitted, 3);
    assert_eq!(results.stat.received, 0);
    assert_eq!(results.stat.loss, 100.0);
    assert!(results.results.is_empty());
}

#[tokio::test]
async fn test_light_mode_random_padding() {
    let (reflector, mut rx) = spawn_reflector(0).await;

    let mut test = light_test(reflector, fast_config().with_padding(42)).await;
    assert_eq!(test.session_id(), None);
    let result = test.run_once().await.unwrap();
    assert_eq!(result.sender_size, 83);

    let sent = rx.recv().await.unwrap();
    assert_eq!(sent.len(), 83);
    assert!(sent[41..].iter().any(|&b| b != 0));
}

#[tokio::test]
async fn test_light_mode_zero_padding() {
    let (reflector, mut rx) = spawn_reflector(0).await;

    let config = fast_config().with_padding(1024).with_all_zeros(true);
    let mut test = light_test(reflector, config).await;
    test.run_once().await.unwrap();

    let sent = rx.recv().await.unwrap();
    assert_eq!(sent.len(), 41 + 1024);
    assert!(sent[41..].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_timeout_without_reflector() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let mut test = light_test(addr, fast_config().with_timeout(1)).await;
    let err = test.run_once().await.err().unwrap();
    assert!(matches!(err, TwampError::Timeout(_)));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_ping_light_mode() {
    let (reflector, _rx) = spawn_reflector(0).await;

    let test = light_test(reflector, fast_config()).await;
    let results = test.ping(4, true, Duration::ZERO).await;
    assert_eq!(results.stat.transmitted, 4);
    assert_eq!(results.stat.received, 4);
    assert!(results.stat.min <= results.stat.avg);
    assert!(results.stat.avg <= results.stat.max);
    let seqs: Vec<u32> = results.results.iter().map(|r| r.sender_seq_num).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_run_x_cancelled_before_start() {
    let (reflector, _rx) = spawn_reflector(0).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let test = light_test(reflector, fast_config()).await;
    let results = test.run_x(10, |_, _, _| {}, cancel).await;
    assert_eq!(results.stat.transmitted, 0);
}

#[tokio::test]
async fn test_run_x_cancelled_during_wait() {
    let (reflector, _rx) = spawn_reflector(0).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let config = SessionConfig::default().with_interval(Duration::from_secs(60));
    let test = light_test(reflector, config).await;

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        test.run_x(10, move |_, _, _| trigger.cancel(), cancel),
    )
    .await
    .expect("cancellation did not interrupt the inter-packet wait");
    assert_eq!(results.stat.transmitted, 1);
    assert_eq!(results.stat.received, 1);
    assert_eq!(results.results.len(), 1);
}

#[tokio::test]
async fn test_no_wait_after_final_packet() {
    let (reflector, _rx) = spawn_reflector(0).await;
    let interval = Duration::from_secs(60);
    let config = SessionConfig::default().with_interval(interval);

    let test = light_test(reflector, config.clone()).await;
    let results = tokio::time::timeout(
        Duration::from_secs(5),
        test.run_x(1, |_, _, _| {}, CancellationToken::new()),
    )
    .await
    .expect("run_x waited after its last packet");
    assert_eq!(results.stat.received, 1);

    let test = light_test(reflector, config).await;
    let results = tokio::time::timeout(Duration::from_secs(5), test.ping(1, false, interval))
        .await
        .expect("ping waited after its last packet");
    assert_eq!(results.stat.received, 1);
}
