#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests driving a live TCP listener through the full protocol:
//! handshake, provisioning, token auth, telemetry, tampering, rekeying and
//! downlink draining. The client half speaks the wire format through the
//! same proto crate the devices use.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use goster_crypto::{KeyExchangeState, SessionKey};
use goster_proto::async_io::{read_packet, write_frame};
use goster_proto::payload::{LogLevel, LogRecord, MetricKind, MetricsBatch, RegisterInfo};
use goster_proto::{self as proto, Packet, ProtoError};

use goster_server::config::ServerConfig;
use goster_server::identity::{generate_uuid, IdentityManager};
use goster_server::runtime::{DeviceRuntime, DownlinkMessage};
use goster_server::server::{serve, ServerState};
use goster_server::storage::{DataStore, Database};

struct TestServer {
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let store: Arc<dyn DataStore> = Arc::new(db);
        let identity = Arc::new(IdentityManager::new(Arc::clone(&store)));
        let runtime = Arc::new(DeviceRuntime::new());

        let state = Arc::new(ServerState {
            identity,
            runtime,
            store,
            config: ServerConfig::default(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, Arc::clone(&state), cancel.clone()));

        Self {
            addr,
            state,
            cancel,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Device-side protocol driver.
struct DeviceClient {
    stream: TcpStream,
    key: Option<SessionKey>,
    server_public: [u8; 32],
    key_id: u32,
    write_seq: u64,
}

impl DeviceClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            key: None,
            server_public: [0u8; 32],
            key_id: 0,
            write_seq: 0,
        }
    }

    /// Connect and complete the plaintext X25519 handshake.
    async fn connect_keyed(addr: std::net::SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.handshake().await;
        client
    }

    async fn handshake(&mut self) {
        let exchange = KeyExchangeState::new();
        let public = exchange.public_bytes();
        self.send(proto::CMD_HANDSHAKE_INIT, &public, false).await;

        let resp = self.read().await.unwrap();
        assert_eq!(resp.cmd, proto::CMD_HANDSHAKE_RESP);
        assert!(!resp.is_encrypted);
        assert_eq!(resp.payload.len(), 32);

        self.server_public.copy_from_slice(&resp.payload);
        self.key = Some(exchange.complete(&resp.payload).unwrap());
        self.key_id = 1;
    }

    async fn send(&mut self, cmd: u16, payload: &[u8], is_ack: bool) {
        self.write_seq += 1;
        let frame = proto::pack(
            payload,
            cmd,
            self.key_id,
            self.key.as_ref(),
            self.write_seq,
            is_ack,
        )
        .unwrap();
        write_frame(&mut self.stream, &frame).await.unwrap();
    }

    async fn read(&mut self) -> Result<Packet, ProtoError> {
        read_packet(&mut self.stream, self.key.as_ref()).await
    }

    async fn register(&mut self, info: &RegisterInfo) -> Packet {
        self.send(proto::CMD_DEVICE_REGISTER, &info.to_bytes(), false)
            .await;
        let ack = self.read().await.unwrap();
        assert_eq!(ack.cmd, proto::CMD_AUTH_ACK);
        ack
    }

    async fn authenticate(&mut self, token: &str) -> Packet {
        self.send(proto::CMD_AUTH_VERIFY, token.as_bytes(), false)
            .await;
        let ack = self.read().await.unwrap();
        assert_eq!(ack.cmd, proto::CMD_AUTH_ACK);
        ack
    }
}

fn sensor_a() -> RegisterInfo {
    RegisterInfo {
        name: "Sensor-A".into(),
        serial_number: "SN-1".into(),
        mac_address: "AA:BB:CC:DD:EE:01".into(),
        hw_version: "hw1".into(),
        sw_version: "sw1".into(),
        config_version: "cfg1".into(),
    }
}

/// Register + approve a device out of band; returns (uuid, token).
async fn provision_device(server: &TestServer, info: &RegisterInfo) -> (String, String) {
    let mut client = DeviceClient::connect_keyed(server.addr).await;
    let ack = client.register(info).await;
    assert_eq!(ack.payload, [proto::ACK_PENDING]);

    let uuid = generate_uuid(&info.serial_number, &info.mac_address);
    let token = server
        .state
        .identity
        .approve_device(&uuid)
        .await
        .unwrap()
        .unwrap();
    (uuid, token)
}

#[tokio::test]
async fn provisioning_then_approval_then_reconnection() {
    let server = TestServer::start().await;

    // First contact: the application lands as Pending and the session ends.
    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.register(&sensor_a()).await;
    assert_eq!(ack.payload, [proto::ACK_PENDING]);
    assert!(device.read().await.is_err(), "server should have closed");

    // Re-applying before approval stays pending.
    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.register(&sensor_a()).await;
    assert_eq!(ack.payload, [proto::ACK_PENDING]);

    // Operator approves; the device rediscovers its identity on reconnect.
    let uuid = generate_uuid("SN-1", "AA:BB:CC:DD:EE:01");
    let token = server
        .state
        .identity
        .approve_device(&uuid)
        .await
        .unwrap()
        .unwrap();

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.register(&sensor_a()).await;
    assert_eq!(ack.payload[0], proto::ACK_OK);
    assert_eq!(&ack.payload[1..], token.as_bytes());

    // The session stays up and serves business commands.
    device.send(proto::CMD_HEARTBEAT, &[], false).await;
    let hb = device.read().await.unwrap();
    assert_eq!(hb.cmd, proto::CMD_HEARTBEAT);
    assert!(hb.is_ack);
}

#[tokio::test]
async fn rejected_device_is_refused_on_register() {
    let server = TestServer::start().await;
    let (uuid, _token) = provision_device(&server, &sensor_a()).await;
    server.state.identity.reject_device(&uuid).await.unwrap();

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.register(&sensor_a()).await;
    assert_eq!(ack.payload, [proto::ACK_FAIL]);
    assert!(device.read().await.is_err());
}

#[tokio::test]
async fn token_auth_then_metrics_batch() {
    let server = TestServer::start().await;
    let (uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.authenticate(&token).await;
    assert_eq!(ack.payload, [proto::ACK_OK]);

    let batch = MetricsBatch {
        start_ts: 1_700_000_000_000,
        interval_ms: 1000,
        kind: MetricKind::Generic,
        values: vec![1.0, 2.0, 3.0, 4.0, 5.0],
    };
    device
        .send(proto::CMD_METRICS_REPORT, &batch.to_bytes(), false)
        .await;

    let ack = device.read().await.unwrap();
    assert_eq!(ack.cmd, proto::CMD_METRICS_REPORT);
    assert!(ack.is_ack);
    assert!(ack.payload.is_empty());

    let points = server
        .state
        .store
        .query_metrics(&uuid, 1_700_000_000_000, 1_700_000_004_000)
        .await
        .unwrap();
    assert_eq!(points.len(), 5);
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point.timestamp_ms, 1_700_000_000_000 + i as i64 * 1000);
        assert_eq!(point.value, batch.values[i]);
    }
}

#[tokio::test]
async fn bad_token_gets_failure_byte_then_close() {
    let server = TestServer::start().await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.authenticate("gt_not_a_real_token").await;
    assert_eq!(ack.payload, [proto::ACK_FAIL]);
    assert!(device.read().await.is_err());
}

#[tokio::test]
async fn pending_device_token_collapses_to_generic_failure() {
    let server = TestServer::start().await;

    // Register but never approve, then try a token that cannot exist.
    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.register(&sensor_a()).await;
    assert_eq!(ack.payload, [proto::ACK_PENDING]);

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let ack = device.authenticate("gt_guess").await;
    assert_eq!(ack.payload, [proto::ACK_FAIL]);
}

#[tokio::test]
async fn unauthenticated_metrics_are_rejected_by_close() {
    let server = TestServer::start().await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    let batch = MetricsBatch {
        start_ts: 0,
        interval_ms: 1,
        kind: MetricKind::Generic,
        values: vec![1.0],
    };
    device
        .send(proto::CMD_METRICS_REPORT, &batch.to_bytes(), false)
        .await;

    // No ACK; the connection just dies.
    assert!(device.read().await.is_err());
}

#[tokio::test]
async fn tampered_ciphertext_closes_the_session() {
    let server = TestServer::start().await;
    let (_uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    device.authenticate(&token).await;

    let record = LogRecord {
        ts: 1,
        level: LogLevel::Info,
        message: "will be mangled in flight".into(),
    };
    device.write_seq += 1;
    let mut frame = proto::pack(
        &record.to_bytes(),
        proto::CMD_LOG_REPORT,
        device.key_id,
        device.key.as_ref(),
        device.write_seq,
        false,
    )
    .unwrap();

    // One flipped ciphertext bit must fail the GCM open server-side.
    frame[proto::HEADER_SIZE + 2] ^= 0x01;
    device.stream.write_all(&frame).await.unwrap();
    device.stream.flush().await.unwrap();

    assert!(device.read().await.is_err(), "no ACK after tampering");
}

#[tokio::test]
async fn malformed_batch_is_dropped_but_session_survives() {
    let server = TestServer::start().await;
    let (uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    device.authenticate(&token).await;

    // Unknown metric type code: batch dropped, session kept.
    let mut bad = MetricsBatch {
        start_ts: 0,
        interval_ms: 1,
        kind: MetricKind::Generic,
        values: vec![1.0],
    }
    .to_bytes();
    bad[12] = 3;
    device.send(proto::CMD_METRICS_REPORT, &bad, false).await;
    let ack = device.read().await.unwrap();
    assert!(ack.is_ack);

    assert!(server
        .state
        .store
        .query_metrics(&uuid, i64::MIN, i64::MAX)
        .await
        .unwrap()
        .is_empty());

    // The next well-formed batch still lands.
    let good = MetricsBatch {
        start_ts: 100,
        interval_ms: 10,
        kind: MetricKind::Temperature,
        values: vec![21.5],
    };
    device
        .send(proto::CMD_METRICS_REPORT, &good.to_bytes(), false)
        .await;
    device.read().await.unwrap();

    let points = server
        .state
        .store
        .query_metrics(&uuid, 0, 200)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 21.5);
}

#[tokio::test]
async fn downlink_drains_in_order_with_increasing_seq() {
    let server = TestServer::start().await;
    let (uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    device.authenticate(&token).await;

    // A quiet round-trip first, so the session is parked in its read before
    // the operator enqueues anything.
    device.send(proto::CMD_HEARTBEAT, &[], false).await;
    let hb = device.read().await.unwrap();
    assert_eq!(hb.payload, [0x00], "queue starts empty");

    for payload in [b"A", b"B", b"C"] {
        server
            .state
            .runtime
            .queue_push(
                &uuid,
                DownlinkMessage {
                    cmd_id: proto::CMD_ACTION_EXEC,
                    payload: payload.to_vec(),
                },
            )
            .await;
    }

    device.send(proto::CMD_HEARTBEAT, &[], false).await;

    // Exactly four outbound frames follow: the heartbeat ACK plus the three
    // queued commands in FIFO order, every write_seq strictly increasing.
    let mut last_seq = 0u64;
    let mut heartbeat_acks = 0;
    let mut delivered: Vec<Vec<u8>> = Vec::new();
    for _ in 0..4 {
        let frame = device.read().await.unwrap();
        assert!(frame.is_encrypted);
        assert!(frame.seq_nonce > last_seq, "write_seq must increase");
        last_seq = frame.seq_nonce;

        match frame.cmd {
            proto::CMD_HEARTBEAT => {
                assert!(frame.is_ack);
                heartbeat_acks += 1;
            }
            proto::CMD_ACTION_EXEC => {
                assert!(!frame.is_ack);
                delivered.push(frame.payload);
            }
            other => panic!("unexpected frame 0x{other:04X}"),
        }
    }
    assert_eq!(heartbeat_acks, 1);
    assert_eq!(delivered, [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);

    // Confirm delivery the way a device would.
    device.send(proto::CMD_ACTION_EXEC, &[], true).await;
    device.send(proto::CMD_HEARTBEAT, &[], false).await;
    let hb = device.read().await.unwrap();
    assert_eq!(hb.payload, [0x00], "queue must be empty after the drain");
}

#[tokio::test]
async fn key_rotation_mid_session() {
    let server = TestServer::start().await;
    let (_uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    device.authenticate(&token).await;

    // Send the new public key under the old key, then install the rotated
    // key immediately; the server's reply already rides the new key.
    let rotation = KeyExchangeState::new();
    let new_public = rotation.public_bytes();
    device
        .send(proto::CMD_KEY_EXCHANGE_UPLINK, &new_public, false)
        .await;
    device.key = Some(rotation.complete(&device.server_public).unwrap());
    device.key_id += 1;

    let resp = device.read().await.unwrap();
    assert_eq!(resp.cmd, proto::CMD_KEY_EXCHANGE_DOWNLINK);
    assert_eq!(resp.payload, device.server_public);
    assert_eq!(resp.key_id, 2);

    // Business traffic continues under the rotated key.
    device.send(proto::CMD_HEARTBEAT, &[], false).await;
    let hb = device.read().await.unwrap();
    assert_eq!(hb.cmd, proto::CMD_HEARTBEAT);
    assert!(hb.is_ack);
}

#[tokio::test]
async fn error_report_is_stored_and_closes_session() {
    let server = TestServer::start().await;
    let (_uuid, token) = provision_device(&server, &sensor_a()).await;

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    device.authenticate(&token).await;

    device
        .send(proto::CMD_ERROR_REPORT, b"watchdog reset imminent", false)
        .await;

    assert!(device.read().await.is_err(), "last-gasp channel closes");
}

#[tokio::test]
async fn revoked_token_no_longer_authenticates() {
    let server = TestServer::start().await;
    let (uuid, token) = provision_device(&server, &sensor_a()).await;

    // Prove the token works, then revoke it.
    let mut device = DeviceClient::connect_keyed(server.addr).await;
    assert_eq!(device.authenticate(&token).await.payload, [proto::ACK_OK]);

    server.state.identity.revoke_token(&uuid).await.unwrap();

    let mut device = DeviceClient::connect_keyed(server.addr).await;
    assert_eq!(device.authenticate(&token).await.payload, [proto::ACK_FAIL]);
}

#[tokio::test]
async fn plaintext_business_command_before_handshake_closes() {
    let server = TestServer::start().await;

    let mut device = DeviceClient::connect(server.addr).await;
    device.send(proto::CMD_HEARTBEAT, &[], false).await;

    assert!(device.read().await.is_err());
}
