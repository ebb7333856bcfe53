//! Per-connection session state machine.
//!
//! One task per accepted socket. The life of a session: a plaintext X25519
//! handshake installs the AEAD key, then a gate admits only authentication
//! and registration commands until the device proves its identity, then the
//! command loop dispatches business frames and drains the device's downlink
//! queue after every inbound frame. Framing or integrity failures, the
//! 60-second read deadline, and shutdown all end the session by closing the
//! socket; devices recover by reconnecting.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use goster_crypto::{KeyExchangeState, SessionKey};
use goster_proto::async_io::{read_packet, write_frame};
use goster_proto::payload::RegisterInfo;
use goster_proto::{self as proto, Packet, ProtoError};

use crate::identity::generate_uuid;
use crate::ingest::{self, IngestError};
use crate::server::ServerState;
use crate::storage::{AuthStatus, DatabaseError, DeviceMetadata};

/// What the dispatcher wants done with the connection after a frame.
enum Flow {
    Continue,
    Close,
}

/// Session-fatal conditions. Everything recoverable is handled in place.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("read deadline elapsed")]
    ReadTimeout,
}

pub struct Session<S> {
    stream: S,
    peer: String,
    state: Arc<ServerState>,
    /// Our X25519 keypair, fresh per session but stable across rekeys
    /// within it: the device must be able to install a rotated key from
    /// our already-known public key before our reply arrives.
    exchange: KeyExchangeState,
    key: Option<SessionKey>,
    key_id: u32,
    write_seq: u64,
    uuid: Option<String>,
    authenticated: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, peer: String, state: Arc<ServerState>) -> Self {
        Self {
            stream,
            peer,
            state,
            exchange: KeyExchangeState::new(),
            key: None,
            key_id: 0,
            write_seq: 0,
            uuid: None,
            authenticated: false,
        }
    }

    /// Drive the session to completion. Consumes the session; the socket
    /// closes when it drops.
    pub async fn run(mut self, cancel: CancellationToken) {
        match self.serve(&cancel).await {
            Ok(()) => debug!(peer = %self.peer, "Session closed"),
            Err(SessionError::ReadTimeout) => {
                debug!(peer = %self.peer, "Session read deadline elapsed")
            }
            Err(SessionError::Proto(ProtoError::Io(e))) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(peer = %self.peer, "Peer disconnected")
            }
            Err(SessionError::Proto(e)) => {
                warn!(peer = %self.peer, error = %e, "Session terminated")
            }
        }
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        loop {
            let read_timeout = self.state.config.read_timeout();
            let packet = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(peer = %self.peer, "Session cancelled by shutdown");
                    return Ok(());
                }
                read = timeout(read_timeout, read_packet(&mut self.stream, self.key.as_ref())) => {
                    match read {
                        Err(_) => return Err(SessionError::ReadTimeout),
                        Ok(result) => result?,
                    }
                }
            };

            if matches!(self.dispatch(packet).await?, Flow::Close) {
                return Ok(());
            }

            if self.authenticated {
                self.drain_downlink().await?;
            }
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<Flow, SessionError> {
        if self.authenticated {
            self.dispatch_authed(packet).await
        } else {
            self.dispatch_gate(packet).await
        }
    }

    /// Pre-authentication gate: only handshake, key rotation, token auth
    /// and registration are admitted. Anything else closes the connection.
    async fn dispatch_gate(&mut self, packet: Packet) -> Result<Flow, SessionError> {
        match packet.cmd {
            proto::CMD_HANDSHAKE_INIT => self.handle_handshake(&packet.payload).await,
            proto::CMD_KEY_EXCHANGE_UPLINK if self.key.is_some() => {
                self.handle_key_rotation(&packet.payload).await
            }
            proto::CMD_AUTH_VERIFY if self.key.is_some() => {
                self.handle_auth_verify(&packet.payload).await
            }
            proto::CMD_DEVICE_REGISTER if self.key.is_some() => {
                self.handle_register(&packet.payload).await
            }
            other => {
                warn!(
                    peer = %self.peer,
                    cmd = format_args!("0x{other:04X}"),
                    "Command refused before authentication"
                );
                Ok(Flow::Close)
            }
        }
    }

    async fn dispatch_authed(&mut self, packet: Packet) -> Result<Flow, SessionError> {
        let Some(uuid) = self.uuid.clone() else {
            return Ok(Flow::Close);
        };

        match packet.cmd {
            proto::CMD_METRICS_REPORT => {
                match ingest::handle_metrics(&self.state.store, &uuid, &packet.payload).await {
                    Ok(count) => debug!(uuid = %uuid, count, "Metrics batch stored"),
                    Err(IngestError::Malformed(e)) => {
                        warn!(uuid = %uuid, error = %e, "Discarding malformed metrics batch")
                    }
                    Err(IngestError::Store(e)) => {
                        error!(uuid = %uuid, error = %e, "Failed to store metrics batch")
                    }
                }
                self.send_ack(proto::CMD_METRICS_REPORT).await?;
                Ok(Flow::Continue)
            }

            proto::CMD_LOG_REPORT => {
                match ingest::handle_log(&self.state.store, &uuid, &packet.payload).await {
                    Ok(()) => {}
                    Err(IngestError::Malformed(e)) => {
                        warn!(uuid = %uuid, error = %e, "Discarding malformed log report")
                    }
                    Err(IngestError::Store(e)) => {
                        error!(uuid = %uuid, error = %e, "Failed to store log report")
                    }
                }
                self.send_ack(proto::CMD_LOG_REPORT).await?;
                Ok(Flow::Continue)
            }

            proto::CMD_EVENT_REPORT => {
                if let Err(e) =
                    ingest::handle_event(&self.state.store, &uuid, &packet.payload).await
                {
                    error!(uuid = %uuid, error = %e, "Failed to store event report");
                }
                self.send_ack(proto::CMD_EVENT_REPORT).await?;
                Ok(Flow::Continue)
            }

            proto::CMD_HEARTBEAT => {
                let queue_empty =
                    ingest::handle_heartbeat(&self.state.runtime, &uuid).await;
                let status = if queue_empty { 0x00 } else { 0x01 };
                self.send_encrypted(proto::CMD_HEARTBEAT, &[status], true)
                    .await?;
                Ok(Flow::Continue)
            }

            proto::CMD_ERROR_REPORT => {
                warn!(
                    uuid = %uuid,
                    report = %String::from_utf8_lossy(&packet.payload),
                    "Device error report, closing session"
                );
                if let Err(e) =
                    ingest::handle_error_report(&self.state.store, &uuid, &packet.payload).await
                {
                    error!(uuid = %uuid, error = %e, "Failed to store error report");
                }
                Ok(Flow::Close)
            }

            proto::CMD_KEY_EXCHANGE_UPLINK => self.handle_key_rotation(&packet.payload).await,

            proto::CMD_CONFIG_PUSH
            | proto::CMD_OTA_DATA
            | proto::CMD_ACTION_EXEC
            | proto::CMD_SCREEN_WY
                if packet.is_ack =>
            {
                debug!(
                    uuid = %uuid,
                    cmd = format_args!("0x{:04X}", packet.cmd),
                    "Downlink delivery confirmed"
                );
                Ok(Flow::Continue)
            }

            other => {
                error!(
                    uuid = %uuid,
                    cmd = format_args!("0x{other:04X}"),
                    "Unexpected command in authenticated session"
                );
                Ok(Flow::Close)
            }
        }
    }

    /// First frame of a session: the device's 32-byte X25519 public key in
    /// the clear. The reply carries ours, and every later frame is sealed.
    async fn handle_handshake(&mut self, payload: &[u8]) -> Result<Flow, SessionError> {
        if payload.len() != 32 {
            warn!(peer = %self.peer, len = payload.len(), "Handshake with invalid public key length");
            return Ok(Flow::Close);
        }

        let key = match self.exchange.session_key(payload) {
            Ok(key) => key,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Key negotiation failed");
                return Ok(Flow::Close);
            }
        };

        self.key = Some(key);
        self.key_id = 1;

        let server_public = self.exchange.public_bytes();
        self.send_plain(proto::CMD_HANDSHAKE_RESP, &server_public)
            .await?;
        debug!(peer = %self.peer, "Session key established");
        Ok(Flow::Continue)
    }

    /// Mid-session rekey. The new key must be installed before the reply is
    /// packed: by protocol contract the device switches keys right after
    /// sending its uplink, so the downlink already rides the new key.
    async fn handle_key_rotation(&mut self, payload: &[u8]) -> Result<Flow, SessionError> {
        if payload.len() != 32 {
            warn!(peer = %self.peer, len = payload.len(), "Key rotation with invalid public key length");
            return Ok(Flow::Close);
        }

        let key = match self.exchange.session_key(payload) {
            Ok(key) => key,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Key rotation negotiation failed");
                return Ok(Flow::Close);
            }
        };

        self.key = Some(key);
        self.key_id += 1;

        let server_public = self.exchange.public_bytes();
        self.send_encrypted(proto::CMD_KEY_EXCHANGE_DOWNLINK, &server_public, false)
            .await?;
        debug!(peer = %self.peer, key_id = self.key_id, "Session key rotated");
        Ok(Flow::Continue)
    }

    async fn handle_auth_verify(&mut self, payload: &[u8]) -> Result<Flow, SessionError> {
        let Ok(token) = std::str::from_utf8(payload) else {
            warn!(peer = %self.peer, "Token is not valid UTF-8");
            self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                .await?;
            return Ok(Flow::Close);
        };

        match self.state.identity.authenticate(token).await {
            Ok(uuid) => {
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_OK], false)
                    .await?;
                info!(uuid = %uuid, peer = %self.peer, "Device authenticated");
                self.uuid = Some(uuid);
                self.authenticated = true;
                Ok(Flow::Continue)
            }
            Err(e) => {
                // Pending, refused, unknown and invalid all collapse into
                // the one failure byte on the wire.
                warn!(peer = %self.peer, error = %e, "Token authentication failed");
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                    .await?;
                Ok(Flow::Close)
            }
        }
    }

    /// Registration doubles as provisioning application and identity
    /// recovery. New and still-pending devices get the pending byte and a
    /// close; an approved device gets its token handed back and stays.
    async fn handle_register(&mut self, payload: &[u8]) -> Result<Flow, SessionError> {
        let info = match RegisterInfo::from_bytes(payload) {
            Ok(info) => info,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Malformed registration payload");
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                    .await?;
                return Ok(Flow::Close);
            }
        };

        let uuid = generate_uuid(&info.serial_number, &info.mac_address);

        let existing = match self.state.store.load_config(&uuid).await {
            Ok(meta) => Some(meta),
            Err(DatabaseError::NotFound(_)) => None,
            Err(e) => {
                error!(uuid = %uuid, error = %e, "Registration lookup failed");
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                    .await?;
                return Ok(Flow::Close);
            }
        };

        let Some(existing) = existing else {
            info!(uuid = %uuid, serial = %info.serial_number, "New device provisioning request");
            let meta = DeviceMetadata {
                name: info.name,
                serial_number: info.serial_number,
                mac_address: info.mac_address,
                hw_version: info.hw_version,
                sw_version: info.sw_version,
                config_version: info.config_version,
                token: None,
                auth_status: AuthStatus::Pending,
                created_at: 0,
            };
            let ack = match self.state.identity.register_device(meta).await {
                Ok(_) => proto::ACK_PENDING,
                Err(e) => {
                    error!(uuid = %uuid, error = %e, "Device registration failed");
                    proto::ACK_FAIL
                }
            };
            self.send_encrypted(proto::CMD_AUTH_ACK, &[ack], false)
                .await?;
            return Ok(Flow::Close);
        };

        match existing.auth_status {
            AuthStatus::Pending => {
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_PENDING], false)
                    .await?;
                Ok(Flow::Close)
            }
            AuthStatus::Refused => {
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                    .await?;
                Ok(Flow::Close)
            }
            AuthStatus::Authenticated => match existing.token {
                Some(token) => {
                    let mut ack = Vec::with_capacity(1 + token.len());
                    ack.push(proto::ACK_OK);
                    ack.extend_from_slice(token.as_bytes());
                    self.send_encrypted(proto::CMD_AUTH_ACK, &ack, false)
                        .await?;
                    info!(uuid = %uuid, "Registered device recovered its identity");
                    self.uuid = Some(uuid);
                    self.authenticated = true;
                    Ok(Flow::Continue)
                }
                None => {
                    // Authenticated-without-token is a state the lifecycle
                    // never produces; refuse rather than invent one here.
                    error!(uuid = %uuid, "Authenticated device has no stored token");
                    self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                        .await?;
                    Ok(Flow::Close)
                }
            },
            AuthStatus::Revoked | AuthStatus::Unknown => {
                self.send_encrypted(proto::CMD_AUTH_ACK, &[proto::ACK_FAIL], false)
                    .await?;
                Ok(Flow::Close)
            }
        }
    }

    /// Deliver every pending downlink command, oldest first, each as a
    /// non-ACK encrypted frame.
    async fn drain_downlink(&mut self) -> Result<(), SessionError> {
        let Some(uuid) = self.uuid.clone() else {
            return Ok(());
        };

        while let Some(message) = self.state.runtime.queue_pop(&uuid).await {
            debug!(
                uuid = %uuid,
                cmd = format_args!("0x{:04X}", message.cmd_id),
                "Delivering downlink command"
            );
            self.send_encrypted(message.cmd_id, &message.payload, false)
                .await?;
        }
        Ok(())
    }

    /// Echo an ingestion command back with the ACK flag and empty payload.
    async fn send_ack(&mut self, cmd: u16) -> Result<(), SessionError> {
        self.send_encrypted(cmd, &[], true).await
    }

    async fn send_plain(&mut self, cmd: u16, payload: &[u8]) -> Result<(), SessionError> {
        self.write_seq += 1;
        let frame = proto::pack(payload, cmd, 0, None, self.write_seq, false)?;
        write_frame(&mut self.stream, &frame).await?;
        Ok(())
    }

    async fn send_encrypted(
        &mut self,
        cmd: u16,
        payload: &[u8],
        is_ack: bool,
    ) -> Result<(), SessionError> {
        let key = self.key.as_ref().ok_or(ProtoError::MissingKey)?;
        self.write_seq += 1;
        let frame = proto::pack(payload, cmd, self.key_id, Some(key), self.write_seq, is_ack)?;
        write_frame(&mut self.stream, &frame).await?;
        Ok(())
    }
}
