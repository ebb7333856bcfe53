//! Goster-WY wire protocol - framing, integrity, and payload layouts.
//!
//! Every frame is a fixed 32-byte little-endian header, a business payload,
//! and a fixed 16-byte footer. Plaintext frames carry a CRC-32 in the
//! footer; encrypted frames carry the AES-GCM tag there instead, with the
//! header itself authenticated as AAD. The codec is stateless: session keys
//! and sequence counters are supplied by the caller on every operation.

pub mod async_io;
pub mod error;
pub mod frame;
pub mod payload;

pub use error::ProtoError;
pub use frame::{decode, decode_body, decode_header, pack, FrameHeader, Packet};

/// Frame magic, "WY" little-endian.
pub const MAGIC: u16 = 0x5759;

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed header width.
pub const HEADER_SIZE: usize = 32;

/// Fixed footer width (CRC-32 + padding, or the GCM tag).
pub const FOOTER_SIZE: usize = 16;

/// Hard ceiling on the plaintext business payload.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

// Header flag bits.
pub const FLAG_ACK: u8 = 0x01;
pub const FLAG_ENCRYPTED: u8 = 0x02;
/// Reserved; never set by this implementation.
pub const FLAG_COMPRESSED: u8 = 0x04;

// Command registry. Device → server unless noted.
pub const CMD_HANDSHAKE_INIT: u16 = 0x0001;
/// Server → device.
pub const CMD_HANDSHAKE_RESP: u16 = 0x0002;
pub const CMD_AUTH_VERIFY: u16 = 0x0003;
/// Server → device.
pub const CMD_AUTH_ACK: u16 = 0x0004;
pub const CMD_DEVICE_REGISTER: u16 = 0x0005;
pub const CMD_ERROR_REPORT: u16 = 0x00FF;
pub const CMD_METRICS_REPORT: u16 = 0x0101;
pub const CMD_LOG_REPORT: u16 = 0x0102;
pub const CMD_EVENT_REPORT: u16 = 0x0103;
pub const CMD_HEARTBEAT: u16 = 0x0104;
pub const CMD_KEY_EXCHANGE_UPLINK: u16 = 0x0105;
/// Server → device.
pub const CMD_CONFIG_PUSH: u16 = 0x0201;
/// Server → device.
pub const CMD_OTA_DATA: u16 = 0x0202;
/// Server → device.
pub const CMD_ACTION_EXEC: u16 = 0x0203;
/// Server → device.
pub const CMD_SCREEN_WY: u16 = 0x0204;
/// Server → device, sealed under the freshly rotated key.
pub const CMD_KEY_EXCHANGE_DOWNLINK: u16 = 0x0205;

// Status bytes carried in `CMD_AUTH_ACK` payloads.
pub const ACK_OK: u8 = 0x00;
pub const ACK_FAIL: u8 = 0x01;
pub const ACK_PENDING: u8 = 0x02;
