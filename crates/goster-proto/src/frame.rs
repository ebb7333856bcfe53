//! Frame packing and decoding.
//!
//! Header layout (all little-endian):
//!
//! ```text
//! 0   Magic(2)  Version(1)  Flags(1)  Status(2)  CmdID(2)
//! 8   KeyID(4)  PayloadLen(4)
//! 16  Salt(4)   SeqNonce(8)
//! 28  HeaderCRC16(2)  Padding(2)
//! 32  Payload...      Footer(16)
//! ```
//!
//! The GCM nonce is bytes 16..28 (salt || sequence counter) and the AAD is
//! bytes 0..28, so an encrypted frame's header cannot be altered without
//! failing the tag check. Plaintext frames instead carry a CRC-32 over
//! header || payload in the first four footer bytes.

use crc::{Crc, CRC_16_MODBUS, CRC_32_ISO_HDLC};
use rand::rngs::OsRng;
use rand::RngCore;

use goster_crypto::{SessionKey, NONCE_SIZE};

use crate::error::ProtoError;
use crate::{
    FLAG_ACK, FLAG_ENCRYPTED, FOOTER_SIZE, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Header span covered by the CRC-16 and used as GCM AAD.
const AAD_LEN: usize = 28;

/// Offset of the GCM nonce within the header.
const NONCE_OFFSET: usize = 16;

/// A fully decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Packet {
    pub cmd: u16,
    pub key_id: u32,
    pub seq_nonce: u64,
    pub is_ack: bool,
    pub is_encrypted: bool,
    pub payload: Vec<u8>,
}

/// A validated header whose body has not been read yet.
///
/// Produced by [`decode_header`]; tells the caller how many body bytes to
/// read before handing both back to [`decode_body`].
#[derive(Debug, Clone)]
pub struct FrameHeader {
    raw: [u8; HEADER_SIZE],
    pub cmd: u16,
    pub key_id: u32,
    pub seq_nonce: u64,
    pub flags: u8,
    pub payload_len: usize,
}

impl FrameHeader {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }

    /// Bytes remaining on the wire after the header: payload plus footer.
    pub fn body_len(&self) -> usize {
        self.payload_len + FOOTER_SIZE
    }

    fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.raw[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);
        nonce
    }

    fn aad(&self) -> &[u8] {
        &self.raw[..AAD_LEN]
    }
}

/// Assemble a complete outbound frame.
///
/// The frame is encrypted when a key is supplied together with a non-zero
/// `key_id`; the payload is sealed in place and the GCM tag fills the
/// footer. Otherwise the payload travels in the clear with a CRC-32 footer.
/// `seq_nonce` must be unique per direction under a given key; the session
/// loop guarantees that with its monotonic write sequence.
pub fn pack(
    payload: &[u8],
    cmd: u16,
    key_id: u32,
    key: Option<&SessionKey>,
    seq_nonce: u64,
    is_ack: bool,
) -> Result<Vec<u8>, ProtoError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }

    let cipher = match key {
        Some(key) if key_id != 0 => Some(key),
        _ => None,
    };

    let mut flags = 0u8;
    if is_ack {
        flags |= FLAG_ACK;
    }
    if cipher.is_some() {
        flags |= FLAG_ENCRYPTED;
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + FOOTER_SIZE);
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.push(PROTOCOL_VERSION);
    buf.push(flags);
    buf.extend_from_slice(&0u16.to_le_bytes()); // status, reserved
    buf.extend_from_slice(&cmd.to_le_bytes());
    buf.extend_from_slice(&key_id.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());

    let mut salt = [0u8; 4];
    OsRng.fill_bytes(&mut salt);
    buf.extend_from_slice(&salt);
    buf.extend_from_slice(&seq_nonce.to_le_bytes());

    let header_crc = CRC16.checksum(&buf[..AAD_LEN]);
    buf.extend_from_slice(&header_crc.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // padding

    match cipher {
        Some(key) => {
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&buf[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);
            let sealed = key.seal(&nonce, &buf[..AAD_LEN], payload)?;
            buf.extend_from_slice(&sealed);
        }
        None => {
            buf.extend_from_slice(payload);
            let sum = CRC32.checksum(&buf);
            let mut footer = [0u8; FOOTER_SIZE];
            footer[..4].copy_from_slice(&sum.to_le_bytes());
            buf.extend_from_slice(&footer);
        }
    }

    Ok(buf)
}

/// Validate and parse the fixed 32-byte header.
///
/// Checks the magic and the header CRC-16, and rejects oversize payload
/// lengths before the caller allocates a body buffer.
pub fn decode_header(raw: &[u8; HEADER_SIZE]) -> Result<FrameHeader, ProtoError> {
    let magic = u16::from_le_bytes([raw[0], raw[1]]);
    if magic != MAGIC {
        return Err(ProtoError::InvalidMagic(magic));
    }

    let expected = u16::from_le_bytes([raw[28], raw[29]]);
    let actual = CRC16.checksum(&raw[..AAD_LEN]);
    if expected != actual {
        return Err(ProtoError::HeaderCrc { expected, actual });
    }

    let flags = raw[3];
    let cmd = u16::from_le_bytes([raw[6], raw[7]]);
    let key_id = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
    let payload_len = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]) as usize;
    let seq_nonce = u64::from_le_bytes([
        raw[20], raw[21], raw[22], raw[23], raw[24], raw[25], raw[26], raw[27],
    ]);

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtoError::PayloadTooLarge(payload_len));
    }

    Ok(FrameHeader {
        raw: *raw,
        cmd,
        key_id,
        seq_nonce,
        flags,
        payload_len,
    })
}

/// Decode the body read after [`decode_header`].
///
/// `body` must be exactly [`FrameHeader::body_len`] bytes. Encrypted frames
/// treat the whole body as `ciphertext || tag` and open it against the
/// header AAD; plaintext frames are checked against the CRC-32 footer.
pub fn decode_body(
    header: &FrameHeader,
    body: &[u8],
    key: Option<&SessionKey>,
) -> Result<Packet, ProtoError> {
    if body.len() != header.body_len() {
        return Err(ProtoError::BodyLength {
            expected: header.body_len(),
            actual: body.len(),
        });
    }

    let payload = if header.is_encrypted() {
        let key = key.ok_or(ProtoError::MissingKey)?;
        key.open(&header.nonce(), header.aad(), body)?
    } else {
        let raw_payload = &body[..header.payload_len];
        let footer = &body[header.payload_len..];

        let mut digest = CRC32.digest();
        digest.update(&header.raw);
        digest.update(raw_payload);
        let actual = digest.finalize();

        let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if expected != actual {
            return Err(ProtoError::PayloadCrc { expected, actual });
        }
        raw_payload.to_vec()
    };

    Ok(Packet {
        cmd: header.cmd,
        key_id: header.key_id,
        seq_nonce: header.seq_nonce,
        is_ack: header.is_ack(),
        is_encrypted: header.is_encrypted(),
        payload,
    })
}

/// Decode a complete frame held in memory.
pub fn decode(frame: &[u8], key: Option<&SessionKey>) -> Result<Packet, ProtoError> {
    if frame.len() < HEADER_SIZE {
        return Err(ProtoError::BodyLength {
            expected: HEADER_SIZE,
            actual: frame.len(),
        });
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&frame[..HEADER_SIZE]);
    let header = decode_header(&raw)?;
    decode_body(&header, &frame[HEADER_SIZE..], key)
}
