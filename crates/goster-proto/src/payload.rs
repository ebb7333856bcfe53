//! Business payload layouts carried inside Goster-WY frames.
//!
//! These are plain byte-level structs; validation beyond structural shape
//! (such as which metric kinds a deployment accepts) belongs to the
//! ingestion layer.

use crate::error::ProtoError;

/// Field separator in the registration payload (ASCII record separator).
pub const FIELD_SEP: u8 = 0x1E;

/// Fixed prefix of a metrics payload: start(8) + interval(4) + type(1) + count(4).
const METRICS_HEAD: usize = 17;

/// Fixed prefix of a log payload: timestamp(8) + level(1) + msg_len(2).
const LOG_HEAD: usize = 11;

/// Metric type codes the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Generic = 0,
    Temperature = 1,
    Humidity = 2,
    Lux = 4,
}

impl MetricKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Generic),
            1 => Some(Self::Temperature),
            2 => Some(Self::Humidity),
            4 => Some(Self::Lux),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A decoded metrics batch.
///
/// Point `i` is sampled at `start_ts + i * interval_ms` milliseconds.
#[derive(Debug, Clone)]
pub struct MetricsBatch {
    pub start_ts: i64,
    pub interval_ms: u32,
    pub kind: MetricKind,
    pub values: Vec<f32>,
}

impl MetricsBatch {
    /// Parse `start_ts u64 || interval u32 || type u8 || count u32 || count × f32`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < METRICS_HEAD {
            return Err(ProtoError::malformed(
                "metrics",
                format!("{} bytes, need at least {METRICS_HEAD}", data.len()),
            ));
        }

        let start_ts = i64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]);
        let interval_ms = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let type_code = data[12];
        let count = u32::from_le_bytes([data[13], data[14], data[15], data[16]]) as usize;

        let kind = MetricKind::from_code(type_code).ok_or_else(|| {
            ProtoError::malformed("metrics", format!("unsupported type code {type_code}"))
        })?;

        let blob = &data[METRICS_HEAD..];
        if blob.len() != count * 4 {
            return Err(ProtoError::malformed(
                "metrics",
                format!("blob is {} bytes, count {count} needs {}", blob.len(), count * 4),
            ));
        }

        let values = blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            start_ts,
            interval_ms,
            kind,
            values,
        })
    }

    /// Serialize for transmission (the device side of the wire).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(METRICS_HEAD + self.values.len() * 4);
        buf.extend_from_slice(&self.start_ts.to_le_bytes());
        buf.extend_from_slice(&self.interval_ms.to_le_bytes());
        buf.push(self.kind.code());
        buf.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Timestamp of point `i`, in milliseconds.
    pub fn timestamp_of(&self, i: usize) -> i64 {
        self.start_ts + i as i64 * i64::from(self.interval_ms)
    }
}

/// Log severity carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Unknown,
}

impl LogLevel {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warn => 2,
            Self::Error => 3,
            Self::Unknown => 0xFF,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A device log line.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Device-supplied timestamp, milliseconds.
    pub ts: i64,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    /// Parse `ts u64 || level u8 || msg_len u16 || msg`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < LOG_HEAD {
            return Err(ProtoError::malformed(
                "log",
                format!("{} bytes, need at least {LOG_HEAD}", data.len()),
            ));
        }

        let ts = i64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]);
        let level = LogLevel::from_code(data[8]);
        let msg_len = u16::from_le_bytes([data[9], data[10]]) as usize;

        if data.len() < LOG_HEAD + msg_len {
            return Err(ProtoError::malformed(
                "log",
                format!("message truncated: {} of {msg_len} bytes", data.len() - LOG_HEAD),
            ));
        }

        let message = String::from_utf8_lossy(&data[LOG_HEAD..LOG_HEAD + msg_len]).into_owned();

        Ok(Self { ts, level, message })
    }

    /// Serialize for transmission (the device side of the wire).
    pub fn to_bytes(&self) -> Vec<u8> {
        let msg = self.message.as_bytes();
        let mut buf = Vec::with_capacity(LOG_HEAD + msg.len());
        buf.extend_from_slice(&self.ts.to_le_bytes());
        buf.push(self.level.code());
        buf.extend_from_slice(&(msg.len() as u16).to_le_bytes());
        buf.extend_from_slice(msg);
        buf
    }
}

/// Device self-description submitted with `CMD_DEVICE_REGISTER`:
/// six record-separator-delimited UTF-8 fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub hw_version: String,
    pub sw_version: String,
    pub config_version: String,
}

impl RegisterInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ProtoError::malformed("register", e.to_string()))?;

        let mut parts = text.split(FIELD_SEP as char);
        let mut next = |field: &'static str| {
            parts
                .next()
                .map(str::to_owned)
                .ok_or_else(|| ProtoError::malformed("register", format!("missing field {field}")))
        };

        Ok(Self {
            name: next("name")?,
            serial_number: next("serial_number")?,
            mac_address: next("mac_address")?,
            hw_version: next("hw_version")?,
            sw_version: next("sw_version")?,
            config_version: next("config_version")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [
            self.name.as_str(),
            self.serial_number.as_str(),
            self.mac_address.as_str(),
            self.hw_version.as_str(),
            self.sw_version.as_str(),
            self.config_version.as_str(),
        ]
        .join("\u{1e}")
        .into_bytes()
    }
}
