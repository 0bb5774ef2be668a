//! PTLS error types.

use thiserror::Error;

/// Named PTLS alert codes sent by the device during or after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCode {
    Ok,
    Generic,
    NoTrustedTime,
    SessionTimeout,
    Disconnected,
    InvalidCertificate,
    DeviceUnregistered,
    Unknown(u8),
}

impl AlertCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => AlertCode::Ok,
            0x01 => AlertCode::Generic,
            0x02 => AlertCode::NoTrustedTime,
            0x03 => AlertCode::SessionTimeout,
            0x04 => AlertCode::Disconnected,
            0x05 => AlertCode::InvalidCertificate,
            0x06 => AlertCode::DeviceUnregistered,
            other => AlertCode::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AlertCode::Ok => 0x00,
            AlertCode::Generic => 0x01,
            AlertCode::NoTrustedTime => 0x02,
            AlertCode::SessionTimeout => 0x03,
            AlertCode::Disconnected => 0x04,
            AlertCode::InvalidCertificate => 0x05,
            AlertCode::DeviceUnregistered => 0x06,
            AlertCode::Unknown(b) => b,
        }
    }
}

impl std::fmt::Display for AlertCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertCode::Ok => "OK",
            AlertCode::Generic => "generic error",
            AlertCode::NoTrustedTime => "no trusted time",
            AlertCode::SessionTimeout => "session timeout (24h)",
            AlertCode::Disconnected => "disconnected",
            AlertCode::InvalidCertificate => "invalid certificate",
            AlertCode::DeviceUnregistered => "device unregistered",
            AlertCode::Unknown(_) => "unknown",
        };
        write!(f, "{name} (0x{:02x})", self.code())
    }
}

/// All errors produced by the PTLS crate.
#[derive(Debug, Error)]
pub enum PtlsError {
    #[error("PTLS alert: {0}")]
    Alert(AlertCode),

    #[error("handshake frame malformed: {0}")]
    MalformedFrame(String),

    #[error("unexpected handshake message: expected 0x{expected:02x}, got 0x{got:02x}")]
    UnexpectedMessage { expected: u8, got: u8 },

    #[error("server verify failed: {0}")]
    ServerVerifyFailed(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    #[error("AEAD decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("session is not established")]
    NotEstablished,

    #[error("session record counter exhausted (session must be recreated)")]
    CounterExhausted,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport read timed out")]
    Timeout,

    #[error("transport disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, PtlsError>;
