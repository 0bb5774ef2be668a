use thiserror::Error;

/// All errors produced by the lock command/notification protocol and the
/// connection coordinator built on top of it.
#[derive(Debug, Error)]
pub enum LockCtlError {
    #[error("ptls session error: {0}")]
    Ptls(#[from] ptls::PtlsError),

    #[error("lock command {opcode:#04x} failed with result {result:#04x} ({result_name})")]
    CommandFailed {
        opcode: u8,
        result: u8,
        result_name: &'static str,
    },

    #[error("command response too short: expected at least {expected} bytes, got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },

    #[error("unexpected response opcode: expected {expected:#04x}, got {got:#04x}")]
    UnexpectedResponse { expected: u8, got: u8 },

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error("command timed out")]
    CommandTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("cloud API error: {0}")]
    Cloud(String),

    #[error("credential store error: {0}")]
    Credentials(String),

    #[error("auto-pull timed out waiting for the lock to unlock")]
    AutoPullTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LockCtlError>;
