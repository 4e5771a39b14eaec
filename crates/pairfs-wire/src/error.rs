//! Wire-level error type

use pairfs_common::OpsErr;
use thiserror::Error;

/// Errors raised while encoding, decoding or transporting messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic in message header")]
    BadMagic,

    #[error("unknown message type: {0}")]
    UnknownMsgType(u16),

    #[error("message truncated")]
    Truncated,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("message exceeds maximum length: {0} bytes")]
    TooLarge(usize),

    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unexpected response type: expected {expected:?}, got {got:?}")]
    UnexpectedResponse {
        expected: crate::header::MsgType,
        got: crate::header::MsgType,
    },
}

impl WireError {
    /// Collapse to the universal result code. Everything at this layer
    /// is a communication failure from the protocol's point of view;
    /// malformed payloads are structural and not retryable.
    #[must_use]
    pub const fn ops_err(&self) -> OpsErr {
        match self {
            Self::BadMagic | Self::UnknownMsgType(_) | Self::Truncated | Self::Malformed(_)
            | Self::TooLarge(_) => OpsErr::Internal,
            _ => OpsErr::Communication,
        }
    }
}
