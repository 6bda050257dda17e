//! Per-connection errors.
//!
//! Every variant ends only the connection it was raised on. None of them is
//! reported to the peer beyond the socket closing.

use std::time::Duration;
use thiserror::Error;

use base_common::FrameError;
use base_crypto::{HandshakeError, SessionError};

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("decrypt failed: {0}")]
    DecryptFailed(SessionError),

    #[error("encrypt failed: {0}")]
    EncryptFailed(SessionError),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    OversizedFrame { len: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ConnectionError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this is the peer closing the transport rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err.to_string())
    }
}
