//! Noise Protocol handshake implementation.
//!
//! Uses Noise XX pattern: `Noise_XX_25519_ChaChaPoly_SHA256`
//!
//! # Handshake Flow
//!
//! ```text
//! Initiator (Client)                    Responder (Gateway)
//!     |                                       |
//!     |  -> e                                 |  ephemeral key
//!     |-------------------------------------->|
//!     |                                       |
//!     |  <- e, ee, s, es                      |  ephemeral, static
//!     |<--------------------------------------|
//!     |                                       |
//!     |  -> s, se                             |  static key
//!     |-------------------------------------->|
//!     |                                       |
//!     [  Split into two directional ciphers   ]
//! ```
//!
//! The handshake types here are sans-IO: callers move the flights over
//! whatever transport they have. Completing a handshake consumes the state, so
//! a handshake can never be resumed or reused for a second connection.

use snow::{Builder, HandshakeState};
use thiserror::Error;
use zeroize::Zeroize;

use crate::cipher::CipherState;
use crate::identity::{PeerKey, StaticIdentity, KEY_LEN};

/// Noise protocol pattern (XX with X25519, ChaCha20-Poly1305, SHA-256)
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Prologue bound into every handshake transcript.
pub const PROLOGUE: &[u8] = b"Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum message size for Noise handshake
const MAX_HANDSHAKE_MSG_SIZE: usize = 65535;

/// Noise handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake message out of order")]
    OutOfOrder,

    #[error("handshake did not finish after the final message")]
    Incomplete,

    #[error("remote static key missing")]
    MissingRemoteKey,

    #[error("invalid remote static key length: {0}")]
    InvalidRemoteKey(usize),

    #[error("invalid handshake hash length: {0}")]
    InvalidHash(usize),

    #[error("snow error: {0}")]
    Snow(#[from] snow::Error),
}

/// Result of a completed handshake.
pub struct HandshakeOutcome {
    /// Peer's authenticated static public key.
    pub remote_static: PeerKey,
    /// Hash of the full transcript, used as channel binding.
    pub channel_binding: [u8; 32],
    /// Cipher state for traffic we send.
    pub send: CipherState,
    /// Cipher state for traffic we receive.
    pub recv: CipherState,
}

fn build(identity: &StaticIdentity, initiator: bool) -> Result<HandshakeState, HandshakeError> {
    let builder = Builder::new(NOISE_PATTERN.parse()?)
        .prologue(PROLOGUE)
        .local_private_key(identity.private_key());

    let state = if initiator {
        builder.build_initiator()?
    } else {
        builder.build_responder()?
    };
    Ok(state)
}

fn write(state: &mut HandshakeState, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_SIZE];
    let len = state.write_message(payload, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

fn read(state: &mut HandshakeState, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_SIZE];
    let len = state.read_message(message, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Extract peer key, binding hash and the two directional ciphers.
fn finish(mut state: HandshakeState, initiator: bool) -> Result<HandshakeOutcome, HandshakeError> {
    if !state.is_handshake_finished() {
        return Err(HandshakeError::Incomplete);
    }

    let remote = state
        .get_remote_static()
        .ok_or(HandshakeError::MissingRemoteKey)?;
    if remote.len() != KEY_LEN {
        return Err(HandshakeError::InvalidRemoteKey(remote.len()));
    }
    let remote_static =
        PeerKey::from_slice(remote).ok_or(HandshakeError::InvalidRemoteKey(remote.len()))?;

    let hash = state.get_handshake_hash();
    let channel_binding: [u8; 32] = hash
        .try_into()
        .map_err(|_| HandshakeError::InvalidHash(hash.len()))?;

    // Split order is fixed by Noise: (initiator -> responder, responder -> initiator).
    let (mut i2r, mut r2i) = state.dangerously_get_raw_split();
    let (send, recv) = if initiator {
        (CipherState::new(&i2r), CipherState::new(&r2i))
    } else {
        (CipherState::new(&r2i), CipherState::new(&i2r))
    };
    i2r.zeroize();
    r2i.zeroize();

    Ok(HandshakeOutcome {
        remote_static,
        channel_binding,
        send,
        recv,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponderStep {
    ReadMessage1,
    WriteMessage2,
    ReadMessage3,
}

/// Noise handshake responder (gateway side).
pub struct Responder {
    state: Box<HandshakeState>,
    step: ResponderStep,
}

impl Responder {
    /// Create a fresh responder bound to the gateway's static identity.
    pub fn new(identity: &StaticIdentity) -> Result<Self, HandshakeError> {
        Ok(Self {
            state: Box::new(build(identity, false)?),
            step: ResponderStep::ReadMessage1,
        })
    }

    /// Process the first handshake message (-> e).
    ///
    /// Returns any payload included by the initiator (usually empty).
    pub fn read_message_1(&mut self, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if self.step != ResponderStep::ReadMessage1 {
            return Err(HandshakeError::OutOfOrder);
        }
        let payload = read(&mut self.state, message)?;
        self.step = ResponderStep::WriteMessage2;
        Ok(payload)
    }

    /// Generate the second handshake message (<- e, ee, s, es).
    pub fn write_message_2(&mut self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if self.step != ResponderStep::WriteMessage2 {
            return Err(HandshakeError::OutOfOrder);
        }
        let message = write(&mut self.state, payload)?;
        self.step = ResponderStep::ReadMessage3;
        Ok(message)
    }

    /// Process the third handshake message (-> s, se) and complete the handshake.
    ///
    /// Returns the outcome and any payload from the initiator.
    pub fn read_message_3(
        mut self,
        message: &[u8],
    ) -> Result<(HandshakeOutcome, Vec<u8>), HandshakeError> {
        if self.step != ResponderStep::ReadMessage3 {
            return Err(HandshakeError::OutOfOrder);
        }
        let payload = read(&mut self.state, message)?;
        Ok((finish(*self.state, false)?, payload))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitiatorStep {
    WriteMessage1,
    ReadMessage2,
    WriteMessage3,
}

/// Noise handshake initiator (companion client side).
pub struct Initiator {
    state: Box<HandshakeState>,
    step: InitiatorStep,
}

impl Initiator {
    /// Create a fresh initiator with the client's static identity.
    pub fn new(identity: &StaticIdentity) -> Result<Self, HandshakeError> {
        Ok(Self {
            state: Box::new(build(identity, true)?),
            step: InitiatorStep::WriteMessage1,
        })
    }

    /// Generate the first handshake message (-> e).
    pub fn write_message_1(&mut self) -> Result<Vec<u8>, HandshakeError> {
        if self.step != InitiatorStep::WriteMessage1 {
            return Err(HandshakeError::OutOfOrder);
        }
        let message = write(&mut self.state, &[])?;
        self.step = InitiatorStep::ReadMessage2;
        Ok(message)
    }

    /// Process the second handshake message (<- e, ee, s, es).
    pub fn read_message_2(&mut self, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if self.step != InitiatorStep::ReadMessage2 {
            return Err(HandshakeError::OutOfOrder);
        }
        let payload = read(&mut self.state, message)?;
        self.step = InitiatorStep::WriteMessage3;
        Ok(payload)
    }

    /// Generate the third handshake message (-> s, se) and complete the handshake.
    pub fn write_message_3(
        mut self,
        payload: &[u8],
    ) -> Result<(Vec<u8>, HandshakeOutcome), HandshakeError> {
        if self.step != InitiatorStep::WriteMessage3 {
            return Err(HandshakeError::OutOfOrder);
        }
        let message = write(&mut self.state, payload)?;
        Ok((message, finish(*self.state, true)?))
    }
}
