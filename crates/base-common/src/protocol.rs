//! Gateway wire framing.
//!
//! Every frame on the transport, in either direction, starts with a one-byte
//! opcode. Control frames and encrypted data frames are therefore told apart by
//! structure, never by comparing payload bytes against magic values.
//!
//! # Frame Format
//!
//! ```text
//! +--------+---------------------------+
//! | opcode |  payload (0..N bytes)     |
//! +--------+---------------------------+
//!
//! 'h'  HandshakeRequest   client -> gateway   empty
//! 'x'  HandshakeMessage   both                one Noise handshake flight
//! 's'  Status             gateway -> client   0x00 success | 0x01 pairing required
//! 'v'  VerifyPairing      client -> gateway   empty
//! 'd'  Data               both                one Noise transport ciphertext
//! ```

use thiserror::Error;

/// Maximum size of an inbound frame, opcode included.
pub const MAX_FRAME_SIZE: usize = 512;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Client asks the gateway to begin the Noise handshake.
    HandshakeRequest = b'h',
    /// One flight of the Noise XX handshake.
    HandshakeMessage = b'x',
    /// Plaintext status byte from the gateway.
    Status = b's',
    /// Client asks the gateway to confirm the pairing code.
    VerifyPairing = b'v',
    /// Encrypted application payload.
    Data = b'd',
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'h' => Ok(Self::HandshakeRequest),
            b'x' => Ok(Self::HandshakeMessage),
            b's' => Ok(Self::Status),
            b'v' => Ok(Self::VerifyPairing),
            b'd' => Ok(Self::Data),
            _ => Err(FrameError::UnknownOpcode(value)),
        }
    }
}

/// Status codes carried by [`Frame::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    /// Handshake request acknowledged, or the peer is paired.
    Success = 0x00,
    /// The peer must confirm the pairing code before exchanging data.
    PairingRequired = 0x01,
}

impl TryFrom<u8> for StatusCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::PairingRequired),
            _ => Err(FrameError::UnknownStatus(value)),
        }
    }
}

/// Frame decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("unknown status code: 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("unexpected payload of {len} bytes for {opcode:?}")]
    UnexpectedPayload { opcode: Opcode, len: usize },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// A decoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    HandshakeRequest,
    HandshakeMessage(Vec<u8>),
    Status(StatusCode),
    VerifyPairing,
    Data(Vec<u8>),
}

impl Frame {
    /// Opcode identifying this frame on the wire.
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::HandshakeRequest => Opcode::HandshakeRequest,
            Frame::HandshakeMessage(_) => Opcode::HandshakeMessage,
            Frame::Status(_) => Opcode::Status,
            Frame::VerifyPairing => Opcode::VerifyPairing,
            Frame::Data(_) => Opcode::Data,
        }
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload: &[u8] = match self {
            Frame::HandshakeRequest | Frame::VerifyPairing => &[],
            Frame::HandshakeMessage(msg) | Frame::Data(msg) => msg,
            Frame::Status(code) => return vec![Opcode::Status as u8, *code as u8],
        };

        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(self.opcode() as u8);
        buf.extend_from_slice(payload);
        buf
    }

    /// Decode a frame from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (&first, payload) = buf.split_first().ok_or(FrameError::Empty)?;
        let opcode = Opcode::try_from(first)?;

        match opcode {
            Opcode::HandshakeRequest | Opcode::VerifyPairing => {
                if !payload.is_empty() {
                    return Err(FrameError::UnexpectedPayload {
                        opcode,
                        len: payload.len(),
                    });
                }
                Ok(if opcode == Opcode::HandshakeRequest {
                    Frame::HandshakeRequest
                } else {
                    Frame::VerifyPairing
                })
            }
            Opcode::Status => match payload {
                [code] => Ok(Frame::Status(StatusCode::try_from(*code)?)),
                _ => Err(FrameError::Malformed("status frame must carry one byte")),
            },
            Opcode::HandshakeMessage => Ok(Frame::HandshakeMessage(payload.to_vec())),
            Opcode::Data => Ok(Frame::Data(payload.to_vec())),
        }
    }
}
