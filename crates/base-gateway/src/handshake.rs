//! Responder side of the pre-operational exchange.
//!
//! ```text
//! client                         gateway
//!   'h'                  ------>
//!                        <------  's' 0x00
//!   'x' msg1 (-> e)      ------>
//!                        <------  'x' msg2 (<- e, ee, s, es)
//!   'x' msg3 (-> s, se)  ------>
//!                        <------  's' 0x00 paired | 0x01 pairing required
//! ```
//!
//! The final status is sent by the engine once the application is attached.

use base_common::{Frame, StatusCode};
use base_crypto::{PeerKey, Responder, SecureSession, StaticIdentity};

use crate::error::ConnectionError;
use crate::pairing::PairingGate;
use crate::transport::{recv_frame, send_frame, FrameSink, FrameStream};

/// A completed handshake with its pairing decision.
pub struct Established {
    pub session: SecureSession,
    pub peer: PeerKey,
}

impl Established {
    /// Status to report to the client.
    pub fn status(&self) -> StatusCode {
        if self.session.pairing_required() {
            StatusCode::PairingRequired
        } else {
            StatusCode::Success
        }
    }
}

/// Run the trigger exchange and the three Noise flights.
pub async fn perform_handshake<Si, St>(
    sink: &mut Si,
    stream: &mut St,
    identity: &StaticIdentity,
    gate: &PairingGate,
) -> Result<Established, ConnectionError>
where
    Si: FrameSink,
    St: FrameStream,
{
    match recv_frame(stream).await? {
        Frame::HandshakeRequest => {}
        other => {
            return Err(ConnectionError::protocol(format!(
                "expected handshake request, got {:?}",
                other.opcode()
            )))
        }
    }
    send_frame(sink, &Frame::Status(StatusCode::Success)).await?;

    let mut responder = Responder::new(identity)?;

    let msg1 = expect_handshake_message(stream).await?;
    responder.read_message_1(&msg1)?;
    let msg2 = responder.write_message_2(&[])?;
    send_frame(sink, &Frame::HandshakeMessage(msg2)).await?;

    let msg3 = expect_handshake_message(stream).await?;
    let (outcome, _payload) = responder.read_message_3(&msg3)?;

    let peer = outcome.remote_static;
    let pairing_required = gate.evaluate(&peer).await;

    Ok(Established {
        session: SecureSession::established(outcome, pairing_required),
        peer,
    })
}

async fn expect_handshake_message<St: FrameStream>(
    stream: &mut St,
) -> Result<Vec<u8>, ConnectionError> {
    match recv_frame(stream).await? {
        Frame::HandshakeMessage(message) => Ok(message),
        other => Err(ConnectionError::protocol(format!(
            "expected handshake message, got {:?}",
            other.opcode()
        ))),
    }
}
