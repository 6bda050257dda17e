//! Pairing-aware encrypted session.
//!
//! A [`SecureSession`] combines the two directional cipher states of a
//! completed handshake with the pairing decision for the peer. It can be split
//! into a [`SessionSender`] and a [`SessionReceiver`] so that a connection's
//! write loop and read loop each own one direction; both halves observe the
//! same [`PairingFlag`].
//!
//! The two directions fail differently on purpose:
//! - `encrypt` never refuses. Before the handshake it returns
//!   [`NOT_INITIALIZED_PAYLOAD`]; while pairing is pending it encrypts
//!   [`NOT_VERIFIED_PAYLOAD`] instead of the caller's plaintext.
//! - `decrypt` returns an error in both cases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::cipher::{CipherError, CipherState};
use crate::fingerprint::ChannelFingerprint;
use crate::identity::PeerKey;
use crate::noise::HandshakeOutcome;

/// Returned by `encrypt` on a session whose handshake never completed.
pub const NOT_INITIALIZED_PAYLOAD: &[u8] = b"Error: noise session not initialized";

/// Encrypted in place of the caller's plaintext while pairing is pending.
pub const NOT_VERIFIED_PAYLOAD: &[u8] = b"Error: encrypted connection not verified";

/// Session encryption errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("noise session not initialized")]
    NotInitialized,

    #[error("pairing verification has not been done with this client")]
    PairingRequired,

    #[error("decryption failed: {0}")]
    DecryptFailed(CipherError),

    #[error("encryption failed: {0}")]
    EncryptFailed(CipherError),
}

/// Shared "pairing required" flag of one session.
///
/// Cloning shares the flag. It only ever goes from required to not required.
#[derive(Debug, Clone)]
pub struct PairingFlag(Arc<AtomicBool>);

impl PairingFlag {
    pub fn new(required: bool) -> Self {
        Self(Arc::new(AtomicBool::new(required)))
    }

    pub fn is_required(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the peer as verified.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Outbound half of a session.
pub struct SessionSender {
    cipher: Option<CipherState>,
    pairing: PairingFlag,
}

impl SessionSender {
    /// Encrypt a message for sending.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let Some(cipher) = self.cipher.as_mut() else {
            return Ok(NOT_INITIALIZED_PAYLOAD.to_vec());
        };

        let message = if self.pairing.is_required() {
            NOT_VERIFIED_PAYLOAD
        } else {
            plaintext
        };
        cipher.encrypt(message).map_err(SessionError::EncryptFailed)
    }

    /// Next outbound nonce, if initialized.
    pub fn nonce(&self) -> Option<u64> {
        self.cipher.as_ref().map(CipherState::nonce)
    }
}

/// Inbound half of a session.
pub struct SessionReceiver {
    cipher: Option<CipherState>,
    pairing: PairingFlag,
}

impl SessionReceiver {
    /// Decrypt a received message.
    ///
    /// # Errors
    /// A `DecryptFailed` leaves this direction out of step with the peer; the
    /// connection can't continue.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let cipher = self.cipher.as_mut().ok_or(SessionError::NotInitialized)?;
        if self.pairing.is_required() {
            return Err(SessionError::PairingRequired);
        }
        cipher.decrypt(ciphertext).map_err(SessionError::DecryptFailed)
    }

    /// Next inbound nonce, if initialized.
    pub fn nonce(&self) -> Option<u64> {
        self.cipher.as_ref().map(CipherState::nonce)
    }
}

/// Encrypted session bound to one peer.
pub struct SecureSession {
    sender: SessionSender,
    receiver: SessionReceiver,
    peer: Option<PeerKey>,
    fingerprint: Option<ChannelFingerprint>,
}

impl SecureSession {
    /// A session whose handshake has not completed.
    pub fn uninitialized() -> Self {
        let pairing = PairingFlag::new(true);
        Self {
            sender: SessionSender {
                cipher: None,
                pairing: pairing.clone(),
            },
            receiver: SessionReceiver {
                cipher: None,
                pairing,
            },
            peer: None,
            fingerprint: None,
        }
    }

    /// Create from a completed handshake and the pairing decision for its peer.
    pub fn established(outcome: HandshakeOutcome, pairing_required: bool) -> Self {
        let pairing = PairingFlag::new(pairing_required);
        Self {
            sender: SessionSender {
                cipher: Some(outcome.send),
                pairing: pairing.clone(),
            },
            receiver: SessionReceiver {
                cipher: Some(outcome.recv),
                pairing,
            },
            peer: Some(outcome.remote_static),
            fingerprint: Some(ChannelFingerprint::new(outcome.channel_binding)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.sender.cipher.is_some()
    }

    pub fn pairing_required(&self) -> bool {
        self.sender.pairing.is_required()
    }

    /// Handle on the shared pairing flag.
    pub fn pairing_flag(&self) -> PairingFlag {
        self.sender.pairing.clone()
    }

    /// Remote peer's static public key.
    pub fn peer(&self) -> Option<&PeerKey> {
        self.peer.as_ref()
    }

    /// Pairing code for this session.
    pub fn fingerprint(&self) -> Option<&ChannelFingerprint> {
        self.fingerprint.as_ref()
    }

    /// See [`SessionSender::encrypt`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.sender.encrypt(plaintext)
    }

    /// See [`SessionReceiver::decrypt`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.receiver.decrypt(ciphertext)
    }

    pub fn send_nonce(&self) -> Option<u64> {
        self.sender.nonce()
    }

    pub fn recv_nonce(&self) -> Option<u64> {
        self.receiver.nonce()
    }

    /// Split into independently owned directions.
    pub fn split(self) -> (SessionSender, SessionReceiver) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::noise::{Initiator, Responder};

    /// Returns (client session, gateway session) with the given gateway pairing state.
    fn session_pair(pairing_required: bool) -> (SecureSession, SecureSession) {
        let client_identity = StaticIdentity::generate();
        let gateway_identity = StaticIdentity::generate();

        let mut initiator = Initiator::new(&client_identity).unwrap();
        let mut responder = Responder::new(&gateway_identity).unwrap();

        let msg1 = initiator.write_message_1().unwrap();
        responder.read_message_1(&msg1).unwrap();
        let msg2 = responder.write_message_2(&[]).unwrap();
        initiator.read_message_2(&msg2).unwrap();
        let (msg3, client) = initiator.write_message_3(&[]).unwrap();
        let (gateway, _) = responder.read_message_3(&msg3).unwrap();

        (
            SecureSession::established(client, false),
            SecureSession::established(gateway, pairing_required),
        )
    }

    #[test]
    fn test_roundtrip_advances_nonces() {
        let (mut client, mut gateway) = session_pair(false);

        for (i, msg) in [&b"getenv"[..], b"{\"x\":1}", b""].iter().enumerate() {
            let ct = client.encrypt(msg).unwrap();
            assert_eq!(gateway.decrypt(&ct).unwrap(), *msg);
            assert_eq!(client.send_nonce(), Some(i as u64 + 1));
            assert_eq!(gateway.recv_nonce(), Some(i as u64 + 1));

            let ct = gateway.encrypt(msg).unwrap();
            assert_eq!(client.decrypt(&ct).unwrap(), *msg);
            assert_eq!(gateway.send_nonce(), Some(i as u64 + 1));
        }
    }

    #[test]
    fn test_uninitialized_session() {
        let mut session = SecureSession::uninitialized();
        assert!(!session.is_initialized());

        assert_eq!(session.decrypt(b"anything"), Err(SessionError::NotInitialized));
        assert_eq!(session.encrypt(b"secret").unwrap(), NOT_INITIALIZED_PAYLOAD);
        assert_eq!(session.send_nonce(), None);
    }

    #[test]
    fn test_pairing_required_session() {
        let (mut client, mut gateway) = session_pair(true);
        assert!(gateway.pairing_required());

        // Inbound traffic is refused outright; the cipher is not touched.
        let ct = client.encrypt(b"request").unwrap();
        assert_eq!(gateway.decrypt(&ct), Err(SessionError::PairingRequired));
        assert_eq!(gateway.recv_nonce(), Some(0));

        // Outbound traffic is replaced, but still decryptable by the client.
        let ct = gateway.encrypt(b"balance: 21 BTC").unwrap();
        assert_eq!(client.decrypt(&ct).unwrap(), NOT_VERIFIED_PAYLOAD);
        assert_eq!(gateway.send_nonce(), Some(1));
    }

    #[test]
    fn test_clearing_pairing_unlocks_both_halves() {
        let (mut client, gateway) = session_pair(true);
        let flag = gateway.pairing_flag();
        let (mut tx, mut rx) = gateway.split();

        flag.clear();

        let ct = client.encrypt(b"ping").unwrap();
        assert_eq!(rx.decrypt(&ct).unwrap(), b"ping");
        let ct = tx.encrypt(b"pong").unwrap();
        assert_eq!(client.decrypt(&ct).unwrap(), b"pong");
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let (mut client, mut gateway) = session_pair(false);
        let mut ct = client.encrypt(b"payload").unwrap();
        ct[3] ^= 0x55;
        assert_eq!(
            gateway.decrypt(&ct),
            Err(SessionError::DecryptFailed(CipherError::Decrypt))
        );
    }

    #[test]
    fn test_fingerprints_match() {
        let (client, gateway) = session_pair(false);
        assert_eq!(
            client.fingerprint().unwrap().as_str(),
            gateway.fingerprint().unwrap().as_str()
        );
    }
}
