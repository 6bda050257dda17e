//! Cryptographic core of the base gateway.
//!
//! This crate provides:
//! - The gateway's static X25519 identity and the persisted set of trusted peers
//! - Noise XX handshake (responder for the gateway, initiator for companion clients)
//! - Per-direction cipher states and the pairing-aware secure session
//! - The human-comparable channel binding fingerprint
//!
//! # Design
//!
//! Uses the Noise XX pattern (`Noise_XX_25519_ChaChaPoly_SHA256`) which provides:
//! - Mutual authentication (both peers prove possession of a static key)
//! - No prior key exchange (first contact is authenticated by pairing)
//! - Forward secrecy (ephemeral keys per session)
//!
//! After the handshake the two directions are split into independent cipher
//! states so that a connection's read and write loops each own exactly one.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod fingerprint;
pub mod identity;
pub mod noise;
pub mod session;
pub mod store;

pub use cipher::{CipherError, CipherState};
pub use fingerprint::ChannelFingerprint;
pub use identity::{PeerKey, StaticIdentity};
pub use noise::{HandshakeError, HandshakeOutcome, Initiator, Responder};
pub use session::{PairingFlag, SecureSession, SessionError, SessionReceiver, SessionSender};
pub use store::{IdentityStore, StoreError};
