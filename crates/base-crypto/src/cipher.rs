//! One-directional Noise cipher state.
//!
//! A [`CipherState`] is the AEAD key plus the nonce counter for one direction
//! of an established session. The nonce layout is the Noise ChaChaPoly one:
//! four zero bytes followed by the 64-bit counter in little-endian order, with
//! empty associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use thiserror::Error;

/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Maximum Noise transport message length (ciphertext, tag included).
pub const MAX_MESSAGE_LEN: usize = 65535;

/// Cipher state errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("nonce space exhausted")]
    NonceExhausted,

    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("authentication failed")]
    Decrypt,
}

/// AEAD key and nonce counter for one direction of traffic.
pub struct CipherState {
    cipher: ChaCha20Poly1305,
    nonce: u64,
}

impl CipherState {
    /// Create a cipher state with a fresh nonce counter.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
            nonce: 0,
        }
    }

    /// Nonce that the next successful operation will use.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Encrypt one message, advancing the nonce by one.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if plaintext.len() + TAG_LEN > MAX_MESSAGE_LEN {
            return Err(CipherError::MessageTooLong(plaintext.len()));
        }
        let nonce = self.next_nonce()?;

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt one message, advancing the nonce by one on success.
    ///
    /// A failed authentication leaves the counter untouched; the stream is
    /// out of step with the sender from then on.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CipherError::TooShort(ciphertext.len()));
        }
        if ciphertext.len() > MAX_MESSAGE_LEN {
            return Err(CipherError::MessageTooLong(ciphertext.len()));
        }
        let nonce = self.next_nonce()?;

        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        self.nonce += 1;
        Ok(plaintext)
    }

    fn next_nonce(&self) -> Result<Nonce, CipherError> {
        // 2^64 - 1 is reserved by Noise.
        if self.nonce == u64::MAX {
            return Err(CipherError::NonceExhausted);
        }
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes[4..12].copy_from_slice(&self.nonce.to_le_bytes());
        Ok(Nonce::from(nonce_bytes))
    }

    #[cfg(test)]
    fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (CipherState, CipherState) {
        let key = [0x42u8; 32];
        (CipherState::new(&key), CipherState::new(&key))
    }

    #[test]
    fn test_encrypt_decrypt_in_order() {
        let (mut tx, mut rx) = pair();

        for msg in [&b"first"[..], b"second", b""] {
            let ct = tx.encrypt(msg).unwrap();
            assert_eq!(ct.len(), msg.len() + TAG_LEN);
            assert_eq!(rx.decrypt(&ct).unwrap(), msg);
        }
        assert_eq!(tx.nonce(), 3);
        assert_eq!(rx.nonce(), 3);
    }

    #[test]
    fn test_out_of_order_fails() {
        let (mut tx, mut rx) = pair();
        let _first = tx.encrypt(b"first").unwrap();
        let second = tx.encrypt(b"second").unwrap();

        assert_eq!(rx.decrypt(&second), Err(CipherError::Decrypt));
        assert_eq!(rx.nonce(), 0);
    }

    #[test]
    fn test_tamper_detection() {
        let (mut tx, mut rx) = pair();
        let mut ct = tx.encrypt(b"sensitive data").unwrap();
        ct[0] ^= 0xff;
        assert_eq!(rx.decrypt(&ct), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let (_, mut rx) = pair();
        assert_eq!(rx.decrypt(&[0u8; 15]), Err(CipherError::TooShort(15)));
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let (mut tx, _) = pair();
        let big = vec![0u8; MAX_MESSAGE_LEN];
        assert!(matches!(
            tx.encrypt(&big),
            Err(CipherError::MessageTooLong(_))
        ));
        assert_eq!(tx.nonce(), 0);
    }

    #[test]
    fn test_reserved_nonce_is_never_used() {
        let (mut tx, _) = pair();
        tx.set_nonce(u64::MAX - 1);
        assert!(tx.encrypt(b"last").is_ok());
        assert_eq!(tx.encrypt(b"one too many"), Err(CipherError::NonceExhausted));
    }

    #[test]
    fn test_nonce_layout_matches_noise() {
        // Reference: first ChaChaPoly message under Noise uses an all-zero nonce.
        let key = [7u8; 32];
        let mut state = CipherState::new(&key);
        let ct = state.encrypt(b"noise").unwrap();

        let reference = ChaCha20Poly1305::new((&key).into())
            .encrypt(&Nonce::from([0u8; 12]), &b"noise"[..])
            .unwrap();
        assert_eq!(ct, reference);
    }
}
