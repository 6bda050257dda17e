//! Static X25519 identities.
//!
//! The gateway owns exactly one [`StaticIdentity`], created on first start and
//! loaded from the identity record afterwards. Peers are identified by the
//! 32-byte static public key they prove during the Noise handshake.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroize;

/// Length of an X25519 key in bytes.
pub const KEY_LEN: usize = 32;

/// Static public key of a remote peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey([u8; KEY_LEN]);

impl PeerKey {
    /// Create a peer key from raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a peer key from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.short())
    }
}

/// The gateway's long-term Diffie-Hellman keypair.
///
/// The private scalar is zeroized on drop.
pub struct StaticIdentity {
    private: [u8; KEY_LEN],
    public: [u8; KEY_LEN],
}

impl StaticIdentity {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut private = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut private);
        let identity = Self::from_private(private);
        private.zeroize();
        identity
    }

    /// Create an identity from a private scalar, deriving the public key.
    pub fn from_private(private: [u8; KEY_LEN]) -> Self {
        let secret = x25519_dalek::StaticSecret::from(private);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            private,
            public: *public.as_bytes(),
        }
    }

    /// Restore a stored keypair.
    ///
    /// Returns `None` if either part has the wrong length or the public key
    /// does not belong to the private scalar.
    pub fn from_parts(private: &[u8], public: &[u8]) -> Option<Self> {
        let mut scalar: [u8; KEY_LEN] = private.try_into().ok()?;
        let identity = Self::from_private(scalar);
        scalar.zeroize();
        (identity.public.as_slice() == public).then_some(identity)
    }

    /// Get the public key bytes.
    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    /// Get the private key bytes.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.private
    }
}

impl Drop for StaticIdentity {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl fmt::Debug for StaticIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticIdentity")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = StaticIdentity::generate();
        let b = StaticIdentity::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let identity = StaticIdentity::generate();
        let restored =
            StaticIdentity::from_parts(identity.private_key(), identity.public_key()).unwrap();
        assert_eq!(restored.public_key(), identity.public_key());
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let a = StaticIdentity::generate();
        let b = StaticIdentity::generate();
        assert!(StaticIdentity::from_parts(a.private_key(), b.public_key()).is_none());
        assert!(StaticIdentity::from_parts(&a.private_key()[..31], a.public_key()).is_none());
    }

    #[test]
    fn test_peer_key_from_slice() {
        assert!(PeerKey::from_slice(&[7u8; 32]).is_some());
        assert!(PeerKey::from_slice(&[7u8; 31]).is_none());
        assert!(PeerKey::from_slice(&[7u8; 33]).is_none());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let identity = StaticIdentity::generate();
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains(&hex::encode(identity.private_key())));
    }
}
