//! Channel binding fingerprint shown to the user during pairing.

use std::fmt;

/// Human-comparable rendering of a session's channel binding hash.
///
/// The hash is base32 encoded and the first twenty characters are shown as
/// four groups of five on two lines:
///
/// ```text
/// ABCDE FGHIJ
/// KLMNO PQRST
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelFingerprint {
    binding: [u8; 32],
    display: String,
}

impl ChannelFingerprint {
    pub fn new(binding: [u8; 32]) -> Self {
        let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: true }, &binding);
        let display = format!(
            "{} {}\n{} {}",
            &encoded[..5],
            &encoded[5..10],
            &encoded[10..15],
            &encoded[15..20]
        );
        Self { binding, display }
    }

    /// Raw channel binding hash (the final handshake hash).
    pub fn binding(&self) -> &[u8; 32] {
        &self.binding
    }

    /// Two-line pairing code.
    pub fn as_str(&self) -> &str {
        &self.display
    }
}

impl fmt::Display for ChannelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for ChannelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelFingerprint({:?})", self.display)
    }
}
