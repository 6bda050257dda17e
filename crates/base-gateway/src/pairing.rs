//! Pairing decisions for completed handshakes.
//!
//! A peer whose static key is in the trusted set is paired straight away.
//! Anyone else stays restricted until the client asks for verification and
//! the [`ConfirmationPolicy`] approves the channel fingerprint, after which the
//! key is persisted.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use base_common::StatusCode;
use base_crypto::{ChannelFingerprint, IdentityStore, PairingFlag, PeerKey};

/// Decides whether a pairing request is approved.
pub trait ConfirmationPolicy: Send + Sync {
    fn confirm<'a>(&'a self, fingerprint: &'a ChannelFingerprint) -> BoxFuture<'a, bool>;
}

/// Approves every request after a fixed delay.
///
/// The delay gives the user time to compare the pairing code on both ends.
#[derive(Debug, Clone, Copy)]
pub struct DelayedConfirmation {
    delay: Duration,
}

impl DelayedConfirmation {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl ConfirmationPolicy for DelayedConfirmation {
    fn confirm<'a>(&'a self, _fingerprint: &'a ChannelFingerprint) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            true
        })
    }
}

/// Consults and updates the trusted peer set.
#[derive(Clone)]
pub struct PairingGate {
    store: Arc<IdentityStore>,
    policy: Arc<dyn ConfirmationPolicy>,
}

impl PairingGate {
    pub fn new(store: Arc<IdentityStore>, policy: Arc<dyn ConfirmationPolicy>) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    /// Returns `true` if the peer must pair before exchanging data.
    pub async fn evaluate(&self, peer: &PeerKey) -> bool {
        let trusted = self.store.is_trusted(peer).await;
        debug!("peer {} trusted: {}", peer.short(), trusted);
        !trusted
    }

    /// Handle a verification request from the client.
    ///
    /// On approval the flag is cleared even if persisting the key fails; the
    /// live session stays paired and the peer re-pairs on its next connection.
    pub async fn confirm_pairing(
        &self,
        peer: &PeerKey,
        fingerprint: &ChannelFingerprint,
        pairing: &PairingFlag,
    ) -> StatusCode {
        if !pairing.is_required() {
            return StatusCode::Success;
        }

        info!(
            "pairing requested by peer {}, code:\n{}",
            peer.short(),
            fingerprint
        );

        if !self.policy.confirm(fingerprint).await {
            info!("pairing rejected for peer {}", peer.short());
            return StatusCode::PairingRequired;
        }

        match self.store.add_trusted_peer(peer).await {
            Ok(true) => info!("peer {} paired", peer.short()),
            Ok(false) => debug!("peer {} was already trusted", peer.short()),
            Err(err) => error!("failed to persist trusted peer {}: {}", peer.short(), err),
        }
        pairing.clear();

        StatusCode::Success
    }
}
