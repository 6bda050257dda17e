//! Application side of a connection.
//!
//! The engine hands decrypted client messages to an [`Application`] and
//! encrypts whatever it produces. The message schema carried inside the
//! channel is owned entirely by the application.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use base_crypto::PeerKey;

use crate::registry::ClientId;

/// Per-connection channel capacity.
pub const APP_CHANNEL_CAPACITY: usize = 128;

const EVENT_CAPACITY: usize = 64;

/// Identity of an operational connection.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ClientId,
    pub peer: PeerKey,
}

/// Channels connecting one client to the application.
///
/// Dropping `inbound` tells the application the client is gone; closing
/// `outbound` ends the connection.
pub struct AppLink {
    pub inbound: mpsc::Sender<Vec<u8>>,
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

pub trait Application: Send + Sync + 'static {
    /// Called once per connection after the handshake.
    fn attach(&self, client: ClientInfo) -> AppLink;
}

/// Request/response handler with a shared event feed.
pub trait Backend: Send + Sync + 'static {
    /// Subscribe to events pushed to every client.
    fn events(&self) -> broadcast::Receiver<Vec<u8>>;

    /// Answer one client request. `None` sends nothing back.
    fn handle<'a>(&'a self, client: &'a ClientInfo, request: Vec<u8>)
        -> BoxFuture<'a, Option<Vec<u8>>>;
}

/// Runs a [`Backend`] for every attached client.
///
/// Each client gets its own task that answers requests in arrival order and
/// forwards backend events.
pub struct BackendApplication<B> {
    backend: Arc<B>,
}

impl<B: Backend> BackendApplication<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

impl<B: Backend> Application for BackendApplication<B> {
    fn attach(&self, client: ClientInfo) -> AppLink {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<u8>>(APP_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(APP_CHANNEL_CAPACITY);

        let backend = self.backend.clone();
        // Subscribe before returning so no event published after attach is missed.
        let mut events = backend.events();

        tokio::spawn(async move {
            let mut events_open = true;
            loop {
                tokio::select! {
                    request = inbound_rx.recv() => {
                        let Some(request) = request else { break };
                        if let Some(response) = backend.handle(&client, request).await {
                            if outbound_tx.send(response).await.is_err() {
                                break;
                            }
                        }
                    }
                    event = events.recv(), if events_open => match event {
                        Ok(event) => {
                            if outbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("client {} missed {} events", client.id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => events_open = false,
                    },
                }
            }
            debug!("backend link for client {} closed", client.id);
        });

        AppLink {
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }
}

/// Development backend: echoes every request and publishes events on demand.
pub struct EchoBackend {
    events: broadcast::Sender<Vec<u8>>,
}

impl EchoBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { events }
    }

    /// Send an event to every attached client. Returns the number of receivers.
    pub fn publish(&self, event: Vec<u8>) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for EchoBackend {
    fn events(&self) -> broadcast::Receiver<Vec<u8>> {
        self.events.subscribe()
    }

    fn handle<'a>(
        &'a self,
        _client: &'a ClientInfo,
        request: Vec<u8>,
    ) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { Some(request) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientInfo {
        ClientInfo {
            id: ClientId::new(),
            peer: PeerKey::from_bytes([5u8; 32]),
        }
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let app = BackendApplication::new(Arc::new(EchoBackend::new()));
        let mut link = app.attach(client());

        for i in 0..10u8 {
            link.inbound.send(vec![i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(link.outbound.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_events_reach_every_client() {
        let backend = Arc::new(EchoBackend::new());
        let app = BackendApplication::new(backend.clone());
        let mut a = app.attach(client());
        let mut b = app.attach(client());

        assert_eq!(backend.publish(b"block 840000".to_vec()), 2);
        assert_eq!(a.outbound.recv().await.unwrap(), b"block 840000");
        assert_eq!(b.outbound.recv().await.unwrap(), b"block 840000");
    }

    #[tokio::test]
    async fn test_dropping_inbound_closes_outbound() {
        let app = BackendApplication::new(Arc::new(EchoBackend::new()));
        let AppLink {
            inbound,
            mut outbound,
        } = app.attach(client());

        drop(inbound);
        assert!(outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_clients() {
        let backend = EchoBackend::new();
        assert_eq!(backend.publish(b"nobody".to_vec()), 0);
    }
}
