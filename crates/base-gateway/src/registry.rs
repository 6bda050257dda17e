//! Live connection bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

use base_crypto::PeerKey;

/// Unique id assigned to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle.
///
/// `Accepted -> Handshaking -> {Paired | Unpaired} -> Operational -> Closed`,
/// with `Closed` reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Handshaking,
    Paired,
    Unpaired,
    Operational,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub peer: Option<PeerKey>,
    pub connected_at: Instant,
}

/// Shared map of live connections.
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ClientId, ConnectionInfo>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted connection.
    pub async fn register(&self, id: ClientId) {
        let info = ConnectionInfo {
            state: ConnectionState::Accepted,
            peer: None,
            connected_at: Instant::now(),
        };
        self.inner.write().await.insert(id, info);
    }

    /// Returns `false` if the connection is no longer registered.
    pub async fn set_state(&self, id: ClientId, state: ConnectionState) -> bool {
        match self.inner.write().await.get_mut(&id) {
            Some(info) => {
                info.state = state;
                true
            }
            None => false,
        }
    }

    pub async fn set_peer(&self, id: ClientId, peer: PeerKey) -> bool {
        match self.inner.write().await.get_mut(&id) {
            Some(info) => {
                info.peer = Some(peer);
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Removing twice is a no-op returning `false`.
    pub async fn deregister(&self, id: ClientId) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: ClientId) -> Option<ConnectionInfo> {
        self.inner.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<(ClientId, ConnectionInfo)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }
}
