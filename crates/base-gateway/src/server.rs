//! HTTP surface: liveness and the WebSocket endpoint.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use base_common::MAX_FRAME_SIZE;
use base_crypto::{IdentityStore, StoreError};

use crate::backend::Application;
use crate::config::GatewaySettings;
use crate::connection::ConnectionEngine;
use crate::pairing::{DelayedConfirmation, PairingGate};
use crate::transport;

/// Load or create the gateway identity in `data_dir` and build an engine.
///
/// # Errors
/// Fails if the identity record can't be read or written.
pub async fn open_engine(
    data_dir: &Path,
    settings: GatewaySettings,
    application: Arc<dyn Application>,
) -> Result<Arc<ConnectionEngine>, StoreError> {
    let store = Arc::new(IdentityStore::new(data_dir));
    let identity = store.load_or_create_identity().await?;

    let policy = Arc::new(DelayedConfirmation::new(settings.confirmation_delay));
    let gate = PairingGate::new(store, policy);

    Ok(Arc::new(ConnectionEngine::new(
        Arc::new(identity),
        gate,
        application,
        settings,
    )))
}

pub fn router(engine: Arc<ConnectionEngine>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn root() -> &'static str {
    "OK!!\n"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<ConnectionEngine>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_SIZE)
        .max_frame_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = transport::websocket(socket);
            // Outcome is logged by the engine.
            let _ = engine.run(sink, stream).await;
        })
}
