//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use base_common::{Frame, StatusCode};
use base_crypto::{IdentityStore, Initiator, SecureSession, StaticIdentity};
use base_gateway::{
    open_engine, Application, BackendApplication, ConfirmationPolicy, ConnectionEngine,
    ConnectionError, EchoBackend, FrameSink, FrameStream, GatewaySettings, PairingGate,
    TransportError,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub type ClientSink = Pin<Box<dyn Sink<Vec<u8>, Error = ()> + Send>>;

/// Companion client driven by the tests.
pub struct TestClient {
    tx: ClientSink,
    rx: BoxStream<'static, Vec<u8>>,
}

impl TestClient {
    pub fn new(tx: ClientSink, rx: BoxStream<'static, Vec<u8>>) -> Self {
        Self { tx, rx }
    }

    /// Returns `false` if the gateway side is gone.
    pub async fn send_raw(&mut self, bytes: Vec<u8>) -> bool {
        self.tx.send(bytes).await.is_ok()
    }

    pub async fn send(&mut self, frame: Frame) -> bool {
        self.send_raw(frame.encode()).await
    }

    /// Next frame from the gateway, `None` once the transport is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        let bytes = tokio::time::timeout(RECV_TIMEOUT, self.rx.next())
            .await
            .expect("timed out waiting for the gateway")?;
        Some(Frame::decode(&bytes).expect("gateway sent an undecodable frame"))
    }

    /// Wait until the gateway closes the transport, skipping pending frames.
    pub async fn closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    /// Run the full handshake, returning the client session and the status the
    /// gateway reported.
    pub async fn handshake(&mut self, identity: &StaticIdentity) -> (SecureSession, StatusCode) {
        assert!(self.send(Frame::HandshakeRequest).await);
        assert_eq!(self.recv().await, Some(Frame::Status(StatusCode::Success)));

        let mut initiator = Initiator::new(identity).unwrap();
        let msg1 = initiator.write_message_1().unwrap();
        assert!(self.send(Frame::HandshakeMessage(msg1)).await);

        let Some(Frame::HandshakeMessage(msg2)) = self.recv().await else {
            panic!("expected handshake message 2");
        };
        initiator.read_message_2(&msg2).unwrap();
        let (msg3, outcome) = initiator.write_message_3(&[]).unwrap();
        assert!(self.send(Frame::HandshakeMessage(msg3)).await);

        let Some(Frame::Status(status)) = self.recv().await else {
            panic!("expected pairing status");
        };
        (SecureSession::established(outcome, false), status)
    }

    pub async fn verify(&mut self) -> StatusCode {
        assert!(self.send(Frame::VerifyPairing).await);
        match self.recv().await {
            Some(Frame::Status(status)) => status,
            other => panic!("expected status, got {:?}", other),
        }
    }

    pub async fn send_data(&mut self, session: &mut SecureSession, plaintext: &[u8]) -> bool {
        let ciphertext = session.encrypt(plaintext).unwrap();
        self.send(Frame::Data(ciphertext)).await
    }

    pub async fn recv_data(&mut self, session: &mut SecureSession) -> Vec<u8> {
        match self.recv().await {
            Some(Frame::Data(ciphertext)) => session.decrypt(&ciphertext).unwrap(),
            other => panic!("expected data, got {:?}", other),
        }
    }

    pub async fn request(&mut self, session: &mut SecureSession, plaintext: &[u8]) -> Vec<u8> {
        assert!(self.send_data(session, plaintext).await);
        self.recv_data(session).await
    }
}

/// In-memory transport: the client end and the gateway's sink and stream.
pub fn duplex() -> (TestClient, impl FrameSink, impl FrameStream) {
    let (client_tx, gateway_rx) = mpsc::unbounded::<Vec<u8>>();
    let (gateway_tx, client_rx) = mpsc::unbounded::<Vec<u8>>();

    let client = TestClient::new(Box::pin(client_tx.sink_map_err(|_| ())), client_rx.boxed());
    let sink = gateway_tx.sink_map_err(|_| TransportError::Closed);
    let stream = gateway_rx.map(Ok::<_, TransportError>);

    (client, sink, stream)
}

/// Gateway over a temporary data directory with the echo backend.
pub struct Harness {
    pub engine: Arc<ConnectionEngine>,
    pub backend: Arc<EchoBackend>,
    pub store: Arc<IdentityStore>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(GatewaySettings {
            confirmation_delay: Duration::ZERO,
            ..GatewaySettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: GatewaySettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(EchoBackend::new());
        let application = Arc::new(BackendApplication::new(backend.clone()));

        let engine = open_engine(dir.path(), settings, application).await.unwrap();
        let store = engine.gate().store().clone();

        Self {
            engine,
            backend,
            store,
            dir,
        }
    }

    /// Gateway with a custom confirmation policy and application.
    pub async fn with_parts(
        policy: Arc<dyn ConfirmationPolicy>,
        application: Arc<dyn Application>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IdentityStore::new(dir.path()));
        let identity = store.load_or_create_identity().await.unwrap();
        let engine = Arc::new(ConnectionEngine::new(
            Arc::new(identity),
            PairingGate::new(store.clone(), policy),
            application,
            GatewaySettings::default(),
        ));

        Self {
            engine,
            backend: Arc::new(EchoBackend::new()),
            store,
            dir,
        }
    }

    /// Open an in-memory connection served by the engine.
    pub fn connect(&self) -> (TestClient, JoinHandle<Result<(), ConnectionError>>) {
        let (client, sink, stream) = duplex();
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move { engine.run(sink, stream).await });
        (client, handle)
    }

    /// Connect with a key that is already trusted.
    pub async fn connect_paired(
        &self,
        identity: &StaticIdentity,
    ) -> (TestClient, SecureSession, JoinHandle<Result<(), ConnectionError>>) {
        self.store
            .add_trusted_peer(&base_crypto::PeerKey::from_bytes(*identity.public_key()))
            .await
            .unwrap();
        let (mut client, handle) = self.connect();
        let (session, status) = client.handshake(identity).await;
        assert_eq!(status, StatusCode::Success);
        (client, session, handle)
    }
}
