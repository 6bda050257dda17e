//! Per-connection engine.
//!
//! After the handshake two loops run concurrently on one task:
//!
//! - the read loop owns the transport stream and the inbound cipher. It
//!   answers verification requests and forwards decrypted data, in wire
//!   order, to the application.
//! - the write loop owns the transport sink and the outbound cipher. It sends
//!   status replies from the read loop and encrypts application messages one
//!   at a time.
//!
//! Whichever loop stops first fires the shared [`CloseSignal`]; the other
//! observes it at its next wait. Only the write loop closes the sink, once.
//!
//! While a verification request waits on the confirmation policy the read
//! loop keeps polling the transport, queueing frames for afterwards, so a
//! client leaving mid-confirmation still ends the connection.

use futures::SinkExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use base_common::{Frame, StatusCode};
use base_crypto::{
    ChannelFingerprint, PairingFlag, PeerKey, SessionReceiver, SessionSender, StaticIdentity,
};

use crate::backend::{AppLink, Application, ClientInfo};
use crate::config::GatewaySettings;
use crate::error::ConnectionError;
use crate::handshake::perform_handshake;
use crate::pairing::PairingGate;
use crate::registry::{ClientId, ConnectionRegistry, ConnectionState};
use crate::transport::{recv_frame, send_frame, FrameSink, FrameStream};

/// Pending status replies from the read loop to the write loop.
const CONTROL_CAPACITY: usize = 4;

/// Frames read ahead while a pairing confirmation is pending.
const BACKLOG_CAPACITY: usize = 32;

/// One-shot close notification shared by a connection's loops.
#[derive(Clone)]
pub struct CloseSignal(Arc<watch::Sender<bool>>);

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Request close. Safe to call any number of times.
    pub fn close(&self) {
        self.0.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the connection from the registry exactly once.
struct Cleanup {
    id: ClientId,
    registry: ConnectionRegistry,
    done: AtomicBool,
}

impl Cleanup {
    async fn run(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.set_state(self.id, ConnectionState::Closed).await;
        self.registry.deregister(self.id).await;
    }
}

/// Shared state behind every connection of a gateway.
pub struct ConnectionEngine {
    identity: Arc<StaticIdentity>,
    gate: PairingGate,
    registry: ConnectionRegistry,
    application: Arc<dyn Application>,
    settings: GatewaySettings,
}

impl ConnectionEngine {
    pub fn new(
        identity: Arc<StaticIdentity>,
        gate: PairingGate,
        application: Arc<dyn Application>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            identity,
            gate,
            registry: ConnectionRegistry::new(),
            application,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &PairingGate {
        &self.gate
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Serve one accepted transport until it closes.
    ///
    /// A peer closing the transport after the handshake is a normal end and
    /// returns `Ok`. The connection is deregistered before this returns.
    pub async fn run<Si, St>(&self, sink: Si, stream: St) -> Result<(), ConnectionError>
    where
        Si: FrameSink,
        St: FrameStream,
    {
        let id = ClientId::new();
        self.registry.register(id).await;
        info!("client {} connected", id);

        let cleanup = Cleanup {
            id,
            registry: self.registry.clone(),
            done: AtomicBool::new(false),
        };
        let result = self.drive(id, sink, stream, &cleanup).await;
        cleanup.run().await;

        match &result {
            Ok(()) => info!("client {} disconnected", id),
            Err(err) => warn!("client {} closed: {}", id, err),
        }
        result
    }

    async fn drive<Si, St>(
        &self,
        id: ClientId,
        mut sink: Si,
        mut stream: St,
        cleanup: &Cleanup,
    ) -> Result<(), ConnectionError>
    where
        Si: FrameSink,
        St: FrameStream,
    {
        self.registry.set_state(id, ConnectionState::Handshaking).await;

        let handshake = tokio::time::timeout(
            self.settings.handshake_timeout,
            perform_handshake(&mut sink, &mut stream, &self.identity, &self.gate),
        )
        .await;
        let established = match handshake {
            Ok(Ok(established)) => established,
            Ok(Err(err)) => {
                let _ = sink.close().await;
                return Err(err);
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(ConnectionError::HandshakeTimeout(
                    self.settings.handshake_timeout,
                ));
            }
        };

        let peer = established.peer;
        let status = established.status();
        let Some(fingerprint) = established.session.fingerprint().cloned() else {
            let _ = sink.close().await;
            return Err(ConnectionError::protocol("established session has no channel binding"));
        };
        self.registry.set_peer(id, peer).await;
        let state = match status {
            StatusCode::Success => ConnectionState::Paired,
            StatusCode::PairingRequired => ConnectionState::Unpaired,
        };
        self.registry.set_state(id, state).await;
        info!(
            "client {} completed handshake with peer {} ({:?})",
            id,
            peer.short(),
            state
        );

        let AppLink { inbound, outbound } = self.application.attach(ClientInfo { id, peer });
        self.registry.set_state(id, ConnectionState::Operational).await;

        if let Err(err) = send_frame(&mut sink, &Frame::Status(status)).await {
            let _ = sink.close().await;
            return Err(err);
        }

        let pairing = established.session.pairing_flag();
        let (sender, receiver) = established.session.split();
        let close = CloseSignal::new();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);

        let reader = ReadLoop {
            id,
            peer,
            fingerprint,
            pairing,
            receiver,
            inbound,
            control: control_tx,
            gate: &self.gate,
        };
        let writer = WriteLoop {
            id,
            sender,
            outbound,
            control: control_rx,
        };

        let (read_result, write_result) = tokio::join!(
            async {
                let result = reader.run(&mut stream, &close).await;
                close.close();
                cleanup.run().await;
                result
            },
            async {
                let result = writer.run(&mut sink, &close).await;
                close.close();
                let _ = sink.close().await;
                cleanup.run().await;
                result
            },
        );

        read_result.and(write_result)
    }
}

struct ReadLoop<'a> {
    id: ClientId,
    peer: PeerKey,
    fingerprint: ChannelFingerprint,
    pairing: PairingFlag,
    receiver: SessionReceiver,
    inbound: mpsc::Sender<Vec<u8>>,
    control: mpsc::Sender<StatusCode>,
    gate: &'a PairingGate,
}

impl ReadLoop<'_> {
    async fn run<St: FrameStream>(
        mut self,
        stream: &mut St,
        close: &CloseSignal,
    ) -> Result<(), ConnectionError> {
        let mut backlog = VecDeque::new();
        loop {
            let frame = match backlog.pop_front() {
                Some(frame) => frame,
                None => {
                    let frame = tokio::select! {
                        _ = close.closed() => return Ok(()),
                        frame = recv_frame(stream) => frame,
                    };
                    match frame {
                        Ok(frame) => frame,
                        Err(err) if err.is_closed() => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
            };

            match frame {
                Frame::VerifyPairing => {
                    let Some(status) = self.confirm(stream, close, &mut backlog).await? else {
                        return Ok(());
                    };
                    debug!("client {} verification status {:?}", self.id, status);
                    if self.control.send(status).await.is_err() {
                        return Ok(());
                    }
                }
                Frame::Data(ciphertext) => {
                    // PairingRequired is fatal as well: the peer has already
                    // spent a nonce on a message we won't accept.
                    let plaintext = self
                        .receiver
                        .decrypt(&ciphertext)
                        .map_err(ConnectionError::DecryptFailed)?;
                    tokio::select! {
                        _ = close.closed() => return Ok(()),
                        sent = self.inbound.send(plaintext) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                other => {
                    return Err(ConnectionError::protocol(format!(
                        "unexpected {:?} frame from client",
                        other.opcode()
                    )))
                }
            }
        }
    }

    /// Await the pairing decision. `None` means the connection is ending.
    async fn confirm<St: FrameStream>(
        &self,
        stream: &mut St,
        close: &CloseSignal,
        backlog: &mut VecDeque<Frame>,
    ) -> Result<Option<StatusCode>, ConnectionError> {
        let confirmation = self
            .gate
            .confirm_pairing(&self.peer, &self.fingerprint, &self.pairing);
        tokio::pin!(confirmation);

        loop {
            tokio::select! {
                _ = close.closed() => return Ok(None),
                status = &mut confirmation => return Ok(Some(status)),
                frame = recv_frame(stream), if backlog.len() < BACKLOG_CAPACITY => match frame {
                    Ok(frame) => backlog.push_back(frame),
                    Err(err) if err.is_closed() => {
                        debug!("client {} left during pairing confirmation", self.id);
                        return Ok(None);
                    }
                    Err(err) => return Err(err),
                },
            }
        }
    }
}

struct WriteLoop {
    id: ClientId,
    sender: SessionSender,
    outbound: mpsc::Receiver<Vec<u8>>,
    control: mpsc::Receiver<StatusCode>,
}

impl WriteLoop {
    async fn run<Si: FrameSink>(
        mut self,
        sink: &mut Si,
        close: &CloseSignal,
    ) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                biased;
                _ = close.closed() => return Ok(()),
                Some(status) = self.control.recv() => {
                    send_frame(sink, &Frame::Status(status)).await?;
                }
                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        debug!("application closed the link for client {}", self.id);
                        return Ok(());
                    };
                    let ciphertext = self
                        .sender
                        .encrypt(&message)
                        .map_err(ConnectionError::EncryptFailed)?;
                    send_frame(sink, &Frame::Data(ciphertext)).await?;
                }
            }
        }
    }
}
