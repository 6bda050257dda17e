//! Message-oriented transport seen by the connection engine.
//!
//! The engine works on any pair of `Sink<Vec<u8>>` and
//! `Stream<Item = Result<Vec<u8>, TransportError>>`, one item per transport
//! message. [`websocket`] adapts an axum WebSocket to that shape.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

use base_common::{Frame, MAX_FRAME_SIZE};

use crate::error::ConnectionError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Outbound half of a transport.
pub trait FrameSink: Sink<Vec<u8>, Error = TransportError> + Send + Unpin {}

impl<T> FrameSink for T where T: Sink<Vec<u8>, Error = TransportError> + Send + Unpin {}

/// Inbound half of a transport.
pub trait FrameStream: Stream<Item = Result<Vec<u8>, TransportError>> + Send + Unpin {}

impl<T> FrameStream for T where T: Stream<Item = Result<Vec<u8>, TransportError>> + Send + Unpin {}

/// Split a WebSocket into a frame sink and stream.
///
/// Binary and text messages both carry frames. Ping and pong are handled by
/// axum and skipped here; a close message reads as [`TransportError::Closed`].
pub fn websocket(socket: WebSocket) -> (impl FrameSink, impl FrameStream) {
    let (sender, receiver) = socket.split();

    let sink = sender
        .sink_map_err(TransportError::from)
        .with(|frame: Vec<u8>| future::ready(Ok::<_, TransportError>(Message::Binary(frame))));

    let stream = receiver.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
            Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
            Err(err) => Some(Err(TransportError::from(err))),
        })
    });

    (sink, stream)
}

/// Read and decode the next frame.
///
/// Frames over [`MAX_FRAME_SIZE`] are rejected before decoding.
pub async fn recv_frame<St: FrameStream>(stream: &mut St) -> Result<Frame, ConnectionError> {
    let bytes = match stream.next().await {
        Some(Ok(bytes)) => bytes,
        Some(Err(err)) => return Err(err.into()),
        None => return Err(TransportError::Closed.into()),
    };

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ConnectionError::OversizedFrame {
            len: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(Frame::decode(&bytes)?)
}

/// Encode and send one frame.
pub async fn send_frame<Si: FrameSink>(sink: &mut Si, frame: &Frame) -> Result<(), ConnectionError> {
    sink.send(frame.encode()).await?;
    Ok(())
}
