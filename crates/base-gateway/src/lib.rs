//! Secure channel gateway of the base appliance.
//!
//! Accepts WebSocket connections from companion clients, runs the Noise XX
//! handshake and the pairing workflow, then bridges encrypted frames to an
//! [`Application`](backend::Application).

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod pairing;
pub mod registry;
pub mod server;
pub mod transport;

pub use backend::{AppLink, Application, Backend, BackendApplication, ClientInfo, EchoBackend};
pub use config::{GatewayConfig, GatewaySettings};
pub use connection::{CloseSignal, ConnectionEngine};
pub use error::ConnectionError;
pub use pairing::{ConfirmationPolicy, DelayedConfirmation, PairingGate};
pub use registry::{ClientId, ConnectionInfo, ConnectionRegistry, ConnectionState};
pub use server::{open_engine, router};
pub use transport::{FrameSink, FrameStream, TransportError};
