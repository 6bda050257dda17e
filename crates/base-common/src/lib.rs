//! Shared definitions for the base gateway: wire framing, logging, error types.
//!
//! This crate provides the infrastructure used by both the crypto layer and the
//! gateway service.

#![forbid(unsafe_code)]

pub mod error;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::{Frame, FrameError, Opcode, StatusCode, MAX_FRAME_SIZE};

/// Initialize tracing.
///
/// Log level is controlled by the `RUST_LOG` environment variable, falling
/// back to `default_level` if unset or invalid.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
