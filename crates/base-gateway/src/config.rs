//! Gateway configuration.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base_common::Error;

/// Command line and environment configuration of the `base-gateway` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "base-gateway", version, about = "Encrypted WebSocket gateway of the base appliance")]
pub struct GatewayConfig {
    /// Address to listen on.
    #[arg(long, env = "BASE_GATEWAY_LISTEN", default_value = "127.0.0.1:8845")]
    pub listen: SocketAddr,

    /// Directory holding the identity record.
    #[arg(long, env = "BASE_DATA_DIR", default_value = ".base")]
    pub data_dir: PathBuf,

    /// Delay before a pairing request is confirmed, in milliseconds.
    #[arg(long, env = "BASE_CONFIRMATION_DELAY_MS", default_value_t = 2000)]
    pub confirmation_delay_ms: u64,

    /// Time allowed for the handshake and pairing status exchange, in seconds.
    #[arg(long, env = "BASE_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Allow listening on a non-loopback address.
    #[arg(long, env = "BASE_ALLOW_PUBLIC_BIND", default_value_t = false)]
    pub allow_public_bind: bool,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.handshake_timeout_secs == 0 {
            return Err(Error::config("handshake timeout must be at least one second"));
        }
        if !self.listen.ip().is_loopback() && !self.allow_public_bind {
            return Err(Error::config(format!(
                "refusing non-loopback bind {} without --allow-public-bind",
                self.listen
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            confirmation_delay: Duration::from_millis(self.confirmation_delay_ms),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }
}

/// Runtime settings of the connection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub confirmation_delay: Duration,
    pub handshake_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            confirmation_delay: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
