//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Default maximum byte count for a single read: one link-layer frame payload.
pub const DEFAULT_READ_SIZE: usize = 1500;

/// Upper bound on the buffer allocated for a single read.
pub const MAX_READ_SIZE: usize = 64 * 1024;

/// Default number of payload bytes quoted in write diagnostics.
pub const DEFAULT_PREVIEW_LEN: usize = 30;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Per-connection I/O policy.
    pub connection: ConnectionConfig,

    /// Echo driver listener settings.
    pub listener: ListenerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Per-connection I/O policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum bytes requested by `read_default`, at most [`MAX_READ_SIZE`].
    pub read_size: usize,

    /// Bytes of an outgoing payload quoted in write errors.
    pub preview_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_size: DEFAULT_READ_SIZE,
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:7000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7000".to_string(),
            max_connections: 1_024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Scrape endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "socket_conn=debug".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
