//! Per-connection transport primitives for multi-client byte-stream servers.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::AppConfig;
pub use error::ConnectionError;
pub use net::{Connection, ConnectionState, Interrupter, PollHandle, Transport};
pub use observability::events::{ConnectionEvent, Direction, EventSink};
