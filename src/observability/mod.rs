//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection operations produce:
//!     → events.rs (ConnectionEvent → injected EventSink)
//!
//! Sinks:
//!     → TracingSink (structured log events)
//!     → MetricsSink (counters, Prometheus scrape)
//!     → JsonLinesSink / MemorySink (files, tests)
//! ```
//!
//! # Design Decisions
//! - The connection depends on a sink it is given, never on a global logger
//! - logging.rs installs the subscriber in the binary only

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    ConnectionEvent, Direction, EventSink, FanoutSink, JsonLinesSink, MemorySink, TracingSink,
};
pub use metrics::MetricsSink;
