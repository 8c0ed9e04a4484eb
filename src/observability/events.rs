//! Structured connection events and the sinks that receive them.
//!
//! # Responsibilities
//! - Define the events a connection emits (transfers, close, close diagnostics)
//! - Define the [`EventSink`] capability injected into every connection
//! - Provide sinks for tracing, tests, JSON lines and fan-out
//!
//! # Design Decisions
//! - Sinks are `Send + Sync` and shared via `Arc`; many connections emit concurrently
//! - Emission never fails from the connection's point of view
//! - Events from one connection reach a sink in the order they were emitted

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Direction of a byte transfer, relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Bytes read from the peer.
    Inbound,
    /// Bytes written to the peer.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// An event emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A successful read or write.
    Transfer {
        direction: Direction,
        peer: String,
        bytes: usize,
    },
    /// The connection transitioned to closed.
    Closed { id: u64 },
    /// Shutdown or release of the handle did not go cleanly.
    CloseFailed { id: u64, reason: String },
}

/// Receiver of connection events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ConnectionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Transfer { direction: Direction::Outbound, peer, bytes } => {
                tracing::debug!(
                    direction = "outbound",
                    peer = %peer,
                    bytes,
                    "{} <-- Sending {} bytes",
                    peer,
                    bytes
                );
            }
            ConnectionEvent::Transfer { direction: Direction::Inbound, peer, bytes } => {
                tracing::debug!(
                    direction = "inbound",
                    peer = %peer,
                    bytes,
                    "{} --> Reading {} bytes",
                    peer,
                    bytes
                );
            }
            ConnectionEvent::Closed { id } => {
                tracing::debug!(event = "closed", id, "Socket #{} has been closed", id);
            }
            ConnectionEvent::CloseFailed { id, reason } => {
                tracing::warn!(
                    event = "close_failed",
                    id,
                    reason = %reason,
                    "Socket #{} did not close cleanly",
                    id
                );
            }
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Writes one JSON object per line to any writer.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &ConnectionEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write connection event");
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &ConnectionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
