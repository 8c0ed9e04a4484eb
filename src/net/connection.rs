//! Per-client connection over a byte-stream transport.
//!
//! # Responsibilities
//! - Own one accepted transport handle until it is closed
//! - Freeze the peer origin and descriptor id at construction
//! - Perform bounded reads and writes, reporting every failure as a typed error
//! - Emit a structured event for each transfer and for close
//!
//! # State
//! ```text
//! Open → Closed   (close, exactly once)
//! ```
//!
//! # Design Decisions
//! - No internal locking: I/O takes `&mut self`, so one caller at a time
//! - Short reads and short writes are successes; continuation belongs to the caller
//! - I/O failures never close the connection implicitly

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use crate::config::schema::{ConnectionConfig, MAX_READ_SIZE};
use crate::error::{preview, ConnectionError};
use crate::net::transport::{Interrupter, PollHandle, Transport};
use crate::observability::events::{ConnectionEvent, Direction, EventSink};

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handle is owned and usable.
    Open,
    /// Handle has been shut down and released.
    Closed,
}

/// One connected peer.
pub struct Connection<T: Transport> {
    /// `Some` exactly while the state is `Open`.
    handle: Option<T>,
    id: u64,
    origin: String,
    state: ConnectionState,
    config: ConnectionConfig,
    sink: Arc<dyn EventSink>,
}

impl<T: Transport> Connection<T> {
    /// Wrap an accepted handle using the default connection policy.
    pub fn new(handle: T, sink: Arc<dyn EventSink>) -> Result<Self, ConnectionError> {
        Self::with_config(handle, sink, ConnectionConfig::default())
    }

    /// Wrap an accepted handle.
    ///
    /// Queries the peer address once; if that fails the handle is dropped and
    /// no connection is returned.
    pub fn with_config(
        handle: T,
        sink: Arc<dyn EventSink>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let id = handle.raw_id();
        let origin = handle.peer_origin().map_err(ConnectionError::PeerAddress)?;

        tracing::trace!(connection_id = id, peer = %origin, "Connection opened");

        Ok(Self {
            handle: Some(handle),
            id,
            origin,
            state: ConnectionState::Open,
            config,
            sink,
        })
    }

    /// Descriptor-derived identifier, for log correlation only.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer as captured at construction.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the handle is still a live stream.
    pub fn is_valid(&self) -> bool {
        self.state == ConnectionState::Open && self.handle.is_some()
    }

    /// Identity for registering with a readiness poller. `None` once closed.
    pub fn poll_handle(&self) -> Option<PollHandle> {
        self.handle.as_ref().map(|_| PollHandle::new(self.id))
    }

    /// Handle that can shut this connection's transport down from another thread.
    ///
    /// The interrupter owns a duplicate descriptor; drop it after [`close`](Self::close)
    /// so the socket is released.
    pub fn interrupter(&self) -> io::Result<Interrupter<T>> {
        match &self.handle {
            Some(handle) => Ok(Interrupter::new(handle.try_clone_handle()?, self.id)),
            None => Err(io::Error::new(ErrorKind::NotConnected, "connection is closed")),
        }
    }

    /// Write `data`, returning the byte count the transport accepted.
    ///
    /// Fewer bytes than requested is not an error. An empty payload is a
    /// successful no-op that does not touch the transport.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        let limit = self.config.preview_len;
        let handle = match (self.state, self.handle.as_mut()) {
            (ConnectionState::Open, Some(handle)) => handle,
            _ => return Err(ConnectionError::InvalidHandle { preview: preview(data, limit) }),
        };

        let written = if data.is_empty() {
            0
        } else {
            loop {
                match handle.write(data) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break 0,
                    Err(source) => {
                        return Err(ConnectionError::WriteFailed {
                            preview: preview(data, limit),
                            source,
                        })
                    }
                }
            }
        };

        if written > data.len() {
            return Err(ConnectionError::WriteFailed {
                preview: preview(data, limit),
                source: io::Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "transport reported {} bytes sent for a {} byte payload",
                        written,
                        data.len()
                    ),
                ),
            });
        }

        self.sink.emit(&ConnectionEvent::Transfer {
            direction: Direction::Outbound,
            peer: self.origin.clone(),
            bytes: written,
        });
        Ok(written)
    }

    /// Read at most `max_bytes`, capped at [`MAX_READ_SIZE`] per call.
    ///
    /// Returns whatever the transport had available, possibly nothing: zero
    /// bytes means the peer shut down its side, or, on a non-blocking handle,
    /// that no data is buffered yet.
    pub fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, ConnectionError> {
        let handle = match (self.state, self.handle.as_mut()) {
            (ConnectionState::Open, Some(handle)) => handle,
            _ => return Err(ConnectionError::InvalidHandle { preview: String::new() }),
        };

        let mut buf = vec![0u8; max_bytes.min(MAX_READ_SIZE)];
        let n = loop {
            match handle.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break 0,
                Err(source) => {
                    return Err(ConnectionError::ReadFailed {
                        requested: max_bytes,
                        peer: self.origin.clone(),
                        source,
                    })
                }
            }
        };
        let capacity = buf.len();
        buf.truncate(n.min(capacity));

        self.sink.emit(&ConnectionEvent::Transfer {
            direction: Direction::Inbound,
            peer: self.origin.clone(),
            bytes: buf.len(),
        });
        Ok(buf)
    }

    /// Read up to the configured `read_size`.
    pub fn read_default(&mut self) -> Result<Vec<u8>, ConnectionError> {
        self.read(self.config.read_size)
    }

    /// Shut down both directions and release the handle.
    ///
    /// The connection is `Closed` when this returns, whatever the result. An
    /// `Err` is always [`ConnectionError::CloseFailed`] and is informational:
    /// either the shutdown step failed or the connection was already closed.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Closed;

        let Some(handle) = self.handle.take() else {
            return Err(self.close_failed("already closed".to_string()));
        };

        let shutdown = handle.shutdown_both();
        drop(handle);

        let outcome = match shutdown {
            Ok(()) => Ok(()),
            // Peer already tore the stream down; nothing left to shut.
            Err(e) if e.kind() == ErrorKind::NotConnected => {
                tracing::trace!(connection_id = self.id, "Peer disconnected before shutdown");
                Ok(())
            }
            Err(e) => Err(self.close_failed(e.to_string())),
        };

        self.sink.emit(&ConnectionEvent::Closed { id: self.id });
        outcome
    }

    fn close_failed(&self, reason: String) -> ConnectionError {
        self.sink.emit(&ConnectionEvent::CloseFailed { id: self.id, reason: reason.clone() });
        ConnectionError::CloseFailed { id: self.id, reason }
    }
}

#[cfg(unix)]
impl<T: Transport + std::os::fd::AsFd> Connection<T> {
    /// Borrow the descriptor for readiness polling. `None` once closed.
    pub fn as_fd(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        self.handle.as_ref().map(|handle| handle.as_fd())
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> fmt::Display for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.origin)
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::trace!(
                connection_id = self.id,
                peer = %self.origin,
                "Connection dropped without close"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::MemorySink;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
        write_calls: usize,
        read_calls: usize,
        shutdowns: usize,
        shutdown_error: Option<ErrorKind>,
    }

    /// Transport whose behaviour is scripted by the test. Clones share the script.
    #[derive(Clone, Default)]
    struct Scripted {
        peer: Option<&'static str>,
        script: Arc<Mutex<Script>>,
    }

    impl Scripted {
        fn peer(peer: &'static str) -> Self {
            Self { peer: Some(peer), ..Self::default() }
        }

        fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
            f(&mut self.script.lock().unwrap())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.with(|s| {
                s.read_calls += 1;
                match s.reads.pop_front() {
                    Some(Ok(data)) => {
                        let n = data.len().min(buf.len());
                        buf[..n].copy_from_slice(&data[..n]);
                        if n < data.len() {
                            s.reads.push_front(Ok(data[n..].to_vec()));
                        }
                        Ok(n)
                    }
                    Some(Err(e)) => Err(e),
                    None => Ok(0),
                }
            })
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.with(|s| {
                s.write_calls += 1;
                let result = s.writes.pop_front().unwrap_or(Ok(buf.len()));
                if let Ok(n) = result {
                    s.written.extend_from_slice(&buf[..n.min(buf.len())]);
                }
                result
            })
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Scripted {
        fn peer_origin(&self) -> io::Result<String> {
            self.peer
                .map(str::to_string)
                .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))
        }

        fn raw_id(&self) -> u64 {
            42
        }

        fn shutdown_both(&self) -> io::Result<()> {
            self.with(|s| {
                s.shutdowns += 1;
                match s.shutdown_error {
                    Some(kind) => Err(io::Error::from(kind)),
                    None => Ok(()),
                }
            })
        }

        fn try_clone_handle(&self) -> io::Result<Self> {
            Ok(self.clone())
        }
    }

    const PEER: &str = "203.0.113.5:51000";

    fn open() -> (Connection<Scripted>, Scripted, Arc<MemorySink>) {
        let transport = Scripted::peer(PEER);
        let sink = Arc::new(MemorySink::new());
        let conn = Connection::new(transport.clone(), sink.clone()).unwrap();
        (conn, transport, sink)
    }

    fn transfer(direction: Direction, bytes: usize) -> ConnectionEvent {
        ConnectionEvent::Transfer { direction, peer: PEER.to_string(), bytes }
    }

    #[test]
    fn construction_captures_identity() {
        let (conn, _, sink) = open();
        assert!(conn.is_valid());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.id(), 42);
        assert_eq!(conn.origin(), PEER);
        assert_eq!(conn.poll_handle().map(|h| h.as_raw()), Some(42));
        assert_eq!(conn.to_string(), "#42 (203.0.113.5:51000)");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn construction_fails_without_peer_address() {
        let sink = Arc::new(MemorySink::new());
        let err = Connection::new(Scripted::default(), sink).unwrap_err();
        assert!(matches!(err, ConnectionError::PeerAddress(_)));
    }

    #[test]
    fn write_ping() {
        let (mut conn, transport, sink) = open();
        assert_eq!(conn.write(b"PING").unwrap(), 4);
        assert_eq!(transport.with(|s| s.written.clone()), b"PING");
        assert_eq!(sink.events(), vec![transfer(Direction::Outbound, 4)]);
    }

    #[test]
    fn partial_write_is_success() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.writes.push_back(Ok(3)));

        assert_eq!(conn.write(b"HELLO").unwrap(), 3);
        assert_eq!(sink.events(), vec![transfer(Direction::Outbound, 3)]);
    }

    #[test]
    fn write_failure_carries_preview() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.writes.push_back(Err(io::Error::from(ErrorKind::BrokenPipe))));
        let payload = [b'x'; 64];

        match conn.write(&payload) {
            Err(ConnectionError::WriteFailed { preview, source }) => {
                assert_eq!(preview.len(), 30);
                assert_eq!(source.kind(), ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(sink.events().is_empty());
        assert!(conn.is_valid());
    }

    #[test]
    fn over_reported_write_is_failure() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.writes.push_back(Ok(10)));
        assert!(matches!(conn.write(b"PING"), Err(ConnectionError::WriteFailed { .. })));
    }

    #[test]
    fn interrupted_write_is_retried() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.writes.push_back(Err(io::Error::from(ErrorKind::Interrupted))));
        assert_eq!(conn.write(b"PING").unwrap(), 4);
        assert_eq!(transport.with(|s| s.write_calls), 2);
    }

    #[test]
    fn would_block_write_reports_zero() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.writes.push_back(Err(io::Error::from(ErrorKind::WouldBlock))));
        assert_eq!(conn.write(b"PING").unwrap(), 0);
        assert_eq!(sink.events(), vec![transfer(Direction::Outbound, 0)]);
    }

    #[test]
    fn empty_write_skips_transport() {
        let (mut conn, transport, sink) = open();
        assert_eq!(conn.write(b"").unwrap(), 0);
        assert_eq!(transport.with(|s| s.write_calls), 0);
        assert_eq!(sink.events(), vec![transfer(Direction::Outbound, 0)]);
    }

    #[test]
    fn write_after_close_is_invalid_handle() {
        let (mut conn, transport, sink) = open();
        conn.close().unwrap();
        sink.take();

        match conn.write(b"PING") {
            Err(ConnectionError::InvalidHandle { preview }) => assert_eq!(preview, "PING"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(conn.write(b""), Err(ConnectionError::InvalidHandle { .. })));
        assert_eq!(transport.with(|s| s.write_calls), 0);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn short_read_returns_available_bytes() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.reads.push_back(Ok(b"hello world!".to_vec())));

        let data = conn.read(1500).unwrap();
        assert_eq!(data, b"hello world!");
        assert_eq!(sink.events(), vec![transfer(Direction::Inbound, 12)]);
    }

    #[test]
    fn read_is_bounded_by_max_bytes() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.reads.push_back(Ok(b"abcdefgh".to_vec())));

        assert_eq!(conn.read(3).unwrap(), b"abc");
        assert_eq!(conn.read(100).unwrap(), b"defgh");
    }

    #[test]
    fn oversized_request_is_capped() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.reads.push_back(Ok(vec![1u8; MAX_READ_SIZE + 10])));

        assert_eq!(conn.read(usize::MAX).unwrap().len(), MAX_READ_SIZE);
        assert_eq!(conn.read(usize::MAX).unwrap().len(), 10);
    }

    #[test]
    fn zero_byte_read_is_success() {
        let (mut conn, _, sink) = open();
        assert!(conn.read(1500).unwrap().is_empty());
        assert_eq!(sink.events(), vec![transfer(Direction::Inbound, 0)]);
    }

    #[test]
    fn would_block_read_is_empty() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.reads.push_back(Err(io::Error::from(ErrorKind::WouldBlock))));
        assert!(conn.read(1500).unwrap().is_empty());
    }

    #[test]
    fn read_failure_names_request_and_peer() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.reads.push_back(Err(io::Error::from(ErrorKind::ConnectionReset))));

        match conn.read(512) {
            Err(ConnectionError::ReadFailed { requested, peer, source }) => {
                assert_eq!(requested, 512);
                assert_eq!(peer, PEER);
                assert_eq!(source.kind(), ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(sink.events().is_empty());
        assert_eq!(conn.origin(), PEER);
        assert!(conn.is_valid());
    }

    #[test]
    fn read_default_uses_configured_size() {
        let transport = Scripted::peer(PEER);
        transport.with(|s| s.reads.push_back(Ok(vec![7u8; 64])));
        let config = ConnectionConfig { read_size: 16, ..ConnectionConfig::default() };
        let mut conn =
            Connection::with_config(transport, Arc::new(MemorySink::new()), config).unwrap();

        assert_eq!(conn.read_default().unwrap().len(), 16);
        assert_eq!(conn.config().read_size, 16);
    }

    #[test]
    fn read_after_close_skips_transport() {
        let (mut conn, transport, _) = open();
        conn.close().unwrap();
        assert!(matches!(conn.read(10), Err(ConnectionError::InvalidHandle { .. })));
        assert_eq!(transport.with(|s| s.read_calls), 0);
    }

    #[test]
    fn close_shuts_down_and_emits() {
        let (mut conn, transport, sink) = open();
        conn.close().unwrap();

        assert!(!conn.is_valid());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.poll_handle().is_none());
        assert!(conn.interrupter().is_err());
        assert_eq!(transport.with(|s| s.shutdowns), 1);
        assert_eq!(sink.events(), vec![ConnectionEvent::Closed { id: 42 }]);
    }

    #[test]
    fn second_close_is_close_failed() {
        let (mut conn, transport, sink) = open();
        conn.close().unwrap();

        let err = conn.close().unwrap_err();
        assert!(matches!(err, ConnectionError::CloseFailed { id: 42, .. }));
        assert!(!err.is_fatal());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(transport.with(|s| s.shutdowns), 1);
        assert_eq!(
            sink.events(),
            vec![
                ConnectionEvent::Closed { id: 42 },
                ConnectionEvent::CloseFailed { id: 42, reason: "already closed".into() },
            ]
        );
    }

    #[test]
    fn shutdown_error_still_closes() {
        let (mut conn, transport, sink) = open();
        transport.with(|s| s.shutdown_error = Some(ErrorKind::PermissionDenied));

        assert!(matches!(conn.close(), Err(ConnectionError::CloseFailed { .. })));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_valid());

        let events = sink.events();
        assert!(matches!(events[0], ConnectionEvent::CloseFailed { id: 42, .. }));
        assert_eq!(events[1], ConnectionEvent::Closed { id: 42 });
    }

    #[test]
    fn peer_already_gone_closes_cleanly() {
        let (mut conn, transport, _) = open();
        transport.with(|s| s.shutdown_error = Some(ErrorKind::NotConnected));
        assert!(conn.close().is_ok());
    }

    #[test]
    fn interrupter_shuts_shared_handle() {
        let (conn, transport, _) = open();
        let interrupter = conn.interrupter().unwrap();
        assert_eq!(interrupter.id(), 42);
        interrupter.interrupt().unwrap();
        assert_eq!(transport.with(|s| s.shutdowns), 1);
    }
}
