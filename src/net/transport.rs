//! Byte-stream transport abstraction.
//!
//! # Responsibilities
//! - Describe what a [`Connection`](super::connection::Connection) needs from a handle
//! - Provide implementations for TCP and Unix-domain streams
//! - Allow a cloned handle to interrupt blocking I/O from another thread
//!
//! # Design Decisions
//! - Synchronous `Read + Write`; blocking mode is whatever the acceptor set
//! - The identity is the raw descriptor value, cheap to compute once
//! - The peer address is rendered to a string by the transport itself

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A connected, exclusively owned byte-stream handle.
pub trait Transport: Read + Write {
    /// Describe the remote peer (`address:port` or equivalent).
    fn peer_origin(&self) -> io::Result<String>;

    /// Raw descriptor value of the handle.
    fn raw_id(&self) -> u64;

    /// Shut down both the read and write directions.
    fn shutdown_both(&self) -> io::Result<()>;

    /// Duplicate the handle so it can be shut down from another thread.
    fn try_clone_handle(&self) -> io::Result<Self>
    where
        Self: Sized;
}

impl Transport for TcpStream {
    fn peer_origin(&self) -> io::Result<String> {
        self.peer_addr().map(|addr| addr.to_string())
    }

    fn raw_id(&self) -> u64 {
        raw_descriptor(self)
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn try_clone_handle(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn peer_origin(&self) -> io::Result<String> {
        let addr = self.peer_addr()?;
        Ok(match addr.as_pathname() {
            Some(path) => format!("unix:{}", path.display()),
            None => "unix:unnamed".to_string(),
        })
    }

    fn raw_id(&self) -> u64 {
        raw_descriptor(self)
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn try_clone_handle(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }
}

#[cfg(unix)]
fn raw_descriptor<H: std::os::fd::AsRawFd>(handle: &H) -> u64 {
    handle.as_raw_fd() as u64
}

#[cfg(windows)]
fn raw_descriptor<H: std::os::windows::io::AsRawSocket>(handle: &H) -> u64 {
    handle.as_raw_socket()
}

#[cfg(not(any(unix, windows)))]
fn raw_descriptor<H>(_handle: &H) -> u64 {
    0
}

/// Opaque identity suitable for registering a connection with a readiness poller.
///
/// Carries no ownership; the connection that produced it keeps the sole right to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollHandle(u64);

impl PollHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw descriptor value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Shuts a connection's transport down from another thread.
///
/// A blocked `read` or `write` on the owning connection returns (zero bytes or an
/// error, depending on the platform) once [`interrupt`](Self::interrupt) is called.
///
/// The interrupter holds a duplicated descriptor, so the underlying socket stays
/// allocated until both the connection is closed and every interrupter is dropped.
/// Drop it once the owning connection has been closed.
#[derive(Debug)]
pub struct Interrupter<T: Transport> {
    handle: T,
    id: u64,
}

impl<T: Transport> Interrupter<T> {
    pub(crate) fn new(handle: T, id: u64) -> Self {
        Self { handle, id }
    }

    /// Identity of the connection this interrupter belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shut down both directions of the shared transport.
    pub fn interrupt(&self) -> io::Result<()> {
        tracing::debug!(connection_id = self.id, "Interrupting connection");
        self.handle.shutdown_both()
    }
}
