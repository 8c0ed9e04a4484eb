//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted transport handle
//!     → connection.rs (origin/id frozen, Open)
//!     → read / write (bounded, typed errors, events)
//!     → close (shutdown both directions, release, Closed)
//!
//! Echo driver:
//!     listener.rs (accept, connection limits)
//!     → echo.rs (one blocking task per Connection)
//! ```
//!
//! # Design Decisions
//! - The connection core is synchronous and transport-generic
//! - Readiness multiplexing is left to whoever owns the connections

pub mod connection;
pub mod echo;
pub mod listener;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub use transport::{Interrupter, PollHandle, Transport};
