//! Echo driver: a thin acceptor that exercises [`Connection`] end to end.
//!
//! # Data Flow
//! ```text
//! Listener::accept (tokio)
//!     → into_std + blocking mode
//!     → Connection::with_config (origin, id)
//!     → interrupter registered by id
//!     → spawn_blocking: read → write back until EOF or error → close
//! ```
//!
//! # Design Decisions
//! - One blocking task per connection; no readiness multiplexing here
//! - On shutdown every registered connection is interrupted, then tasks are joined

use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::net::connection::Connection;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::transport::{Interrupter, Transport};
use crate::observability::events::EventSink;

type Registry = Arc<DashMap<u64, Interrupter<StdTcpStream>>>;

/// Echoes every read back to the peer.
pub struct EchoServer {
    config: ConnectionConfig,
    sink: Arc<dyn EventSink>,
    registry: Registry,
}

impl EchoServer {
    pub fn new(config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            registry: Arc::new(DashMap::new()),
        }
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Accept and serve until `shutdown` fires, then drain.
    pub async fn run(
        &self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Connection task failed");
                    }
                }
                accepted = listener.accept() => {
                    let (stream, addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let conn = match self.open(stream) {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(peer_addr = %addr, error = %e, "Dropping connection");
                            continue;
                        }
                    };

                    let registry = Arc::clone(&self.registry);
                    tasks.spawn_blocking(move || serve(conn, registry, permit));
                }
            }
        }

        for entry in self.registry.iter() {
            if let Err(e) = entry.value().interrupt() {
                tracing::debug!(connection_id = *entry.key(), error = %e, "Interrupt failed");
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Connection task failed");
            }
        }

        tracing::info!("All connections drained");
        Ok(())
    }

    fn open(&self, stream: tokio::net::TcpStream) -> std::io::Result<Connection<StdTcpStream>> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;

        let conn = Connection::with_config(stream, Arc::clone(&self.sink), self.config)
            .map_err(std::io::Error::other)?;
        self.registry.insert(conn.id(), conn.interrupter()?);
        Ok(conn)
    }
}

fn serve(mut conn: Connection<StdTcpStream>, registry: Registry, _permit: ConnectionPermit) {
    tracing::debug!(connection = %conn, "Serving connection");

    loop {
        let data = match conn.read_default() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(connection = %conn, error = %e, "Read failed");
                break;
            }
        };
        if data.is_empty() {
            break;
        }
        if let Err(e) = write_all(&mut conn, &data) {
            tracing::warn!(connection = %conn, error = %e, "Write failed");
            break;
        }
    }

    // Deregister before close: the descriptor may be reused once released.
    registry.remove(&conn.id());
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "Close reported a problem");
    }
}

/// Keep writing until the whole payload is accepted.
pub fn write_all<T: Transport>(
    conn: &mut Connection<T>,
    mut data: &[u8],
) -> Result<(), ConnectionError> {
    while !data.is_empty() {
        let n = conn.write(data)?;
        if n == 0 {
            return Err(ConnectionError::WriteFailed {
                preview: crate::error::preview(data, conn.config().preview_len),
                source: std::io::Error::from(std::io::ErrorKind::WriteZero),
            });
        }
        data = &data[n..];
    }
    Ok(())
}
