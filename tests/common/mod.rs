//! Shared utilities for integration tests.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use socket_conn::observability::MemorySink;
use socket_conn::Connection;

/// A connected loopback pair: (accepted server side, client side).
pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, client)
}

/// A server-side connection over loopback plus its client and event sink.
pub fn open_connection() -> (Connection<TcpStream>, TcpStream, Arc<MemorySink>) {
    let (server, client) = tcp_pair();
    let sink = Arc::new(MemorySink::new());
    let conn = Connection::new(server, sink.clone()).unwrap();
    (conn, client, sink)
}
