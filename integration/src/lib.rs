//! Shared helpers for the end-to-end socket tests.

use std::net::SocketAddr;

use nbl_core::{
	io::{Connection, OnComplete, OnConnection, OnRead, StreamState},
	udp::OnRecv,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Channel-backed new-connection callback: every accept outcome arrives
/// as a `(status, connection)` pair.
#[must_use]
pub fn connection_sink(
) -> (OnConnection, UnboundedReceiver<(i32, Option<Connection>)>) {
	let (tx, rx) = unbounded_channel();
	let on_connection: OnConnection = Box::new(move |status, connection| {
		_ = tx.send((status, connection));
	});
	(on_connection, rx)
}

/// Channel-backed completion callback.
#[must_use]
pub fn completion_sink() -> (OnComplete, UnboundedReceiver<i32>) {
	let (tx, rx) = unbounded_channel();
	let on_complete: OnComplete = Box::new(move |status| {
		_ = tx.send(status);
	});
	(on_complete, rx)
}

/// Channel-backed read callback delivering `(bytes, state)` pairs.
#[must_use]
pub fn read_sink() -> (OnRead, UnboundedReceiver<(Vec<u8>, StreamState)>) {
	let (tx, rx) = unbounded_channel();
	let on_read: OnRead = Box::new(move |buf, state| {
		_ = tx.send((buf.to_vec(), state));
	});
	(on_read, rx)
}

/// Channel-backed datagram callback delivering `(bytes, sender, state)`
/// triples.
#[must_use]
pub fn recv_sink(
) -> (OnRecv, UnboundedReceiver<(Vec<u8>, Option<SocketAddr>, StreamState)>) {
	let (tx, rx) = unbounded_channel();
	let on_recv: OnRecv = Box::new(move |buf, peer, state| {
		_ = tx.send((buf.to_vec(), peer, state));
	});
	(on_recv, rx)
}
