//! TCP flavor of the connection wrap.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};

use crate::{
	error::{ErrorCode, WrapError},
	io::{
		bind_error, effective_backlog, guard, Connection, Listener,
		OnComplete, OnConnection, OnRead, WriteChunk,
	},
};

/// Completion record for an in-flight connect.
#[derive(Debug)]
pub struct ConnectRequest {
	/// Status code the completion callback was invoked with.
	pub status: i32,
	/// OS-assigned local address, populated on success only.
	pub local_addr: Option<SocketAddr>,
}

/// A TCP connection/listener wrap.
///
/// Binding is deferred: `bind` records the requested address and the
/// resource is opened when `listen` or `connect` runs.
#[derive(Debug, Default)]
pub struct TcpWrap {
	requested: Option<SocketAddr>,
	local: Option<SocketAddr>,
	peer: Option<SocketAddr>,
	listener: Option<Listener>,
	connection: Option<Connection>,
}

impl TcpWrap {
	/// Create a wrap with no recorded addresses.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the requested IPv4 local address. The bind itself is
	/// deferred until `listen` or `connect` opens the resource.
	pub fn bind(&mut self, host: &str, port: u16) -> i32 {
		match host.parse::<Ipv4Addr>() {
			Ok(ip) => self.record_bind(IpAddr::V4(ip), port),
			Err(_) => ErrorCode::Invalid.code(),
		}
	}

	/// Record the requested IPv6 local address.
	pub fn bind6(&mut self, host: &str, port: u16) -> i32 {
		match host.parse::<Ipv6Addr>() {
			Ok(ip) => self.record_bind(IpAddr::V6(ip), port),
			Err(_) => ErrorCode::Invalid.code(),
		}
	}

	fn record_bind(&mut self, ip: IpAddr, port: u16) -> i32 {
		self.requested = Some(SocketAddr::new(ip, port));
		0
	}

	/// Bind and listen on the recorded address (IPv4 wildcard when none
	/// was recorded), then start the accept loop.
	///
	/// Address errors come back as negative status codes; permission
	/// failures are fatal `Err`s.
	pub async fn listen(
		&mut self,
		backlog: u32,
		on_connection: OnConnection,
	) -> Result<i32, WrapError> {
		let addr = self.requested.unwrap_or_else(|| {
			SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
		});

		let listener = match TcpListener::bind(addr).await {
			Ok(listener) => listener,
			Err(err) => return Ok(bind_error(err)?.code()),
		};

		let capacity = effective_backlog(backlog);
		let listener = Listener::spawn_tcp(listener, capacity, on_connection);
		self.local = listener.local_addr();
		self.listener = Some(listener);

		Ok(0)
	}

	/// Connect to an IPv4 peer. The completion callback is invoked exactly
	/// once: 0 on success, `ECONNREFUSED` on failure. On success the
	/// OS-assigned local address is recorded on both the wrap and the
	/// returned request; on failure the wrap's recorded addresses are left
	/// untouched.
	pub async fn connect(
		&mut self,
		host: &str,
		port: u16,
		on_complete: OnComplete,
	) -> ConnectRequest {
		match host.parse::<Ipv4Addr>() {
			Ok(ip) => {
				self.connect_addr(
					SocketAddr::new(IpAddr::V4(ip), port),
					on_complete,
				)
				.await
			}
			Err(_) => finish_connect_err(ErrorCode::Invalid, on_complete),
		}
	}

	/// Connect to an IPv6 peer.
	pub async fn connect6(
		&mut self,
		host: &str,
		port: u16,
		on_complete: OnComplete,
	) -> ConnectRequest {
		match host.parse::<Ipv6Addr>() {
			Ok(ip) => {
				self.connect_addr(
					SocketAddr::new(IpAddr::V6(ip), port),
					on_complete,
				)
				.await
			}
			Err(_) => finish_connect_err(ErrorCode::Invalid, on_complete),
		}
	}

	async fn connect_addr(
		&mut self,
		addr: SocketAddr,
		on_complete: OnComplete,
	) -> ConnectRequest {
		match TcpStream::connect(addr).await {
			Ok(stream) => {
				let connection = Connection::from_tcp(stream, None);
				let local_addr = connection.local_addr();
				self.local = local_addr;
				self.peer = connection.peer_addr();
				self.connection = Some(connection);
				guard(move || on_complete(0));
				ConnectRequest { status: 0, local_addr }
			}
			Err(_) => finish_connect_err(ErrorCode::ConnRefused, on_complete),
		}
	}

	/// OS-assigned local address. `EADDRNOTAVAIL` until populated by
	/// `listen` or a successful `connect`.
	pub fn getsockname(&self) -> Result<SocketAddr, ErrorCode> {
		self.local.ok_or(ErrorCode::AddrNotAvail)
	}

	/// Remote peer address. `EADDRNOTAVAIL` until populated by a
	/// successful `connect`.
	pub fn getpeername(&self) -> Result<SocketAddr, ErrorCode> {
		self.peer.ok_or(ErrorCode::AddrNotAvail)
	}

	/// Start the read loop on the attached connection. `ENOTCONN` when no
	/// connection is attached.
	pub fn read_start(&self, on_read: OnRead) -> i32 {
		match &self.connection {
			Some(connection) => connection.read_start(on_read),
			None => ErrorCode::NotConn.code(),
		}
	}

	/// Stop the read loop on the attached connection.
	pub fn read_stop(&self) -> i32 {
		match &self.connection {
			Some(connection) => connection.read_stop(),
			None => ErrorCode::NotConn.code(),
		}
	}

	/// Write to the attached connection. With no attached connection the
	/// completion fires immediately with `ENOTCONN`.
	pub fn write_buffer(&self, data: Vec<u8>, on_complete: OnComplete) -> i32 {
		match &self.connection {
			Some(connection) => connection.write_buffer(data, on_complete),
			None => finish_not_connected(on_complete),
		}
	}

	/// Vectored write to the attached connection.
	pub fn vectored_write(
		&self,
		chunks: Vec<WriteChunk>,
		on_complete: OnComplete,
	) -> i32 {
		match &self.connection {
			Some(connection) => connection.vectored_write(chunks, on_complete),
			None => finish_not_connected(on_complete),
		}
	}

	/// Shut down the write side of the attached connection.
	pub fn shutdown(&self, on_complete: OnComplete) -> i32 {
		match &self.connection {
			Some(connection) => connection.shutdown(on_complete),
			None => finish_not_connected(on_complete),
		}
	}

	/// The attached connection, when one exists.
	#[must_use]
	pub fn connection(&self) -> Option<&Connection> {
		self.connection.as_ref()
	}

	/// The running listener, when one exists.
	#[must_use]
	pub fn listener(&self) -> Option<&Listener> {
		self.listener.as_ref()
	}

	/// Close the wrap: the accept loop stops, the attached connection
	/// closes, recorded addresses reset.
	pub fn close(&mut self) {
		if let Some(mut listener) = self.listener.take() {
			listener.close();
		}
		if let Some(connection) = self.connection.take() {
			connection.close();
		}
		self.requested = None;
		self.local = None;
		self.peer = None;
	}

	/// Socket tuning this layer does not implement.
	pub fn set_no_delay(&self, _enable: bool) -> Result<(), WrapError> {
		Err(WrapError::NotImplemented("setNoDelay"))
	}
}

fn finish_connect_err(
	code: ErrorCode,
	on_complete: OnComplete,
) -> ConnectRequest {
	let status = code.code();
	guard(move || on_complete(status));
	ConnectRequest { status, local_addr: None }
}

fn finish_not_connected(on_complete: OnComplete) -> i32 {
	let status = ErrorCode::NotConn.code();
	guard(move || on_complete(status));
	status
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn bind_records_without_opening() {
		let mut wrap = TcpWrap::new();
		assert_eq!(wrap.bind("127.0.0.1", 8080), 0);
		// recording is not binding: no local address yet
		assert_eq!(wrap.getsockname(), Err(ErrorCode::AddrNotAvail));
		assert_eq!(wrap.getpeername(), Err(ErrorCode::AddrNotAvail));
	}

	#[test]
	fn bind_rejects_malformed_hosts() {
		let mut wrap = TcpWrap::new();
		assert_eq!(wrap.bind("not-an-ip", 80), ErrorCode::Invalid.code());
		assert_eq!(wrap.bind("::1", 80), ErrorCode::Invalid.code());
		assert_eq!(wrap.bind6("::1", 80), 0);
	}

	#[test]
	fn not_implemented_fails_loudly() {
		let wrap = TcpWrap::new();
		assert!(matches!(
			wrap.set_no_delay(true),
			Err(WrapError::NotImplemented("setNoDelay"))
		));
	}

	#[tokio::test]
	async fn read_without_connection_is_not_conn() {
		let wrap = TcpWrap::new();
		let status = wrap.read_start(Box::new(|_, _| {}));
		assert_eq!(status, ErrorCode::NotConn.code());
	}
}
