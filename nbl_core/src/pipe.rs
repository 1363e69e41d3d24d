//! Unix domain socket flavor of the connection wrap.

use std::path::{Path, PathBuf};

use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
use tokio::net::{UnixListener, UnixStream};

use crate::{
	error::{ErrorCode, WrapError},
	io::{
		bind_error, guard, Connection, Listener, OnComplete, OnConnection,
		OnRead, WriteChunk,
	},
};

/// Permission bit allowing reads on the socket path.
pub const PIPE_READABLE: u32 = 1;
/// Permission bit allowing writes on the socket path.
pub const PIPE_WRITABLE: u32 = 2;

/// A Unix domain socket connection/listener wrap: the same shape as the
/// TCP wrap, addressed by filesystem path instead of host and port.
#[derive(Debug, Default)]
pub struct PipeWrap {
	requested: Option<PathBuf>,
	bound: Option<PathBuf>,
	peer: Option<PathBuf>,
	listener: Option<Listener>,
	connection: Option<Connection>,
}

impl PipeWrap {
	/// Create a wrap with no recorded path.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the requested socket path. Binding is deferred until
	/// `listen` opens the resource.
	pub fn bind(&mut self, path: impl Into<PathBuf>) -> i32 {
		self.requested = Some(path.into());
		0
	}

	/// Bind and listen on the recorded path, then start the accept loop.
	/// The backlog hint is ignored: pipe listeners use the fixed
	/// pending-instance capacity.
	///
	/// Address errors come back as negative status codes (`EADDRINUSE`
	/// when the path exists); permission failures are fatal `Err`s.
	pub fn listen(
		&mut self,
		_backlog: u32,
		on_connection: OnConnection,
	) -> Result<i32, WrapError> {
		let Some(path) = self.requested.clone() else {
			return Ok(ErrorCode::AddrNotAvail.code());
		};

		let listener = match UnixListener::bind(&path) {
			Ok(listener) => listener,
			Err(err) => return Ok(bind_error(err)?.code()),
		};

		let listener = Listener::spawn_pipe(listener, path.clone(), on_connection);
		self.bound = Some(path);
		self.listener = Some(listener);

		Ok(0)
	}

	/// Connect to a listening socket at `path`. The completion callback
	/// fires exactly once: 0 on success, `ECONNREFUSED` when nothing is
	/// listening there.
	pub async fn connect(
		&mut self,
		path: impl Into<PathBuf>,
		on_complete: OnComplete,
	) -> i32 {
		let path = path.into();
		match UnixStream::connect(&path).await {
			Ok(stream) => {
				self.connection = Some(Connection::from_pipe(stream, None));
				self.peer = Some(path);
				guard(move || on_complete(0));
				0
			}
			Err(_) => {
				let status = ErrorCode::ConnRefused.code();
				guard(move || on_complete(status));
				status
			}
		}
	}

	/// Bound socket path. `EADDRNOTAVAIL` until `listen` has run.
	pub fn sockname(&self) -> Result<&Path, ErrorCode> {
		self.bound.as_deref().ok_or(ErrorCode::AddrNotAvail)
	}

	/// Peer socket path. `EADDRNOTAVAIL` until a successful `connect`.
	pub fn peername(&self) -> Result<&Path, ErrorCode> {
		self.peer.as_deref().ok_or(ErrorCode::AddrNotAvail)
	}

	/// Change filesystem permissions on the bound socket path.
	///
	/// `mask` combines [`PIPE_READABLE`] and [`PIPE_WRITABLE`]; any other
	/// bit is `EINVAL`. `EBADF` when no listener is bound. Blocking: this
	/// is a filesystem metadata operation.
	pub fn fchmod(&self, mask: u32) -> i32 {
		if mask & !(PIPE_READABLE | PIPE_WRITABLE) != 0 {
			return ErrorCode::Invalid.code();
		}
		let Some(path) = &self.bound else {
			return ErrorCode::BadFd.code();
		};

		let mut mode = Mode::empty();
		if mask & PIPE_READABLE != 0 {
			mode.insert(Mode::S_IRUSR | Mode::S_IRGRP | Mode::S_IROTH);
		}
		if mask & PIPE_WRITABLE != 0 {
			mode.insert(Mode::S_IWUSR | Mode::S_IWGRP | Mode::S_IWOTH);
		}

		match fchmodat(
			None,
			path.as_path(),
			mode,
			FchmodatFlags::FollowSymlink,
		) {
			Ok(()) => 0,
			Err(err) => {
				eprintln!("PipeWrap: fchmod failed {err}");
				ErrorCode::Unknown.code()
			}
		}
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

	/// Close the wrap: the accept loop stops (removing the socket file),
	/// the attached connection closes, recorded paths reset.
	pub fn close(&mut self) {
		if let Some(mut listener) = self.listener.take() {
			listener.close();
		}
		if let Some(connection) = self.connection.take() {
			connection.close();
		}
		self.requested = None;
		self.bound = None;
		self.peer = None;
	}
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
	fn fchmod_rejects_unknown_bits() {
		let wrap = PipeWrap::new();
		assert_eq!(wrap.fchmod(0b100), ErrorCode::Invalid.code());
		assert_eq!(wrap.fchmod(0xff), ErrorCode::Invalid.code());
	}

	#[test]
	fn fchmod_requires_a_bound_listener() {
		let wrap = PipeWrap::new();
		assert_eq!(
			wrap.fchmod(PIPE_READABLE | PIPE_WRITABLE),
			ErrorCode::BadFd.code()
		);
	}

	#[test]
	fn listen_without_bind_is_addr_not_avail() {
		let mut wrap = PipeWrap::new();
		// no tokio runtime needed: the path check fails before binding
		let status = wrap.listen(0, Box::new(|_, _| {})).unwrap();
		assert_eq!(status, ErrorCode::AddrNotAvail.code());
	}
}
