//! Server-side accept engine with admission control and retry backoff.

use std::{
	net::SocketAddr,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use tokio::{
	net::{TcpListener, TcpStream, UnixListener, UnixStream},
	task::JoinHandle,
};

use super::{guard, next_backoff, Connection, OnConnection};
use crate::error::{ErrorCode, WrapError};

/// Fixed pending-instance count used as the admission capacity for pipe
/// listeners.
pub const PIPE_PENDING_INSTANCES: usize = 4;

/// Effective admission capacity for a backlog hint: the next power of two
/// above the hint. A hint of 0 yields a capacity of 1.
#[must_use]
pub fn effective_backlog(hint: u32) -> usize {
	(hint as usize + 1).next_power_of_two()
}

/// Map a bind/listen failure. Address errors become status codes;
/// permission failures are fatal and never coded.
pub(crate) fn bind_error(err: std::io::Error) -> Result<ErrorCode, WrapError> {
	use std::io::ErrorKind;

	match err.kind() {
		ErrorKind::AddrInUse => Ok(ErrorCode::AddrInUse),
		ErrorKind::AddrNotAvailable => Ok(ErrorCode::AddrNotAvail),
		ErrorKind::PermissionDenied => Err(WrapError::PermissionDenied(err)),
		_ => Ok(ErrorCode::Unknown),
	}
}

/// Releases one admission slot on the owning listener when dropped.
///
/// Slots are tied to connection lifetime so a listener's admission control
/// recovers capacity as connections close.
#[derive(Debug)]
pub(crate) struct LiveSlot {
	count: Arc<AtomicUsize>,
}

impl Drop for LiveSlot {
	fn drop(&mut self) {
		// saturating: the owning listener may have already reset the count
		// to zero on close
		_ = self.count.fetch_update(
			Ordering::AcqRel,
			Ordering::Acquire,
			|n| Some(n.saturating_sub(1)),
		);
	}
}

#[derive(Debug)]
enum InnerListener {
	Tcp(TcpListener),
	Pipe(UnixListener),
}

enum Accepted {
	Tcp(TcpStream),
	Pipe(UnixStream),
}

impl InnerListener {
	async fn accept(&self) -> std::io::Result<Accepted> {
		match self {
			Self::Tcp(listener) => {
				let (stream, _) = listener.accept().await?;
				Ok(Accepted::Tcp(stream))
			}
			Self::Pipe(listener) => {
				let (stream, _) = listener.accept().await?;
				Ok(Accepted::Pipe(stream))
			}
		}
	}
}

impl Accepted {
	fn into_connection(self, live: LiveSlot) -> Connection {
		match self {
			Self::Tcp(stream) => Connection::from_tcp(stream, Some(live)),
			Self::Pipe(stream) => Connection::from_pipe(stream, Some(live)),
		}
	}
}

/// An open server-side resource bound to an address, owning an accept
/// loop.
///
/// The listener does not own the connections it hands out; ownership of
/// each accepted [`Connection`] transfers to whatever registered the
/// new-connection callback.
#[derive(Debug)]
pub struct Listener {
	local_addr: Option<SocketAddr>,
	path: Option<PathBuf>,
	capacity: usize,
	live: Arc<AtomicUsize>,
	closed: Arc<AtomicBool>,
	accept_task: Option<JoinHandle<()>>,
}

impl Listener {
	/// Start the accept loop over a bound TCP listener.
	pub(crate) fn spawn_tcp(
		listener: TcpListener,
		capacity: usize,
		on_connection: OnConnection,
	) -> Self {
		let local_addr = listener.local_addr().ok();
		Self::spawn(
			InnerListener::Tcp(listener),
			local_addr,
			None,
			capacity,
			on_connection,
		)
	}

	/// Start the accept loop over a bound Unix listener. Capacity is the
	/// fixed pending-instance count.
	pub(crate) fn spawn_pipe(
		listener: UnixListener,
		path: PathBuf,
		on_connection: OnConnection,
	) -> Self {
		Self::spawn(
			InnerListener::Pipe(listener),
			None,
			Some(path),
			PIPE_PENDING_INSTANCES,
			on_connection,
		)
	}

	fn spawn(
		inner: InnerListener,
		local_addr: Option<SocketAddr>,
		path: Option<PathBuf>,
		capacity: usize,
		on_connection: OnConnection,
	) -> Self {
		let live = Arc::new(AtomicUsize::new(0));
		let closed = Arc::new(AtomicBool::new(false));

		let accept_task = tokio::spawn(accept_loop(
			inner,
			capacity,
			Arc::clone(&live),
			Arc::clone(&closed),
			on_connection,
		));

		Self { local_addr, path, capacity, live, closed, accept_task: Some(accept_task) }
	}

	/// OS-assigned bound address (TCP). May differ from the requested one,
	/// e.g. after binding ephemeral port 0.
	#[must_use]
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.local_addr
	}

	/// Bound filesystem path (pipes).
	#[must_use]
	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	/// Admission capacity.
	#[must_use]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Connections currently counted against the capacity.
	#[must_use]
	pub fn live_connections(&self) -> usize {
		self.live.load(Ordering::Acquire)
	}

	/// Stop accepting and reset listener-local state. A pending in-flight
	/// accept produces no further callbacks once this returns. For pipes
	/// the socket file is removed. Idempotent.
	pub fn close(&mut self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(task) = self.accept_task.take() {
			task.abort();
		}
		self.live.store(0, Ordering::Release);
		self.local_addr = None;
		self.capacity = 0;
		if let Some(path) = self.path.take() {
			// attempt cleanup; the path may already be gone
			_ = std::fs::remove_file(path);
		}
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		self.close();
	}
}

async fn accept_loop(
	inner: InnerListener,
	capacity: usize,
	live: Arc<AtomicUsize>,
	closed: Arc<AtomicBool>,
	mut on_connection: OnConnection,
) {
	let mut backoff: Option<Duration> = None;

	loop {
		if closed.load(Ordering::Acquire) {
			break;
		}

		// Admission control: self-throttle instead of accepting
		// unboundedly while the backlog is full.
		if live.load(Ordering::Acquire) >= capacity {
			let delay = next_backoff(backoff);
			backoff = Some(delay);
			tokio::time::sleep(delay).await;
			continue;
		}

		match inner.accept().await {
			Ok(accepted) => {
				backoff = None;
				live.fetch_add(1, Ordering::AcqRel);
				let slot = LiveSlot { count: Arc::clone(&live) };
				let connection = accepted.into_connection(slot);
				guard(|| on_connection(0, Some(connection)));
			}
			// closed concurrently with the accept in flight: graceful
			// shutdown, not an error to report
			Err(_) if closed.load(Ordering::Acquire) => break,
			Err(err) => {
				eprintln!("Listener: error on accept {err:?}");
				guard(|| on_connection(ErrorCode::Unknown.code(), None));
				let delay = next_backoff(backoff);
				backoff = Some(delay);
				tokio::time::sleep(delay).await;
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn effective_backlog_rounds_up() {
		assert_eq!(effective_backlog(0), 1);
		assert_eq!(effective_backlog(1), 2);
		assert_eq!(effective_backlog(2), 4);
		assert_eq!(effective_backlog(4), 8);
		assert_eq!(effective_backlog(127), 128);
		assert_eq!(effective_backlog(128), 256);
	}

	#[test]
	fn bind_errors_map_to_codes() {
		use std::io::{Error, ErrorKind};

		assert_eq!(
			bind_error(Error::new(ErrorKind::AddrInUse, "in use")).unwrap(),
			ErrorCode::AddrInUse
		);
		assert_eq!(
			bind_error(Error::new(ErrorKind::AddrNotAvailable, "gone"))
				.unwrap(),
			ErrorCode::AddrNotAvail
		);
		assert_eq!(
			bind_error(Error::new(ErrorKind::TimedOut, "t/o")).unwrap(),
			ErrorCode::Unknown
		);
	}

	#[test]
	fn permission_failures_are_fatal() {
		use std::io::{Error, ErrorKind};

		let result =
			bind_error(Error::new(ErrorKind::PermissionDenied, "eperm"));
		assert!(matches!(result, Err(WrapError::PermissionDenied(_))));
	}

	#[test]
	fn live_slot_releases_on_drop() {
		let count = Arc::new(AtomicUsize::new(1));
		let slot = LiveSlot { count: Arc::clone(&count) };
		drop(slot);
		assert_eq!(count.load(Ordering::Acquire), 0);
	}
}
