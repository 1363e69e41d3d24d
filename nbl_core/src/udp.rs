//! UDP datagram socket wrap.
//!
//! Connectionless: there is no accept loop. A receive loop delivers one
//! callback per datagram with the sender's address, and sends are
//! fire-and-forget with an optional completion.

use std::{
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex as StdMutex,
	},
	time::Duration,
};

use tokio::{net::UdpSocket, task::JoinHandle};

use crate::{
	error::{ErrorCode, WrapError},
	io::{
		bind_error, guard, next_backoff, write_error_code, OnComplete,
		StreamState,
	},
};

/// Maximum datagram size accepted for buffer-size settings and payloads.
pub const MAX_DGRAM_SIZE: usize = 64 * 1024;

/// Callback invoked once per received datagram while the recv loop is
/// active. The sender address is absent on transient receive failures.
pub type OnRecv =
	Box<dyn FnMut(&[u8], Option<SocketAddr>, StreamState) + Send>;

/// A UDP socket wrap.
///
/// Unlike the stream wraps, `bind` opens the socket eagerly: a bound
/// socket is required to receive datagrams.
#[derive(Debug)]
pub struct UdpWrap {
	socket: Option<Arc<UdpSocket>>,
	local: Option<SocketAddr>,
	receiving: Arc<AtomicBool>,
	recv_task: StdMutex<Option<JoinHandle<()>>>,
	state: Arc<StdMutex<StreamState>>,
	bytes_received: Arc<AtomicU64>,
	bytes_sent: Arc<AtomicU64>,
	recv_buffer_size: usize,
	send_buffer_size: usize,
}

impl Default for UdpWrap {
	fn default() -> Self {
		Self::new()
	}
}

impl UdpWrap {
	/// Create an unbound wrap with default buffer sizes.
	#[must_use]
	pub fn new() -> Self {
		Self {
			socket: None,
			local: None,
			receiving: Arc::new(AtomicBool::new(false)),
			recv_task: StdMutex::new(None),
			state: Arc::new(StdMutex::new(StreamState::default())),
			bytes_received: Arc::new(AtomicU64::new(0)),
			bytes_sent: Arc::new(AtomicU64::new(0)),
			recv_buffer_size: MAX_DGRAM_SIZE,
			send_buffer_size: MAX_DGRAM_SIZE,
		}
	}

	/// Bind an IPv4 datagram socket, recording the OS-assigned local
	/// address. Address errors come back as negative status codes;
	/// permission failures are fatal `Err`s.
	pub async fn bind(
		&mut self,
		host: &str,
		port: u16,
	) -> Result<i32, WrapError> {
		match host.parse::<Ipv4Addr>() {
			Ok(ip) => {
				self.bind_addr(SocketAddr::new(IpAddr::V4(ip), port)).await
			}
			Err(_) => Ok(ErrorCode::Invalid.code()),
		}
	}

	/// Bind an IPv6 datagram socket.
	pub async fn bind6(
		&mut self,
		host: &str,
		port: u16,
	) -> Result<i32, WrapError> {
		match host.parse::<Ipv6Addr>() {
			Ok(ip) => {
				self.bind_addr(SocketAddr::new(IpAddr::V6(ip), port)).await
			}
			Err(_) => Ok(ErrorCode::Invalid.code()),
		}
	}

	async fn bind_addr(&mut self, addr: SocketAddr) -> Result<i32, WrapError> {
		if self.socket.is_some() {
			// already bound
			return Ok(ErrorCode::Invalid.code());
		}

		let socket = match UdpSocket::bind(addr).await {
			Ok(socket) => socket,
			Err(err) => return Ok(bind_error(err)?.code()),
		};

		self.local = socket.local_addr().ok();
		self.socket = Some(Arc::new(socket));
		Ok(0)
	}

	/// OS-assigned local address. `EADDRNOTAVAIL` until bound.
	pub fn getsockname(&self) -> Result<SocketAddr, ErrorCode> {
		self.local.ok_or(ErrorCode::AddrNotAvail)
	}

	/// Start the receive loop. Idempotent: a second call while the loop is
	/// active does not start a second loop. `EBADF` when unbound.
	///
	/// Transient receive failures are surfaced as `UNKNOWN` alongside an
	/// exponential-backoff retry; unlike a stream read loop, the recv loop
	/// keeps running. A zero-length datagram is a valid empty delivery,
	/// not end of stream.
	pub fn recv_start(&self, mut on_recv: OnRecv) -> i32 {
		let Some(socket) = self.socket.clone() else {
			return ErrorCode::BadFd.code();
		};
		if self
			.receiving
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			// already receiving
			return 0;
		}

		let receiving = Arc::clone(&self.receiving);
		let state = Arc::clone(&self.state);
		let bytes_received = Arc::clone(&self.bytes_received);
		let recv_len = self.recv_buffer_size;

		let task = tokio::spawn(async move {
			let mut backoff: Option<Duration> = None;

			loop {
				if !receiving.load(Ordering::Acquire) {
					break;
				}

				let mut buf = vec![0u8; recv_len];
				match socket.recv_from(&mut buf).await {
					Ok((n, peer)) => {
						backoff = None;
						bytes_received.fetch_add(n as u64, Ordering::Relaxed);
						buf.truncate(n);
						let snapshot = {
							let mut s = state.lock().expect("state lock");
							s.record_read(n);
							*s
						};
						guard(|| on_recv(&buf, Some(peer), snapshot));
					}
					Err(err) => {
						eprintln!("UdpWrap: error on recv {err:?}");
						let snapshot = {
							let mut s = state.lock().expect("state lock");
							s.record_read_error(ErrorCode::Unknown);
							*s
						};
						guard(|| on_recv(&[], None, snapshot));
						let delay = next_backoff(backoff);
						backoff = Some(delay);
						tokio::time::sleep(delay).await;
					}
				}
			}
		});

		*self.recv_task.lock().expect("recv task lock") = Some(task);
		0
	}

	/// Stop the receive loop. The in-flight receive, if any, completes and
	/// is delivered once; the loop does not restart. Idempotent.
	pub fn recv_stop(&self) -> i32 {
		self.receiving.store(false, Ordering::Release);
		0
	}

	/// Send one datagram to `target`. Fire-and-forget: returns 0
	/// immediately; when a completion callback is supplied it fires
	/// exactly once with the outcome. `EBADF` when unbound; a payload
	/// larger than the send buffer size is `EINVAL`.
	pub fn send(
		&self,
		data: Vec<u8>,
		target: SocketAddr,
		on_complete: Option<OnComplete>,
	) -> i32 {
		let Some(socket) = self.socket.clone() else {
			return finish_send(ErrorCode::BadFd.code(), on_complete);
		};
		if data.len() > self.send_buffer_size {
			return finish_send(ErrorCode::Invalid.code(), on_complete);
		}

		let bytes_sent = Arc::clone(&self.bytes_sent);
		let state = Arc::clone(&self.state);

		tokio::spawn(async move {
			let len = data.len() as u64;
			let status = match socket.send_to(&data, target).await {
				Ok(_) => {
					bytes_sent.fetch_add(len, Ordering::Relaxed);
					state.lock().expect("state lock").record_write(len);
					0
				}
				Err(err) => write_error_code(&err).code(),
			};
			if let Some(on_complete) = on_complete {
				guard(move || on_complete(status));
			}
		});

		0
	}

	/// Receive allocation size in bytes. `ENOTSOCK` until bound.
	pub fn recv_buffer_size(&self) -> Result<usize, ErrorCode> {
		if self.socket.is_none() {
			return Err(ErrorCode::NotSock);
		}
		Ok(self.recv_buffer_size)
	}

	/// Set the receive allocation size. `ENOTSOCK` until bound; zero or
	/// anything above [`MAX_DGRAM_SIZE`] is `EINVAL`.
	pub fn set_recv_buffer_size(&mut self, size: usize) -> i32 {
		if self.socket.is_none() {
			return ErrorCode::NotSock.code();
		}
		if size == 0 || size > MAX_DGRAM_SIZE {
			return ErrorCode::Invalid.code();
		}
		self.recv_buffer_size = size;
		0
	}

	/// Send payload limit in bytes. `ENOTSOCK` until bound.
	pub fn send_buffer_size(&self) -> Result<usize, ErrorCode> {
		if self.socket.is_none() {
			return Err(ErrorCode::NotSock);
		}
		Ok(self.send_buffer_size)
	}

	/// Set the send payload limit. `ENOTSOCK` until bound; zero or
	/// anything above [`MAX_DGRAM_SIZE`] is `EINVAL`.
	pub fn set_send_buffer_size(&mut self, size: usize) -> i32 {
		if self.socket.is_none() {
			return ErrorCode::NotSock.code();
		}
		if size == 0 || size > MAX_DGRAM_SIZE {
			return ErrorCode::Invalid.code();
		}
		self.send_buffer_size = size;
		0
	}

	/// Set the time-to-live on outgoing datagrams. `ENOTSOCK` until
	/// bound; `EINVAL` outside `1..=255`.
	pub fn set_ttl(&self, ttl: u32) -> i32 {
		let Some(socket) = &self.socket else {
			return ErrorCode::NotSock.code();
		};
		if ttl == 0 || ttl > 255 {
			return ErrorCode::Invalid.code();
		}
		match socket.set_ttl(ttl) {
			Ok(()) => 0,
			Err(_) => ErrorCode::Unknown.code(),
		}
	}

	/// Multicast tuning this layer does not implement.
	pub fn set_multicast_ttl(&self, _ttl: u32) -> Result<(), WrapError> {
		Err(WrapError::NotImplemented("setMulticastTTL"))
	}

	/// Multicast tuning this layer does not implement.
	pub fn set_multicast_loopback(&self, _on: bool) -> Result<(), WrapError> {
		Err(WrapError::NotImplemented("setMulticastLoopback"))
	}

	/// Total bytes delivered by the receive loop.
	#[must_use]
	pub fn bytes_received(&self) -> u64 {
		self.bytes_received.load(Ordering::Relaxed)
	}

	/// Total bytes successfully sent.
	#[must_use]
	pub fn bytes_sent(&self) -> u64 {
		self.bytes_sent.load(Ordering::Relaxed)
	}

	/// Copy of the most recent receive/send result slots.
	#[must_use]
	pub fn last_state(&self) -> StreamState {
		*self.state.lock().expect("state lock")
	}

	/// Close the wrap: stop the receive loop, drop the socket, reset
	/// state. Idempotent.
	pub fn close(&mut self) {
		self.receiving.store(false, Ordering::Release);
		if let Some(task) = self.recv_task.lock().expect("recv task lock").take()
		{
			task.abort();
		}
		self.socket = None;
		self.local = None;
	}
}

impl Drop for UdpWrap {
	fn drop(&mut self) {
		self.close();
	}
}

fn finish_send(status: i32, on_complete: Option<OnComplete>) -> i32 {
	if let Some(on_complete) = on_complete {
		guard(move || on_complete(status));
	}
	status
}
