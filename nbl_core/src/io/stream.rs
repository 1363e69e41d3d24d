//! The read/write engine for one established duplex connection.

use std::{
	net::SocketAddr,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex as StdMutex,
	},
};

use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{tcp, unix, TcpStream, UnixStream},
	sync::Mutex,
	task::JoinHandle,
};

use super::{
	guard, LiveSlot, OnComplete, OnRead, StreamState, SUGGESTED_READ_SIZE,
};
use crate::error::ErrorCode;

#[derive(Debug)]
enum InnerReadHalf {
	Tcp(tcp::OwnedReadHalf),
	Pipe(unix::OwnedReadHalf),
}

#[derive(Debug)]
enum InnerWriteHalf {
	Tcp(tcp::OwnedWriteHalf),
	Pipe(unix::OwnedWriteHalf),
}

impl InnerReadHalf {
	async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		match self {
			Self::Tcp(ref mut s) => s.read(buf).await,
			Self::Pipe(ref mut s) => s.read(buf).await,
		}
	}
}

impl InnerWriteHalf {
	async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
		match self {
			Self::Tcp(ref mut s) => s.write_all(buf).await,
			Self::Pipe(ref mut s) => s.write_all(buf).await,
		}
	}

	async fn shutdown(&mut self) -> std::io::Result<()> {
		match self {
			Self::Tcp(ref mut s) => s.shutdown().await,
			Self::Pipe(ref mut s) => s.shutdown().await,
		}
	}
}

/// One chunk of a vectored write.
#[derive(Debug)]
pub enum WriteChunk {
	/// Raw bytes, written as-is.
	Buffer(Vec<u8>),
	/// Text, written as its UTF-8 bytes.
	Text(String),
}

impl WriteChunk {
	fn len(&self) -> usize {
		match self {
			Self::Buffer(b) => b.len(),
			Self::Text(t) => t.len(),
		}
	}

	fn into_bytes(self) -> Vec<u8> {
		match self {
			Self::Buffer(b) => b,
			Self::Text(t) => t.into_bytes(),
		}
	}
}

/// An established duplex byte stream between two endpoints.
///
/// The connection exclusively owns its transport; no other component may
/// close it except through [`Connection::close`]. Reads are strictly
/// sequential (one read loop, one read in flight); writes are independent
/// in-flight operations that are not sequenced against one another.
#[derive(Debug)]
pub struct Connection {
	read_half: Arc<Mutex<InnerReadHalf>>,
	write_half: Arc<Mutex<InnerWriteHalf>>,
	reading: Arc<AtomicBool>,
	closed: AtomicBool,
	bytes_read: Arc<AtomicU64>,
	bytes_written: Arc<AtomicU64>,
	state: Arc<StdMutex<StreamState>>,
	read_task: StdMutex<Option<JoinHandle<()>>>,
	live: StdMutex<Option<LiveSlot>>,
	local: Option<SocketAddr>,
	peer: Option<SocketAddr>,
}

impl Connection {
	/// Wrap an established TCP stream. `live` ties the connection to an
	/// admission slot on the accepting listener.
	pub(crate) fn from_tcp(stream: TcpStream, live: Option<LiveSlot>) -> Self {
		let local = stream.local_addr().ok();
		let peer = stream.peer_addr().ok();
		let (read, write) = stream.into_split();
		Self::new(
			InnerReadHalf::Tcp(read),
			InnerWriteHalf::Tcp(write),
			local,
			peer,
			live,
		)
	}

	/// Wrap an established Unix stream.
	pub(crate) fn from_pipe(stream: UnixStream, live: Option<LiveSlot>) -> Self {
		let (read, write) = stream.into_split();
		Self::new(
			InnerReadHalf::Pipe(read),
			InnerWriteHalf::Pipe(write),
			None,
			None,
			live,
		)
	}

	fn new(
		read_half: InnerReadHalf,
		write_half: InnerWriteHalf,
		local: Option<SocketAddr>,
		peer: Option<SocketAddr>,
		live: Option<LiveSlot>,
	) -> Self {
		Self {
			read_half: Arc::new(Mutex::new(read_half)),
			write_half: Arc::new(Mutex::new(write_half)),
			reading: Arc::new(AtomicBool::new(false)),
			closed: AtomicBool::new(false),
			bytes_read: Arc::new(AtomicU64::new(0)),
			bytes_written: Arc::new(AtomicU64::new(0)),
			state: Arc::new(StdMutex::new(StreamState::default())),
			read_task: StdMutex::new(None),
			live: StdMutex::new(live),
			local,
			peer,
		}
	}

	/// Start the read loop. Idempotent: a second call while the loop is
	/// active does not start a second loop and the supplied callback is
	/// dropped. Returns 0; failures surface asynchronously through
	/// `on_read`.
	pub fn read_start(&self, mut on_read: OnRead) -> i32 {
		if self
			.reading
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			// already reading
			return 0;
		}

		let read_half = Arc::clone(&self.read_half);
		let reading = Arc::clone(&self.reading);
		let bytes_read = Arc::clone(&self.bytes_read);
		let state = Arc::clone(&self.state);

		let task = tokio::spawn(async move {
			loop {
				if !reading.load(Ordering::Acquire) {
					break;
				}

				let mut buf = vec![0u8; SUGGESTED_READ_SIZE];
				let result = read_half.lock().await.read(&mut buf).await;

				match result {
					Ok(0) => {
						let snapshot = {
							let mut s = state.lock().expect("state lock");
							s.record_read_error(ErrorCode::Eof);
							*s
						};
						guard(|| on_read(&[], snapshot));
						reading.store(false, Ordering::Release);
						break;
					}
					Ok(n) => {
						bytes_read.fetch_add(n as u64, Ordering::Relaxed);
						buf.truncate(n);
						let snapshot = {
							let mut s = state.lock().expect("state lock");
							s.record_read(n);
							*s
						};
						guard(|| on_read(&buf, snapshot));
					}
					Err(err) => {
						// Read errors are terminal for the loop; the caller
						// must call `read_start` again to keep reading.
						let snapshot = {
							let mut s = state.lock().expect("state lock");
							s.record_read_error(read_error_code(&err));
							*s
						};
						guard(|| on_read(&[], snapshot));
						reading.store(false, Ordering::Release);
						break;
					}
				}
			}
		});

		*self.read_task.lock().expect("read task lock") = Some(task);
		0
	}

	/// Stop the read loop. The in-flight read, if any, completes and is
	/// delivered once; the loop does not restart. Idempotent.
	pub fn read_stop(&self) -> i32 {
		self.reading.store(false, Ordering::Release);
		0
	}

	/// Write all of `data` to the transport. Returns 0 immediately; the
	/// real outcome arrives through `on_complete`, invoked exactly once.
	///
	/// In-flight writes are not sequenced against one another; if FIFO
	/// delivery matters the caller must await each completion before
	/// issuing the next write.
	pub fn write_buffer(&self, data: Vec<u8>, on_complete: OnComplete) -> i32 {
		let write_half = Arc::clone(&self.write_half);
		let bytes_written = Arc::clone(&self.bytes_written);
		let state = Arc::clone(&self.state);

		tokio::spawn(async move {
			let len = data.len() as u64;
			let status = match write_half.lock().await.write_all(&data).await {
				Ok(()) => {
					bytes_written.fetch_add(len, Ordering::Relaxed);
					state.lock().expect("state lock").record_write(len);
					0
				}
				Err(err) => write_error_code(&err).code(),
			};
			guard(move || on_complete(status));
		});

		0
	}

	/// Concatenate `chunks` into one buffer and delegate to
	/// [`Connection::write_buffer`].
	pub fn vectored_write(
		&self,
		chunks: Vec<WriteChunk>,
		on_complete: OnComplete,
	) -> i32 {
		let total: usize = chunks.iter().map(WriteChunk::len).sum();
		let mut data = Vec::with_capacity(total);
		for chunk in chunks {
			data.append(&mut chunk.into_bytes());
		}

		self.write_buffer(data, on_complete)
	}

	/// Close the write side of the transport. The completion callback
	/// fires exactly once regardless of outcome; a close failure maps to
	/// `ENOTCONN`.
	pub fn shutdown(&self, on_complete: OnComplete) -> i32 {
		let write_half = Arc::clone(&self.write_half);

		tokio::spawn(async move {
			let status = match write_half.lock().await.shutdown().await {
				Ok(()) => 0,
				Err(_) => ErrorCode::NotConn.code(),
			};
			guard(move || on_complete(status));
		});

		0
	}

	/// Close the connection: the read loop stops delivering and the
	/// admission slot on the accepting listener, if any, is released.
	/// Idempotent.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.reading.store(false, Ordering::Release);
		if let Some(task) = self.read_task.lock().expect("read task lock").take()
		{
			task.abort();
		}
		drop(self.live.lock().expect("live slot lock").take());
	}

	/// Total bytes delivered by the read loop.
	#[must_use]
	pub fn bytes_read(&self) -> u64 {
		self.bytes_read.load(Ordering::Relaxed)
	}

	/// Total bytes successfully written.
	#[must_use]
	pub fn bytes_written(&self) -> u64 {
		self.bytes_written.load(Ordering::Relaxed)
	}

	/// Copy of the most recent read/write result slots.
	#[must_use]
	pub fn last_state(&self) -> StreamState {
		*self.state.lock().expect("state lock")
	}

	/// Local endpoint captured at establishment (TCP only).
	#[must_use]
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.local
	}

	/// Peer endpoint captured at establishment (TCP only).
	#[must_use]
	pub fn peer_addr(&self) -> Option<SocketAddr> {
		self.peer
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.close();
	}
}

// Interrupted and already-closed resources read as orderly EOF; resets
// keep their identity; everything else is the generic code.
fn read_error_code(err: &std::io::Error) -> ErrorCode {
	use std::io::ErrorKind;

	match err.kind() {
		ErrorKind::Interrupted => ErrorCode::Eof,
		ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
			ErrorCode::ConnReset
		}
		_ => ErrorCode::Unknown,
	}
}

pub(crate) fn write_error_code(err: &std::io::Error) -> ErrorCode {
	use std::io::ErrorKind;

	match err.kind() {
		ErrorKind::BrokenPipe | ErrorKind::NotConnected => ErrorCode::BadFd,
		_ => ErrorCode::Unknown,
	}
}

#[cfg(test)]
mod test {
	use std::io::{Error, ErrorKind};

	use super::*;

	#[test]
	fn read_errors_map_to_codes() {
		let interrupted = Error::new(ErrorKind::Interrupted, "sig");
		assert_eq!(read_error_code(&interrupted), ErrorCode::Eof);

		let reset = Error::new(ErrorKind::ConnectionReset, "rst");
		assert_eq!(read_error_code(&reset), ErrorCode::ConnReset);

		let aborted = Error::new(ErrorKind::ConnectionAborted, "abrt");
		assert_eq!(read_error_code(&aborted), ErrorCode::ConnReset);

		let other = Error::new(ErrorKind::OutOfMemory, "oom");
		assert_eq!(read_error_code(&other), ErrorCode::Unknown);
	}

	#[test]
	fn write_errors_map_to_codes() {
		let pipe = Error::new(ErrorKind::BrokenPipe, "epipe");
		assert_eq!(write_error_code(&pipe), ErrorCode::BadFd);

		let other = Error::new(ErrorKind::TimedOut, "t/o");
		assert_eq!(write_error_code(&other), ErrorCode::Unknown);
	}

	#[tokio::test]
	async fn vectored_write_concatenates_chunks() {
		let (client, mut server) = UnixStream::pair().expect("socketpair");
		let conn = Connection::from_pipe(client, None);

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let status = conn.vectored_write(
			vec![
				WriteChunk::Text("ab".to_string()),
				WriteChunk::Buffer(vec![b'c']),
				WriteChunk::Text(String::new()),
			],
			Box::new(move |status| {
				_ = tx.send(status);
			}),
		);
		assert_eq!(status, 0);
		assert_eq!(rx.recv().await, Some(0));

		let mut buf = [0u8; 3];
		server.read_exact(&mut buf).await.unwrap();
		assert_eq!(&buf, b"abc");
		assert_eq!(conn.bytes_written(), 3);
		assert_eq!(conn.last_state().bytes_written, 3);
		assert!(conn.last_state().last_write_was_async);
	}
}
