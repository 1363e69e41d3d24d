//! End-to-end tests for the listener accept loop: admission control,
//! capacity rounding, address round-trips, and close semantics.

use std::time::Duration;

use integration::{completion_sink, connection_sink};
use nbl_core::{error::ErrorCode, pipe::PipeWrap, tcp::TcpWrap};
use nbl_test_primitives::socket_path;
use tokio::{
	net::TcpStream,
	time::{sleep, timeout},
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
	for _ in 0..100 {
		if cond() {
			return;
		}
		sleep(Duration::from_millis(50)).await;
	}
	panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn listen_records_os_assigned_address() {
	let mut wrap = TcpWrap::new();
	assert_eq!(wrap.bind("127.0.0.1", 0), 0);

	let (on_connection, _connections) = connection_sink();
	assert_eq!(wrap.listen(16, on_connection).await.unwrap(), 0);

	// ephemeral port 0 resolves to a real, queryable port
	let addr = wrap.getsockname().unwrap();
	assert_ne!(addr.port(), 0);
	assert_eq!(wrap.listener().unwrap().local_addr(), Some(addr));
	assert_eq!(wrap.listener().unwrap().capacity(), 32);
}

#[tokio::test]
async fn accepts_increment_live_count_and_slots_release() {
	let mut wrap = TcpWrap::new();
	assert_eq!(wrap.bind("127.0.0.1", 0), 0);
	let (on_connection, mut connections) = connection_sink();
	assert_eq!(wrap.listen(4, on_connection).await.unwrap(), 0);
	let addr = wrap.getsockname().unwrap();

	let _client = TcpStream::connect(addr).await.unwrap();
	let (status, connection) =
		timeout(RECV_TIMEOUT, connections.recv()).await.unwrap().unwrap();
	assert_eq!(status, 0);
	let connection = connection.unwrap();
	assert_eq!(wrap.listener().unwrap().live_connections(), 1);

	drop(connection);
	wait_for("slot release", || {
		wrap.listener().unwrap().live_connections() == 0
	})
	.await;
}

#[tokio::test]
async fn zero_backlog_defers_a_second_connection() {
	let mut wrap = TcpWrap::new();
	assert_eq!(wrap.bind("127.0.0.1", 0), 0);
	let (on_connection, mut connections) = connection_sink();
	assert_eq!(wrap.listen(0, on_connection).await.unwrap(), 0);
	assert_eq!(wrap.listener().unwrap().capacity(), 1);
	let addr = wrap.getsockname().unwrap();

	let _first = TcpStream::connect(addr).await.unwrap();
	let (status, first_conn) =
		timeout(RECV_TIMEOUT, connections.recv()).await.unwrap().unwrap();
	assert_eq!(status, 0);
	let first_conn = first_conn.unwrap();

	// The OS completes the handshake, but the loop must not hand the
	// connection out while the backlog is full.
	let _second = TcpStream::connect(addr).await.unwrap();
	sleep(Duration::from_millis(200)).await;
	assert!(connections.try_recv().is_err());
	assert_eq!(wrap.listener().unwrap().live_connections(), 1);

	// Releasing the first slot lets the deferred connection through.
	drop(first_conn);
	let (status, second_conn) =
		timeout(RECV_TIMEOUT, connections.recv()).await.unwrap().unwrap();
	assert_eq!(status, 0);
	assert!(second_conn.is_some());
	assert_eq!(wrap.listener().unwrap().live_connections(), 1);
}

#[tokio::test]
async fn close_with_pending_accept_stays_silent() {
	let mut wrap = TcpWrap::new();
	assert_eq!(wrap.bind("127.0.0.1", 0), 0);
	let (on_connection, mut connections) = connection_sink();
	assert_eq!(wrap.listen(4, on_connection).await.unwrap(), 0);
	let addr = wrap.getsockname().unwrap();

	// give the accept loop time to park in accept
	sleep(Duration::from_millis(50)).await;
	wrap.close();
	sleep(Duration::from_millis(50)).await;
	assert!(connections.try_recv().is_err());

	// the listener handle is gone; nothing is accepting here anymore
	assert!(TcpStream::connect(addr).await.is_err());
	assert_eq!(wrap.getsockname(), Err(ErrorCode::AddrNotAvail));
}

#[tokio::test]
async fn pipe_accepts_connections_at_fixed_capacity() {
	let path = socket_path("nbl_pipe_accept");
	let mut server = PipeWrap::new();
	assert_eq!(server.bind(&*path), 0);
	let (on_connection, mut connections) = connection_sink();
	assert_eq!(server.listen(128, on_connection).unwrap(), 0);

	// the backlog hint is ignored for pipes
	assert_eq!(server.listener().unwrap().capacity(), 4);
	assert_eq!(server.sockname().unwrap(), std::path::Path::new(&*path));

	let mut client = PipeWrap::new();
	let (on_complete, mut done) = completion_sink();
	assert_eq!(client.connect(&*path, on_complete).await, 0);
	assert_eq!(timeout(RECV_TIMEOUT, done.recv()).await.unwrap(), Some(0));
	assert_eq!(client.peername().unwrap(), std::path::Path::new(&*path));

	let (status, connection) =
		timeout(RECV_TIMEOUT, connections.recv()).await.unwrap().unwrap();
	assert_eq!(status, 0);
	assert!(connection.is_some());
	assert_eq!(server.listener().unwrap().live_connections(), 1);
}

#[tokio::test]
async fn pipe_listen_on_existing_path_is_addr_in_use() {
	let path = socket_path("nbl_pipe_inuse");
	let mut first = PipeWrap::new();
	assert_eq!(first.bind(&*path), 0);
	let (on_connection, _connections) = connection_sink();
	assert_eq!(first.listen(0, on_connection).unwrap(), 0);

	let mut second = PipeWrap::new();
	assert_eq!(second.bind(&*path), 0);
	let (on_connection, _connections) = connection_sink();
	assert_eq!(
		second.listen(0, on_connection).unwrap(),
		ErrorCode::AddrInUse.code()
	);
}

#[tokio::test]
async fn pipe_close_removes_the_socket_file() {
	let path = socket_path("nbl_pipe_close");
	let mut server = PipeWrap::new();
	assert_eq!(server.bind(&*path), 0);
	let (on_connection, _connections) = connection_sink();
	assert_eq!(server.listen(0, on_connection).unwrap(), 0);
	assert!(std::path::Path::new(&*path).exists());

	server.close();
	assert!(!std::path::Path::new(&*path).exists());
	assert_eq!(server.sockname(), Err(ErrorCode::AddrNotAvail));
}
