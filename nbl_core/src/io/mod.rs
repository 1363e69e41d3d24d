//! Abstractions for low level connection I/O.
//!
//! NOTE TO MAINTAINERS: interaction with the socket runtime should be
//! contained within this module tree.

mod listener;
mod state;
mod stream;

pub use listener::{effective_backlog, Listener, PIPE_PENDING_INSTANCES};
pub use state::StreamState;
pub use stream::{Connection, WriteChunk};

pub(crate) use listener::{bind_error, LiveSlot};
pub(crate) use stream::write_error_code;

use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	time::Duration,
};

/// Fixed buffer size allocated for every read call.
pub const SUGGESTED_READ_SIZE: usize = 64 * 1024;

/// First delay inserted when an accept or recv loop hits a transient
/// failure.
pub const INITIAL_BACKOFF_DELAY: Duration = Duration::from_millis(5);

/// Ceiling for the doubling backoff delay.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_millis(1000);

/// Callback invoked once per completed read while a read loop is active.
pub type OnRead = Box<dyn FnMut(&[u8], StreamState) + Send>;

/// Callback invoked exactly once with the completion status of a request.
pub type OnComplete = Box<dyn FnOnce(i32) + Send>;

/// Callback handed the status and connection for every accept outcome.
pub type OnConnection = Box<dyn FnMut(i32, Option<Connection>) + Send>;

/// Invoke a caller supplied callback, swallowing panics. A misbehaving
/// callback must never break an accept or read loop's control flow.
pub(crate) fn guard<F: FnOnce()>(f: F) {
	if catch_unwind(AssertUnwindSafe(f)).is_err() {
		eprintln!("nbl: user callback panicked; continuing");
	}
}

/// Next retry delay: initialize small, then double up to the ceiling.
pub(crate) fn next_backoff(prev: Option<Duration>) -> Duration {
	match prev {
		None => INITIAL_BACKOFF_DELAY,
		Some(delay) => (delay * 2).min(MAX_BACKOFF_DELAY),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn backoff_initializes_then_doubles() {
		let first = next_backoff(None);
		assert_eq!(first, INITIAL_BACKOFF_DELAY);

		let second = next_backoff(Some(first));
		assert_eq!(second, INITIAL_BACKOFF_DELAY * 2);

		let third = next_backoff(Some(second));
		assert_eq!(third, INITIAL_BACKOFF_DELAY * 4);
	}

	#[test]
	fn backoff_never_exceeds_ceiling() {
		let mut delay = next_backoff(None);
		for _ in 0..32 {
			delay = next_backoff(Some(delay));
			assert!(delay <= MAX_BACKOFF_DELAY);
		}
		assert_eq!(delay, MAX_BACKOFF_DELAY);
	}

	#[test]
	fn guard_swallows_callback_panics() {
		guard(|| panic!("misbehaving callback"));
	}
}
