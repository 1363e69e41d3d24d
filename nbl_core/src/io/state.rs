//! Per-connection result slots for the most recent read and write.

use crate::error::ErrorCode;

/// Status slots recording the outcome of the last read and the last write
/// on one connection.
///
/// The slots are overwritten, never appended to: the engine updates them
/// after every read and every write completion and hands a copy to the
/// matching callback, so the values a callback sees stay stable even once
/// the next operation is in flight. Each connection owns its own slots;
/// they are never shared across connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
	/// Non-negative byte count of the last read, or a negative value equal
	/// to an [`ErrorCode`] signaling EOF or error. Branch on sign, not on
	/// a separate flag.
	pub bytes_read_or_error: i64,
	/// Offset of the delivered bytes within the read allocation.
	pub buffer_offset: usize,
	/// Byte length of the last completed write.
	pub bytes_written: u64,
	/// Whether the last write completed asynchronously. Always true on
	/// this transport; no write completes inline.
	pub last_write_was_async: bool,
}

impl StreamState {
	/// Record a successful read of `n` bytes.
	#[allow(clippy::cast_possible_wrap)]
	pub(crate) fn record_read(&mut self, n: usize) {
		self.bytes_read_or_error = n as i64;
		self.buffer_offset = 0;
	}

	/// Record a read-side error or EOF.
	pub(crate) fn record_read_error(&mut self, code: ErrorCode) {
		self.bytes_read_or_error = i64::from(code.code());
		self.buffer_offset = 0;
	}

	/// Record a completed write of `n` bytes.
	pub(crate) fn record_write(&mut self, n: u64) {
		self.bytes_written = n;
		self.last_write_was_async = true;
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn read_slots_branch_on_sign() {
		let mut state = StreamState::default();

		state.record_read(4096);
		assert_eq!(state.bytes_read_or_error, 4096);

		state.record_read_error(ErrorCode::Eof);
		assert!(state.bytes_read_or_error < 0);
		assert_eq!(
			ErrorCode::from_code(
				i32::try_from(state.bytes_read_or_error).unwrap()
			),
			Some(ErrorCode::Eof)
		);
	}

	#[test]
	fn write_slots_are_overwritten() {
		let mut state = StreamState::default();
		state.record_write(10);
		state.record_write(0);
		assert_eq!(state.bytes_written, 0);
		assert!(state.last_write_was_async);
	}
}
