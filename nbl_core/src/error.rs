//! Stable numeric error codes for the binding layer.
//!
//! Every symbolic name used anywhere in this workspace resolves to exactly
//! one stable integer, and every integer resolves back to a name and a
//! human readable message.

/// Numeric error codes surfaced through completion and read callbacks.
///
/// The discriminants are negative so a single signed slot can carry either
/// a byte count or an error code; callers branch on sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
	/// Catch-all for failures the runtime does not distinguish. Always a
	/// legal fallback outcome for any I/O failure.
	Unknown = -1,
	/// Orderly end of stream, distinct from transport failure codes.
	Eof = -2,
	/// The requested local address is already in use.
	AddrInUse = -3,
	/// The requested address is not available on this host.
	AddrNotAvail = -4,
	/// Operation on a closed or invalid resource handle.
	BadFd = -5,
	/// The remote end refused the connection.
	ConnRefused = -6,
	/// The connection was reset by the remote end.
	ConnReset = -7,
	/// An argument was outside the accepted range or shape.
	Invalid = -8,
	/// Operation requires an established connection and there is none.
	NotConn = -9,
	/// Operation requires a bound socket and there is none.
	NotSock = -10,
}

impl ErrorCode {
	const ALL: [ErrorCode; 10] = [
		Self::Unknown,
		Self::Eof,
		Self::AddrInUse,
		Self::AddrNotAvail,
		Self::BadFd,
		Self::ConnRefused,
		Self::ConnReset,
		Self::Invalid,
		Self::NotConn,
		Self::NotSock,
	];

	/// Numeric code for a symbolic name.
	///
	/// # Panics
	///
	/// Panics on a name outside the code space. An unknown name is a
	/// programming error, not a runtime condition.
	#[must_use]
	pub fn for_name(name: &str) -> Self {
		Self::ALL
			.iter()
			.copied()
			.find(|code| code.name() == name)
			.unwrap_or_else(|| panic!("unknown error name: {name}"))
	}

	/// The stable numeric code.
	#[must_use]
	pub const fn code(self) -> i32 {
		self as i32
	}

	/// Reverse lookup from a numeric code.
	#[must_use]
	pub fn from_code(code: i32) -> Option<Self> {
		Self::ALL.iter().copied().find(|c| c.code() == code)
	}

	/// Symbolic name, e.g. `"EADDRINUSE"`.
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Unknown => "UNKNOWN",
			Self::Eof => "EOF",
			Self::AddrInUse => "EADDRINUSE",
			Self::AddrNotAvail => "EADDRNOTAVAIL",
			Self::BadFd => "EBADF",
			Self::ConnRefused => "ECONNREFUSED",
			Self::ConnReset => "ECONNRESET",
			Self::Invalid => "EINVAL",
			Self::NotConn => "ENOTCONN",
			Self::NotSock => "ENOTSOCK",
		}
	}

	/// Human readable description.
	#[must_use]
	pub const fn message(self) -> &'static str {
		match self {
			Self::Unknown => "unknown error",
			Self::Eof => "end of stream",
			Self::AddrInUse => "address already in use",
			Self::AddrNotAvail => "address not available",
			Self::BadFd => "bad resource handle",
			Self::ConnRefused => "connection refused",
			Self::ConnReset => "connection reset by peer",
			Self::Invalid => "invalid argument",
			Self::NotConn => "socket is not connected",
			Self::NotSock => "socket is not bound",
		}
	}
}

/// Name and message for a numeric code, when the code is part of the
/// space.
#[must_use]
pub fn describe(code: i32) -> Option<(&'static str, &'static str)> {
	ErrorCode::from_code(code).map(|c| (c.name(), c.message()))
}

/// Failures that are never mapped into the numeric code space.
///
/// These propagate as `Err` to the immediate caller instead of traveling
/// through a completion callback.
#[derive(Debug)]
pub enum WrapError {
	/// Permission failure at bind/listen time. Indicates a misconfigured
	/// environment, not a retryable condition.
	PermissionDenied(std::io::Error),
	/// A feature this layer deliberately does not implement. The name is
	/// the operation that was requested.
	NotImplemented(&'static str),
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn name_code_round_trips() {
		for code in ErrorCode::ALL {
			assert_eq!(ErrorCode::for_name(code.name()), code);
			assert_eq!(ErrorCode::from_code(code.code()), Some(code));
		}
	}

	#[test]
	fn codes_are_negative_and_distinct() {
		let mut seen = std::collections::HashSet::new();
		for code in ErrorCode::ALL {
			assert!(code.code() < 0);
			assert!(seen.insert(code.code()));
		}
	}

	#[test]
	fn describe_known_and_unknown() {
		assert_eq!(
			describe(ErrorCode::AddrInUse.code()),
			Some(("EADDRINUSE", "address already in use"))
		);
		assert_eq!(describe(0), None);
		assert_eq!(describe(-9999), None);
	}

	#[test]
	#[should_panic(expected = "unknown error name")]
	fn unknown_name_is_a_programming_error() {
		let _ = ErrorCode::for_name("ENOPE");
	}
}
