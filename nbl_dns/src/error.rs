//! Resolver error types.

use std::net::AddrParseError;

use hickory_resolver::error::ResolveError;
use nbl_core::error::ErrorCode;

/// Errors during resolver configuration and lookup.
#[derive(Debug)]
pub enum DnsError {
	/// No name servers were provided to the resolver constructor.
	NoResolversSpecified,
	/// Parsing error with a name server address or hostname.
	ParseError(String),
	/// The lookup failed on every configured server.
	ResolutionError(String),
	/// A lookup succeeded but carried no usable records.
	EmptyResponse(String),
}

impl From<AddrParseError> for DnsError {
	fn from(err: AddrParseError) -> Self {
		let msg = format!("{err:?}");
		Self::ParseError(msg)
	}
}

impl From<ResolveError> for DnsError {
	fn from(err: ResolveError) -> Self {
		let msg = format!("{err:?}");
		Self::ResolutionError(msg)
	}
}

impl DnsError {
	/// Position this error in the shared numeric code space.
	#[must_use]
	pub fn error_code(&self) -> ErrorCode {
		match self {
			Self::NoResolversSpecified | Self::ParseError(_) => {
				ErrorCode::Invalid
			}
			Self::ResolutionError(_) | Self::EmptyResponse(_) => {
				ErrorCode::Unknown
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn errors_map_into_the_shared_code_space() {
		assert_eq!(
			DnsError::NoResolversSpecified.error_code(),
			ErrorCode::Invalid
		);
		assert_eq!(
			DnsError::ParseError("bad ip".to_string()).error_code(),
			ErrorCode::Invalid
		);
		assert_eq!(
			DnsError::ResolutionError("servfail".to_string()).error_code(),
			ErrorCode::Unknown
		);
		assert_eq!(
			DnsError::EmptyResponse("example.com".to_string()).error_code(),
			ErrorCode::Unknown
		);
	}

	#[test]
	fn addr_parse_errors_convert() {
		let err = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err();
		let dns_err = DnsError::from(err);
		assert!(matches!(dns_err, DnsError::ParseError(_)));
	}
}
