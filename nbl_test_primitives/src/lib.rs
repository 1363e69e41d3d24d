//! Primitive types for test setup.

use std::{
	net::TcpListener,
	ops::{Deref, Range},
};

use rand::prelude::*;

const SERVER_PORT_RANGE: Range<u16> = 10000..60000;
const MAX_PORT_SEARCH_ATTEMPTS: u16 = 50;

/// Wrapper type for a filesystem socket path that removes the file at the
/// path on drop.
#[derive(Debug)]
pub struct PathWrapper(String);

impl From<String> for PathWrapper {
	fn from(path: String) -> Self {
		Self(path)
	}
}

impl Drop for PathWrapper {
	fn drop(&mut self) {
		// Explicitly ignore the result; the path may never have been bound
		drop(std::fs::remove_file(&self.0));
	}
}

impl Deref for PathWrapper {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

/// Unique socket path under the system temp dir for the test `name`.
#[must_use]
pub fn socket_path(name: &str) -> PathWrapper {
	let suffix: u32 = rand::thread_rng().gen();
	PathWrapper(format!(
		"{}/{name}_{suffix}.sock",
		std::env::temp_dir().display()
	))
}

/// Get a bind-able TCP port on the local system.
#[must_use]
pub fn find_free_port() -> Option<u16> {
	let mut rng = rand::thread_rng();
	for _ in 0..MAX_PORT_SEARCH_ATTEMPTS {
		let port = rng.gen_range(SERVER_PORT_RANGE);
		if port_is_available(port) {
			return Some(port);
		}
	}

	None
}

/// Return wether or not the port can be bind-ed too.
fn port_is_available(port: u16) -> bool {
	TcpListener::bind(("127.0.0.1", port)).is_ok()
}
