//! Core components of the native binding layer: a stable numeric error
//! code space, per-connection status slots, the read/write engine for
//! established connections, the listener accept loop, and the TCP, pipe,
//! and UDP wraps composed on top.
//!
//! # Maintainers Notes
//!
//! Interaction with the socket runtime should be contained within the
//! [`io`] module tree; the wrap modules own address bookkeeping and
//! protocol-specific validation only.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod error;
pub mod io;
pub mod pipe;
pub mod tcp;
pub mod udp;
