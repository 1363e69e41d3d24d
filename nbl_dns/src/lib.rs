//! DNS resolution for the binding layer: concurrent multi-record-type
//! queries with per-server fallback. Independent of the connection wraps;
//! shares only the numeric error-code space.

#![deny(clippy::all, unsafe_code)]

pub mod error;
pub mod resolver;
