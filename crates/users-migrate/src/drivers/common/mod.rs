//! Utilities shared by the store drivers.
//!
//! - [`tls`]: rustls setup for PostgreSQL connections
//! - [`snapshot`]: atomic whole-file writes

pub mod snapshot;
pub mod tls;

pub use tls::{SslMode, TlsBuilder};
