//! Version strings advertised to the network and the HTTP API.

/// Crate version, taken from the manifest at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent in identify exchanges.
pub const USER_AGENT: &str = concat!("dhtscrape/", env!("CARGO_PKG_VERSION"));
