//! dhtscrape-core — shared types, lookup keys, and configuration.
//! All other dhtscrape crates depend on this one.

pub mod config;
pub mod key;
pub mod observation;
pub mod version;

pub use key::{sample_key, KeyError, ScrapeKey};
pub use observation::PeerObservation;
