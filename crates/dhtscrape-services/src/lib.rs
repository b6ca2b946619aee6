//! dhtscrape-services — the scrape orchestration and distribution engine.
//!
//! Leaf first:
//!   - `rate_limit` — admission tokens bounding in-flight lookups
//!   - `round`      — one round of random closest-peer lookups
//!   - `debounce`   — per-peer quiet-period coalescing of directory updates
//!   - `driver`     — session lifecycle, rounds, restart loop
//!   - `aggregating` — fan-out of one scrape to many subscribers

pub mod aggregating;
pub mod backoff;
pub mod debounce;
pub mod driver;
pub mod error;
pub mod network;
pub mod rate_limit;
pub mod round;
pub mod scraper;
pub mod stats;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregating::{AggregatingBuilder, AggregatingScraper};
pub use backoff::{Backoff, ExponentialBackoff, NoBackoff};
pub use debounce::Debouncer;
pub use dhtscrape_core::config::DebouncePolicy;
pub use driver::{DhtScraper, DriverState, ScrapeTuning};
pub use error::ScrapeError;
pub use network::{
    observe, DirectoryError, DiscoveryHandle, Network, NetworkError, NetworkHandle,
    NetworkSession, PeerDirectory, PeerIdStream, PeerUpdateFn,
};
pub use rate_limit::{RateLimiter, RatePermit};
pub use round::RoundScheduler;
pub use scraper::{ObservationStream, Scraper};
pub use stats::{ScrapeStats, StatsSnapshot};
