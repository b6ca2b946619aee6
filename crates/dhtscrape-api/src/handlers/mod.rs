//! HTTP API handlers — the observation stream and scrape counters.

pub mod peers;
pub mod status;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dhtscrape_services::{ScrapeStats, Scraper};

#[derive(Clone)]
pub struct ApiState {
    /// Every `/peers` request opens its own scrape on this.
    pub scraper: Arc<dyn Scraper>,
    pub stats: ScrapeStats,
    /// Parent of every request's scrape token. Cancelling it ends all streams.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(scraper: Arc<dyn Scraper>, stats: ScrapeStats) -> Self {
        Self {
            scraper,
            stats,
            shutdown: CancellationToken::new(),
        }
    }
}

// Re-export handler functions for use in router setup.
pub use peers::handle_peers;
pub use status::{handle_status, handle_version};
