//! The contract every producer of peer observations satisfies.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dhtscrape_core::PeerObservation;

/// Bounded stream of observations. Ends only after the scrape's token is
/// cancelled.
pub type ObservationStream = mpsc::Receiver<PeerObservation>;

pub trait Scraper: Send + Sync + 'static {
    /// Start a new scraping process, returning immediately.
    ///
    /// Must be called from within a tokio runtime.
    fn scrape(&self, cancel: CancellationToken) -> ObservationStream;
}

impl<S: Scraper + ?Sized> Scraper for Arc<S> {
    fn scrape(&self, cancel: CancellationToken) -> ObservationStream {
        (**self).scrape(cancel)
    }
}
