//! Round Scheduler — one batch of random closest-peer lookups.
//!
//! Each round samples `total_keys` fresh keys and runs a lookup per key, at
//! most `capacity` at a time. The lookups' results are drained and discarded:
//! what matters is the side effect on the peer directory, which is where
//! observations come from.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dhtscrape_core::{sample_key, KeyError, ScrapeKey};

use crate::error::ScrapeError;
use crate::network::{DiscoveryHandle, NetworkError};
use crate::rate_limit::RateLimiter;
use crate::stats::ScrapeStats;

/// Source of lookup keys. Swappable so tests can inject sampling failures.
pub type KeySource = fn() -> Result<ScrapeKey, KeyError>;

pub struct RoundScheduler {
    total_keys: usize,
    lookup_timeout: Duration,
    limiter: RateLimiter,
    stats: ScrapeStats,
    keys: KeySource,
}

impl RoundScheduler {
    pub fn new(
        total_keys: usize,
        concurrency: usize,
        lookup_timeout: Duration,
        stats: ScrapeStats,
    ) -> Self {
        Self {
            total_keys,
            lookup_timeout,
            limiter: RateLimiter::new(concurrency),
            stats,
            keys: sample_key,
        }
    }

    pub fn with_key_source(mut self, keys: KeySource) -> Self {
        self.keys = keys;
        self
    }

    /// The token pool shared by every round this scheduler runs.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one round to completion.
    ///
    /// Returns `Cancelled` if `cancel` fired before every lookup finished.
    /// A key-sampling failure aborts the in-flight lookups and is returned.
    pub async fn run_round(
        &self,
        cancel: &CancellationToken,
        dht: &Arc<dyn DiscoveryHandle>,
    ) -> Result<(), ScrapeError> {
        let round = cancel.child_token();
        let _round_guard = round.clone().drop_guard();

        let mut lookups = JoinSet::new();
        for index in 0..self.total_keys {
            let key = (self.keys)()?;
            let lookup = Lookup {
                index,
                key,
                dht: dht.clone(),
                limiter: self.limiter.clone(),
                round: round.clone(),
                timeout: self.lookup_timeout,
                deadline: Instant::now() + self.lookup_timeout,
                stats: self.stats.clone(),
            };
            lookups.spawn(lookup.run().in_current_span());
        }

        while let Some(joined) = lookups.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "lookup task panicked");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        Ok(())
    }
}

struct Lookup {
    index: usize,
    key: ScrapeKey,
    dht: Arc<dyn DiscoveryHandle>,
    limiter: RateLimiter,
    round: CancellationToken,
    timeout: Duration,
    /// Fixed at spawn, so time queued for a token counts against the lookup.
    deadline: Instant,
    stats: ScrapeStats,
}

impl Lookup {
    async fn run(self) {
        let cancel = self.round.child_token();
        let _guard = cancel.clone().drop_guard();

        let work = async {
            let Ok(_permit) = self.limiter.acquire(&self.round).await else {
                return None;
            };
            let lookup = async {
                let mut peers = self.dht.find_closest_peers(cancel.clone(), &self.key).await?;
                let mut found = 0usize;
                // Drain fully so the driver can finish its bookkeeping.
                while peers.next().await.is_some() {
                    found += 1;
                }
                Ok::<_, NetworkError>(found)
            };
            Some(lookup.await)
        };

        let outcome = tokio::select! {
            biased;
            _ = self.round.cancelled() => None,
            outcome = tokio::time::timeout_at(self.deadline, work) => match outcome {
                Ok(None) => None,
                Ok(Some(result)) => Some(Ok(result)),
                Err(elapsed) => Some(Err(elapsed)),
            },
        };
        let Some(outcome) = outcome else {
            tracing::debug!(index = self.index, "lookup abandoned, round cancelled");
            return;
        };

        match outcome {
            Ok(Ok(found)) => {
                self.stats.lookup_completed();
                tracing::info!(key = %self.key, index = self.index, found, "scraped with key");
            }
            Ok(Err(e)) => {
                tracing::error!(key = %self.key, index = self.index, error = %e, "lookup failed");
            }
            Err(_) => {
                self.stats.lookup_timed_out();
                tracing::debug!(
                    key = %self.key,
                    index = self.index,
                    timeout_secs = self.timeout.as_secs(),
                    "lookup timed out"
                );
            }
        }
    }
}
