//! Fan-out Distributor — one upstream scrape shared by many subscribers.
//!
//! The upstream runs only while at least one subscription is open:
//!
//!   - first subscriber: a fresh activation token is minted and the upstream
//!     scrape is started under it
//!   - last subscriber leaves: the activation is cancelled, stopping upstream
//!
//! Every observation is offered to every subscriber without blocking. A
//! subscriber whose buffer is full misses that observation; the others are
//! unaffected.
//!
//! All bookkeeping lives under one mutex, and sends happen while holding it,
//! so a subscription that has been removed never receives another value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dhtscrape_core::PeerObservation;

use crate::scraper::{ObservationStream, Scraper};
use crate::stats::ScrapeStats;

/// Pause before restarting an upstream whose stream ended on its own.
const UPSTREAM_RESTART_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_CAPACITY: usize = 64;

struct Activation {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    next_generation: u64,
    channels: HashMap<u64, mpsc::Sender<PeerObservation>>,
    activation: Option<Activation>,
}

struct Shared {
    upstream: Arc<dyn Scraper>,
    capacity: usize,
    stats: ScrapeStats,
    subs: Mutex<Subscriptions>,
    restart_delay: Duration,
}

pub struct AggregatingBuilder {
    upstream: Arc<dyn Scraper>,
    capacity: usize,
    stats: ScrapeStats,
    restart_delay: Duration,
}

impl AggregatingBuilder {
    /// Buffer of each subscriber's stream.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn stats(mut self, stats: ScrapeStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn build(self) -> AggregatingScraper {
        AggregatingScraper {
            shared: Arc::new(Shared {
                upstream: self.upstream,
                capacity: self.capacity.max(1),
                stats: self.stats,
                subs: Mutex::new(Subscriptions::default()),
                restart_delay: self.restart_delay,
            }),
        }
    }
}

#[derive(Clone)]
pub struct AggregatingScraper {
    shared: Arc<Shared>,
}

impl AggregatingScraper {
    /// `capacity` is the buffer of each subscriber's stream.
    pub fn new(upstream: Arc<dyn Scraper>, capacity: usize) -> Self {
        Self::builder(upstream).capacity(capacity).build()
    }

    pub fn builder(upstream: Arc<dyn Scraper>) -> AggregatingBuilder {
        AggregatingBuilder {
            upstream,
            capacity: DEFAULT_CAPACITY,
            stats: ScrapeStats::new(),
            restart_delay: UPSTREAM_RESTART_DELAY,
        }
    }

    /// Open subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.shared.lock().channels.len()
    }

    /// Whether an upstream scrape is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.lock().activation.is_some()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        self.subs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offer `obs` to every subscriber of `generation`.
    fn fan_out(&self, generation: u64, obs: PeerObservation) {
        let subs = self.lock();
        if subs.activation.as_ref().map(|a| a.generation) != Some(generation) {
            return;
        }
        for (id, tx) in &subs.channels {
            match tx.try_send(obs.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.fanout_dropped();
                    tracing::warn!(subscription = id, peer = %obs.peer_id, "subscriber full, dropping observation");
                }
                // Watcher removes it shortly.
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut subs = self.lock();
        if subs.channels.remove(&id).is_none() {
            return;
        }
        let remaining = subs.channels.len();
        self.stats.set_active_subscriptions(remaining);
        tracing::debug!(subscription = id, remaining, "unsubscribed");

        if remaining == 0 {
            if let Some(act) = subs.activation.take() {
                tracing::info!(generation = act.generation, "last subscriber left, stopping upstream");
                act.cancel.cancel();
            }
        }
    }
}

/// Runs the upstream scrape for one activation and fans its output out.
async fn pump(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    loop {
        let mut upstream = shared.upstream.scrape(cancel.child_token());
        loop {
            let obs = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                obs = upstream.recv() => obs,
            };
            match obs {
                Some(obs) => shared.fan_out(generation, obs),
                None => break,
            }
        }

        tracing::warn!(generation, "upstream scrape ended, restarting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.restart_delay) => {}
        }
    }
}

impl Scraper for AggregatingScraper {
    fn scrape(&self, cancel: CancellationToken) -> ObservationStream {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let closed = tx.clone();

        let (id, started) = {
            let mut subs = self.shared.lock();
            let id = subs.next_id;
            subs.next_id += 1;
            subs.channels.insert(id, tx);
            self.shared.stats.set_active_subscriptions(subs.channels.len());

            let started = if subs.activation.is_some() {
                None
            } else {
                let generation = subs.next_generation;
                subs.next_generation += 1;
                let token = CancellationToken::new();
                subs.activation = Some(Activation {
                    generation,
                    cancel: token.clone(),
                });
                Some((generation, token))
            };
            (id, started)
        };
        tracing::debug!(subscription = id, "subscribed");

        if let Some((generation, token)) = started {
            tracing::info!(generation, "first subscriber, starting upstream");
            tokio::spawn(pump(self.shared.clone(), generation, token).in_current_span());
        }

        // Leave on cancel or when the subscriber drops its stream.
        let shared = self.shared.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = closed.closed() => {}
                }
                drop(closed);
                shared.unsubscribe(id);
            }
            .in_current_span(),
        );

        rx
    }
}
