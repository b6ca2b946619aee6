//! Session Driver — turns a [`Network`] into an endless observation stream.
//!
//! Each `scrape` call spawns one driver task that cycles:
//!
//!   Connecting ──ok──▶ Running(1..=total_rounds) ──done──▶ Connecting
//!        │                     │
//!        └──────err────────────┴──▶ BackingOff ──delay──▶ Connecting
//!
//! and moves to `Stopped` as soon as the scrape's token is cancelled or the
//! consumer drops its stream. A session owns a child token: leaving the
//! session for any reason cancels its host, lookups and debounce timers, so
//! nothing from an abandoned session is emitted after a restart.
//!
//! Emission is non-blocking. When the consumer falls behind, new
//! observations are dropped with a warning rather than stalling the network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dhtscrape_core::config::{DebouncePolicy, ScrapeConfig};
use dhtscrape_core::PeerObservation;

use crate::backoff::{Backoff, NoBackoff};
use crate::debounce::Debouncer;
use crate::error::ScrapeError;
use crate::network::{observe, Network, PeerDirectory, PeerUpdateFn};
use crate::round::RoundScheduler;
use crate::scraper::{ObservationStream, Scraper};
use crate::stats::ScrapeStats;

/// Timing and sizing knobs for one driver.
#[derive(Debug, Clone)]
pub struct ScrapeTuning {
    pub total_rounds: u32,
    pub round_interval: Duration,
    pub total_keys: usize,
    pub lookup_concurrency: usize,
    pub lookup_timeout: Duration,
    pub quiet_period: Duration,
    pub debounce_policy: DebouncePolicy,
    pub channel_capacity: usize,
}

impl Default for ScrapeTuning {
    fn default() -> Self {
        Self::from(&ScrapeConfig::default())
    }
}

impl From<&ScrapeConfig> for ScrapeTuning {
    fn from(c: &ScrapeConfig) -> Self {
        Self {
            total_rounds: c.total_rounds,
            round_interval: Duration::from_secs(c.round_interval_secs),
            total_keys: c.total_keys as usize,
            lookup_concurrency: c.lookup_concurrency as usize,
            lookup_timeout: Duration::from_secs(c.lookup_timeout_secs),
            quiet_period: Duration::from_millis(c.quiet_period_ms),
            debounce_policy: c.debounce_policy,
            channel_capacity: c.channel_capacity.max(1),
        }
    }
}

/// Where the restart loop is between sessions. A session's rounds run
/// inside `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Connecting { attempt: u64 },
    BackingOff { failures: u32 },
    Stopped,
}

impl DriverState {
    /// Next state once session `attempt` ended. `failures` counts
    /// consecutive failed sessions before this one.
    fn after_session(attempt: u64, failures: u32, succeeded: bool, stopping: bool) -> Self {
        if stopping {
            DriverState::Stopped
        } else if succeeded {
            DriverState::Connecting { attempt: attempt + 1 }
        } else {
            DriverState::BackingOff {
                failures: failures.saturating_add(1),
            }
        }
    }
}

/// Scrapes the DHT through a [`Network`], restarting sessions forever.
#[derive(Clone)]
pub struct DhtScraper {
    network: Arc<dyn Network>,
    bootstrap_addrs: Arc<Vec<String>>,
    tuning: ScrapeTuning,
    backoff: Arc<dyn Backoff>,
    stats: ScrapeStats,
    span: tracing::Span,
}

impl DhtScraper {
    pub fn new(network: Arc<dyn Network>, bootstrap_addrs: Vec<String>, tuning: ScrapeTuning) -> Self {
        Self {
            network,
            bootstrap_addrs: Arc::new(bootstrap_addrs),
            tuning,
            backoff: Arc::new(NoBackoff),
            stats: ScrapeStats::new(),
            span: tracing::info_span!("scraper"),
        }
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_boxed_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = Arc::from(backoff);
        self
    }

    pub fn with_stats(mut self, stats: ScrapeStats) -> Self {
        self.stats = stats;
        self
    }

    /// Span that every task of this scraper runs under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn stats(&self) -> ScrapeStats {
        self.stats.clone()
    }

    async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<PeerObservation>) {
        let scheduler = RoundScheduler::new(
            self.tuning.total_keys,
            self.tuning.lookup_concurrency,
            self.tuning.lookup_timeout,
            self.stats.clone(),
        );

        let mut attempt = 0u64;
        let mut failures = 0u32;
        let mut state = DriverState::Connecting { attempt: 1 };

        loop {
            tracing::debug!(?state, "driver state");
            state = match state {
                DriverState::Stopped => break,

                DriverState::Connecting { attempt: n } => {
                    attempt = n;
                    let mut rounds_done = 0u32;
                    let outcome = tokio::select! {
                        outcome = self.run_session(&cancel, &tx, &scheduler, &mut rounds_done) => outcome,
                        _ = tx.closed() => {
                            tracing::info!("consumer went away");
                            Err(ScrapeError::Cancelled)
                        }
                    };

                    let stopping = cancel.is_cancelled() || tx.is_closed();
                    let next = DriverState::after_session(attempt, failures, outcome.is_ok(), stopping);
                    match (&outcome, next) {
                        (Err(e), DriverState::BackingOff { failures: n }) => {
                            failures = n;
                            self.stats.session_failed();
                            tracing::error!(error = %e, attempt, failures, rounds_done, "scrape failed");
                        }
                        (Ok(()), _) => failures = 0,
                        _ => {}
                    }
                    next
                }

                DriverState::BackingOff { failures } => {
                    let delay = self.backoff.delay(failures);
                    if delay.is_zero() {
                        // Retry immediately, but let other tasks run first.
                        tokio::task::yield_now().await;
                        DriverState::Connecting { attempt: attempt + 1 }
                    } else {
                        tracing::info!(delay_ms = delay.as_millis() as u64, "backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => DriverState::Stopped,
                            _ = tokio::time::sleep(delay) => DriverState::Connecting { attempt: attempt + 1 },
                        }
                    }
                }
            };
        }

        tracing::info!(sessions = attempt, "scrape stopped");
    }

    async fn run_session(
        &self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<PeerObservation>,
        scheduler: &RoundScheduler,
        rounds_done: &mut u32,
    ) -> Result<(), ScrapeError> {
        let session = cancel.child_token();
        let _session_guard = session.clone().drop_guard();

        let debouncer = Debouncer::new(
            self.tuning.quiet_period,
            self.tuning.debounce_policy,
            session.clone(),
        );
        let on_update = debouncer.wrap(emitter(tx.downgrade(), session.clone(), self.stats.clone()));

        self.stats.session_started();
        let net = tokio::select! {
            biased;
            _ = session.cancelled() => return Err(ScrapeError::Cancelled),
            net = self.network.create_session(session.clone(), &self.bootstrap_addrs, on_update) => net?,
        };
        tracing::info!(
            peer_id = %net.host.local_peer_id(),
            addrs = ?net.host.listen_addrs(),
            "network session started"
        );

        let total = self.tuning.total_rounds;
        for round in 1..=total {
            tracing::info!("starting scrape round {round}/{total}");
            scheduler.run_round(&session, &net.dht).await?;
            self.stats.round_completed();
            *rounds_done = round;

            tokio::select! {
                _ = session.cancelled() => return Err(ScrapeError::Cancelled),
                _ = tokio::time::sleep(self.tuning.round_interval) => {}
            }
        }

        tracing::info!(rounds = total, pending = debouncer.pending(), "network session complete");
        Ok(())
    }
}

impl Scraper for DhtScraper {
    fn scrape(&self, cancel: CancellationToken) -> ObservationStream {
        let (tx, rx) = mpsc::channel(self.tuning.channel_capacity);
        let span = self.span.clone();
        tokio::spawn(self.clone().run(cancel, tx).instrument(span));
        rx
    }
}

/// The callback at the end of the debounce chain: snapshot the peer and try
/// to hand it to the consumer.
///
/// Holds only a weak sender so a lingering callback inside a collaborator
/// can never keep the consumer's stream open.
fn emitter(
    tx: mpsc::WeakSender<PeerObservation>,
    session: CancellationToken,
    stats: ScrapeStats,
) -> PeerUpdateFn {
    Arc::new(move |directory: Arc<dyn PeerDirectory>, peer: String| {
        if session.is_cancelled() {
            return;
        }
        let Some(tx) = tx.upgrade() else {
            return;
        };
        let obs = observe(directory.as_ref(), &peer);
        match tx.try_send(obs) {
            Ok(()) => stats.observation_emitted(),
            Err(TrySendError::Full(obs)) => {
                stats.observation_dropped();
                tracing::warn!(peer = %obs.peer_id, "dropped peer observation due to full channel");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    })
}
