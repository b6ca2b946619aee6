//! Scrape counters — shared between the driver, the distributor and the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct Counters {
    sessions_started: AtomicU64,
    session_failures: AtomicU64,
    rounds_completed: AtomicU64,
    lookups_completed: AtomicU64,
    lookups_timed_out: AtomicU64,
    observations_emitted: AtomicU64,
    observations_dropped: AtomicU64,
    fanout_dropped: AtomicU64,
    active_subscriptions: AtomicU64,
}

/// Cheap-to-clone handle over shared atomic counters.
#[derive(Clone, Default)]
pub struct ScrapeStats {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`ScrapeStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub session_failures: u64,
    pub rounds_completed: u64,
    pub lookups_completed: u64,
    pub lookups_timed_out: u64,
    pub observations_emitted: u64,
    pub observations_dropped: u64,
    pub fanout_dropped: u64,
    pub active_subscriptions: u64,
}

impl ScrapeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_started(&self) {
        self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.counters.session_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn round_completed(&self) {
        self.counters.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_completed(&self) {
        self.counters.lookups_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_timed_out(&self) {
        self.counters.lookups_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observation_emitted(&self) {
        self.counters.observations_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observation_dropped(&self) {
        self.counters.observations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fanout_dropped(&self) {
        self.counters.fanout_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_subscriptions(&self, n: usize) {
        self.counters
            .active_subscriptions
            .store(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            sessions_started: c.sessions_started.load(Ordering::Relaxed),
            session_failures: c.session_failures.load(Ordering::Relaxed),
            rounds_completed: c.rounds_completed.load(Ordering::Relaxed),
            lookups_completed: c.lookups_completed.load(Ordering::Relaxed),
            lookups_timed_out: c.lookups_timed_out.load(Ordering::Relaxed),
            observations_emitted: c.observations_emitted.load(Ordering::Relaxed),
            observations_dropped: c.observations_dropped.load(Ordering::Relaxed),
            fanout_dropped: c.fanout_dropped.load(Ordering::Relaxed),
            active_subscriptions: c.active_subscriptions.load(Ordering::Relaxed),
        }
    }
}
