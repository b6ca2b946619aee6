//! Observation Debouncer — coalesces bursts of peer-directory updates.
//!
//! Per peer:
//!
//!   ABSENT  --update-->  PENDING (timer armed, deadline = now + quiet)
//!   PENDING --update-->  PENDING (callback replaced; deadline unchanged
//!                                 under `Fixed`, pushed out under `Trailing`)
//!   PENDING --deadline-> ABSENT  (latest callback invoked with the directory)
//!   PENDING --cancel-->  ABSENT  (nothing invoked)
//!
//! The directory is read by the callback at fire time, so the emitted
//! observation reflects the peer's state then, not at the first update.
//! The pending table is sharded; updates for different peers never contend
//! on the same lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dhtscrape_core::config::DebouncePolicy;

use crate::network::{PeerDirectory, PeerUpdateFn};

struct DebounceEntry {
    directory: Arc<dyn PeerDirectory>,
    callback: PeerUpdateFn,
    deadline: Instant,
}

#[derive(Clone)]
pub struct Debouncer {
    quiet_period: Duration,
    policy: DebouncePolicy,
    cancel: CancellationToken,
    pending: Arc<DashMap<String, DebounceEntry>>,
}

impl Debouncer {
    /// Timers stop, without firing, once `cancel` fires.
    pub fn new(quiet_period: Duration, policy: DebouncePolicy, cancel: CancellationToken) -> Self {
        Self {
            quiet_period,
            policy,
            cancel,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Wrap `on_update` so bursts for one peer collapse into a single call.
    pub fn wrap(&self, on_update: PeerUpdateFn) -> PeerUpdateFn {
        let this = self.clone();
        Arc::new(move |directory: Arc<dyn PeerDirectory>, peer: String| {
            this.debounce(directory, peer, on_update.clone())
        })
    }

    /// Record an update for `peer`, arming a timer if none is pending.
    pub fn debounce(&self, directory: Arc<dyn PeerDirectory>, peer: String, callback: PeerUpdateFn) {
        if self.cancel.is_cancelled() {
            return;
        }

        let deadline = Instant::now() + self.quiet_period;
        match self.pending.entry(peer.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                // Directory handle stays as first bound.
                entry.callback = callback;
                if self.policy == DebouncePolicy::Trailing {
                    entry.deadline = deadline;
                }
                return;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DebounceEntry {
                    directory,
                    callback,
                    deadline,
                });
            }
        }

        let timer = Timer {
            pending: self.pending.clone(),
            cancel: self.cancel.clone(),
            peer,
            deadline,
        };
        tokio::spawn(timer.run().in_current_span());
    }

    /// Peers with an armed timer.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct Timer {
    pending: Arc<DashMap<String, DebounceEntry>>,
    cancel: CancellationToken,
    peer: String,
    deadline: Instant,
}

impl Timer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.pending.remove(&self.peer);
                    return;
                }
                _ = tokio::time::sleep_until(self.deadline) => {}
            }

            let deadline = self.deadline;
            match self.pending.remove_if(&self.peer, |_, e| e.deadline <= deadline) {
                Some((peer, entry)) => {
                    (entry.callback)(entry.directory, peer);
                    return;
                }
                None => match self.pending.get(&self.peer).map(|e| e.deadline) {
                    // Trailing policy pushed the deadline out.
                    Some(later) => self.deadline = later,
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;
    use std::sync::Mutex;

    type Fired = Arc<Mutex<Vec<(String, String, Instant)>>>;

    /// Timer wakeups land on millisecond ticks, never early.
    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(2),
            "fired after {actual:?}, expected {expected:?}"
        );
    }

    /// A callback that records (peer, agent version at fire time, when).
    fn recorder(fired: &Fired) -> PeerUpdateFn {
        let fired = fired.clone();
        Arc::new(move |dir: Arc<dyn PeerDirectory>, peer: String| {
            let agent = dir.agent_version(&peer).unwrap_or_default();
            fired.lock().unwrap().push((peer, agent, Instant::now()));
        })
    }

    fn directory() -> Arc<FakeDirectory> {
        let dir = Arc::new(FakeDirectory::new());
        dir.set("X", &[], &[], Some("v0"));
        dir.set("Y", &[], &[], Some("y0"));
        dir
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_call_without_extending_timer() {
        let dir = directory();
        let fired: Fired = Arc::default();
        let debouncer =
            Debouncer::new(Duration::from_millis(100), DebouncePolicy::Fixed, CancellationToken::new());
        let wrapped = debouncer.wrap(recorder(&fired));
        let start = Instant::now();

        for (at, agent) in [(0, "v1"), (30, "v2"), (60, "v3")] {
            tokio::time::sleep_until(start + Duration::from_millis(at)).await;
            dir.set_agent("X", agent);
            wrapped(dir.clone(), "X".to_string());
        }

        tokio::time::sleep_until(start + Duration::from_millis(99)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep_until(start + Duration::from_millis(500)).await;
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, "X");
        assert_eq!(fired[0].1, "v3");
        assert_near(fired[0].2 - start, Duration::from_millis(100));
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_policy_waits_for_quiet_after_last_update() {
        let dir = directory();
        let fired: Fired = Arc::default();
        let debouncer = Debouncer::new(
            Duration::from_millis(100),
            DebouncePolicy::Trailing,
            CancellationToken::new(),
        );
        let wrapped = debouncer.wrap(recorder(&fired));
        let start = Instant::now();

        for at in [0, 30, 60] {
            tokio::time::sleep_until(start + Duration::from_millis(at)).await;
            wrapped(dir.clone(), "X".to_string());
        }

        tokio::time::sleep_until(start + Duration::from_millis(159)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep_until(start + Duration::from_millis(500)).await;
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_near(fired[0].2 - start, Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn latest_callback_wins() {
        let dir = directory();
        let first: Fired = Arc::default();
        let second: Fired = Arc::default();
        let debouncer =
            Debouncer::new(Duration::from_millis(100), DebouncePolicy::Fixed, CancellationToken::new());

        debouncer.debounce(dir.clone(), "X".to_string(), recorder(&first));
        tokio::time::sleep(Duration::from_millis(10)).await;
        debouncer.debounce(dir.clone(), "X".to_string(), recorder(&second));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_peers_are_independent() {
        let dir = directory();
        let fired: Fired = Arc::default();
        let debouncer =
            Debouncer::new(Duration::from_millis(100), DebouncePolicy::Fixed, CancellationToken::new());
        let wrapped = debouncer.wrap(recorder(&fired));
        let start = Instant::now();

        wrapped(dir.clone(), "X".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        wrapped(dir.clone(), "Y".to_string());
        assert_eq!(debouncer.pending(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].0, "X");
        assert_near(fired[0].2 - start, Duration::from_millis(100));
        assert_eq!(fired[1].0, "Y");
        assert_near(fired[1].2 - start, Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_can_fire_again_after_quiet_period() {
        let dir = directory();
        let fired: Fired = Arc::default();
        let debouncer =
            Debouncer::new(Duration::from_millis(100), DebouncePolicy::Fixed, CancellationToken::new());
        let wrapped = debouncer.wrap(recorder(&fired));

        wrapped(dir.clone(), "X".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;
        wrapped(dir.clone(), "X".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_pending_entries() {
        let dir = directory();
        let fired: Fired = Arc::default();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::new(Duration::from_millis(100), DebouncePolicy::Fixed, cancel.clone());
        let wrapped = debouncer.wrap(recorder(&fired));

        wrapped(dir.clone(), "X".to_string());
        wrapped(dir.clone(), "Y".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(debouncer.pending(), 0);

        // Updates after cancellation are ignored.
        wrapped(dir.clone(), "X".to_string());
        assert_eq!(debouncer.pending(), 0);
    }
}
