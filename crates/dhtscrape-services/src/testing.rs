//! In-memory collaborators for tests: a peer directory, a scripted DHT, a
//! network that hands out sessions over them, and a hand-fed scraper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dhtscrape_core::{PeerObservation, ScrapeKey};

use crate::network::{
    DirectoryError, DiscoveryHandle, Network, NetworkError, NetworkHandle, NetworkSession,
    PeerDirectory, PeerIdStream, PeerUpdateFn,
};
use crate::scraper::{ObservationStream, Scraper};

// ── Directory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct FakePeer {
    addresses: Vec<String>,
    protocols: Vec<String>,
    agent_version: Option<String>,
}

#[derive(Default)]
pub struct FakeDirectory {
    peers: DashMap<String, FakePeer>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, peer: &str, addresses: &[&str], protocols: &[&str], agent: Option<&str>) {
        self.peers.insert(
            peer.to_string(),
            FakePeer {
                addresses: addresses.iter().map(|s| s.to_string()).collect(),
                protocols: protocols.iter().map(|s| s.to_string()).collect(),
                agent_version: agent.map(String::from),
            },
        );
    }

    pub fn set_agent(&self, peer: &str, agent: &str) {
        self.peers.entry(peer.to_string()).or_default().agent_version = Some(agent.to_string());
    }

    pub fn add_address(&self, peer: &str, addr: &str) {
        self.peers
            .entry(peer.to_string())
            .or_default()
            .addresses
            .push(addr.to_string());
    }
}

impl PeerDirectory for FakeDirectory {
    fn addresses(&self, peer: &str) -> Vec<String> {
        self.peers.get(peer).map(|p| p.addresses.clone()).unwrap_or_default()
    }

    fn agent_version(&self, peer: &str) -> Result<String, DirectoryError> {
        let entry = self
            .peers
            .get(peer)
            .ok_or_else(|| DirectoryError::UnknownPeer(peer.to_string()))?;
        entry
            .agent_version
            .clone()
            .ok_or_else(|| DirectoryError::NoAgentVersion(peer.to_string()))
    }

    fn protocols(&self, peer: &str) -> Vec<String> {
        self.peers.get(peer).map(|p| p.protocols.clone()).unwrap_or_default()
    }
}

// ── DHT ───────────────────────────────────────────────────────────────────────

type FoundHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct DhtCounters {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    yielded: AtomicUsize,
}

/// Answers every lookup with the same peers after a fixed delay.
pub struct ScriptedDht {
    peers: Vec<String>,
    delay: Duration,
    fail: bool,
    on_found: Option<FoundHook>,
    counters: Arc<DhtCounters>,
}

struct ActiveGuard(Arc<DhtCounters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct LookupState {
    peers: VecDeque<String>,
    delay: Option<Duration>,
    cancel: CancellationToken,
    on_found: Option<FoundHook>,
    counters: Arc<DhtCounters>,
    _guard: ActiveGuard,
}

impl ScriptedDht {
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers,
            delay: Duration::ZERO,
            fail: false,
            on_found: None,
            counters: Arc::default(),
        }
    }

    /// Hold every lookup open for `delay` before yielding peers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every lookup fails to start.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Called for each peer as the lookup yields it.
    pub fn on_found(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_found = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Lookups whose stream is still alive.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn peers_yielded(&self) -> usize {
        self.counters.yielded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryHandle for ScriptedDht {
    async fn find_closest_peers(
        &self,
        cancel: CancellationToken,
        _key: &ScrapeKey,
    ) -> Result<PeerIdStream, NetworkError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NetworkError::Query("scripted failure".to_string()));
        }

        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(now, Ordering::SeqCst);

        let state = LookupState {
            peers: self.peers.iter().cloned().collect(),
            delay: Some(self.delay),
            cancel,
            on_found: self.on_found.clone(),
            counters: self.counters.clone(),
            _guard: ActiveGuard(self.counters.clone()),
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            if let Some(delay) = st.delay.take() {
                tokio::select! {
                    _ = st.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if st.cancel.is_cancelled() {
                return None;
            }
            let peer = st.peers.pop_front()?;
            if let Some(hook) = &st.on_found {
                hook(&peer);
            }
            st.counters.yielded.fetch_add(1, Ordering::SeqCst);
            Some((peer, st))
        });
        Ok(stream.boxed())
    }
}

// ── Network ───────────────────────────────────────────────────────────────────

struct FakeHost;

impl NetworkHandle for FakeHost {
    fn local_peer_id(&self) -> String {
        "QmFakeLocalPeer".to_string()
    }

    fn listen_addrs(&self) -> Vec<String> {
        vec!["/ip4/127.0.0.1/tcp/4001".to_string()]
    }
}

const FAKE_LOOKUP_DELAY: Duration = Duration::from_millis(10);

/// Hands out sessions whose lookups "discover" a fixed peer set. Every
/// discovered peer is written into a shared directory and reported through
/// the session's update callback, like a real peer store would.
pub struct FakeNetwork {
    peers: Vec<String>,
    fail_first: AtomicUsize,
    attempts: AtomicUsize,
    live: Arc<AtomicUsize>,
    directory: Arc<FakeDirectory>,
    last_session: Mutex<Option<CancellationToken>>,
}

impl FakeNetwork {
    pub fn new(peers: &[&str]) -> Self {
        Self {
            peers: peers.iter().map(|s| s.to_string()).collect(),
            fail_first: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            directory: Arc::new(FakeDirectory::new()),
            last_session: Mutex::new(None),
        }
    }

    /// The first `n` session attempts fail.
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sessions whose cancellation token has not fired yet.
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Cancellation token of the most recently created session.
    pub fn last_session_token(&self) -> Option<CancellationToken> {
        self.last_session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn create_session(
        &self,
        cancel: CancellationToken,
        _bootstrap_addrs: &[String],
        on_peer_update: PeerUpdateFn,
    ) -> Result<NetworkSession, NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(NetworkError::Other("injected session failure".to_string()));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        {
            let live = self.live.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                live.fetch_sub(1, Ordering::SeqCst);
            });
        }
        *self.last_session.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());

        let directory = self.directory.clone();
        let dht = ScriptedDht::new(self.peers.clone())
            .with_delay(FAKE_LOOKUP_DELAY)
            .on_found(move |peer| {
                directory.add_address(peer, "/ip4/10.0.0.1/tcp/4001");
                directory.set_agent(peer, "fake/1.0");
                on_peer_update(directory.clone() as Arc<dyn PeerDirectory>, peer.to_string());
            });

        Ok(NetworkSession {
            host: Box::new(FakeHost),
            dht: Arc::new(dht),
        })
    }
}

// ── Scraper ───────────────────────────────────────────────────────────────────

struct Upstream {
    tx: mpsc::Sender<PeerObservation>,
    cancel: CancellationToken,
}

/// A scraper fed by hand. Counts how often `scrape` is called.
pub struct ChannelScraper {
    capacity: usize,
    calls: AtomicUsize,
    upstreams: Arc<Mutex<Vec<Upstream>>>,
}

impl ChannelScraper {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            calls: AtomicUsize::new(0),
            upstreams: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Scrape calls whose token has not been cancelled.
    pub fn live(&self) -> usize {
        self.upstreams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|u| !u.cancel.is_cancelled())
            .count()
    }

    /// Send `obs` to every live scrape stream, waiting for buffer space.
    pub async fn push(&self, obs: PeerObservation) {
        let senders: Vec<_> = self
            .upstreams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|u| !u.cancel.is_cancelled())
            .map(|u| u.tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(obs.clone()).await;
        }
    }
}

impl Scraper for ChannelScraper {
    fn scrape(&self, cancel: CancellationToken) -> ObservationStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.upstreams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Upstream {
                tx,
                cancel: cancel.clone(),
            });

        let upstreams = self.upstreams.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            upstreams
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|u| !u.cancel.is_cancelled());
        });
        rx
    }
}

/// An observation for `peer` with nothing else filled in.
pub fn observation(peer: &str) -> PeerObservation {
    PeerObservation::bare(peer)
}
