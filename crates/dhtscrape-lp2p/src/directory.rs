//! In-memory peer directory fed by swarm events.
//!
//! Every write schedules the session's update callback on its own task, so
//! the swarm loop never runs consumer code.

use std::sync::Arc;

use dashmap::DashMap;

use dhtscrape_services::{DirectoryError, PeerDirectory, PeerUpdateFn};

#[derive(Debug, Default, Clone)]
struct PeerRecord {
    addresses: Vec<String>,
    protocols: Vec<String>,
    agent_version: Option<String>,
}

pub struct MemoryDirectory {
    peers: DashMap<String, PeerRecord>,
    on_update: PeerUpdateFn,
}

impl MemoryDirectory {
    pub fn new(on_update: PeerUpdateFn) -> Arc<Self> {
        Arc::new(Self {
            peers: DashMap::new(),
            on_update,
        })
    }

    /// Record addresses for `peer`, keeping any already known.
    pub fn add_addresses<I>(self: &Arc<Self>, peer: &str, addrs: I)
    where
        I: IntoIterator<Item = String>,
    {
        {
            let mut record = self.peers.entry(peer.to_string()).or_default();
            for addr in addrs {
                if !record.addresses.contains(&addr) {
                    record.addresses.push(addr);
                }
            }
        }
        self.notify(peer);
    }

    /// Record what an identify exchange told us about `peer`.
    pub fn record_identify(
        self: &Arc<Self>,
        peer: &str,
        listen_addrs: Vec<String>,
        protocols: Vec<String>,
        agent_version: String,
    ) {
        {
            let mut record = self.peers.entry(peer.to_string()).or_default();
            for addr in listen_addrs {
                if !record.addresses.contains(&addr) {
                    record.addresses.push(addr);
                }
            }
            record.protocols = protocols;
            record.agent_version = Some(agent_version);
        }
        self.notify(peer);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn notify(self: &Arc<Self>, peer: &str) {
        let on_update = self.on_update.clone();
        let directory: Arc<dyn PeerDirectory> = self.clone();
        let peer = peer.to_string();
        tokio::spawn(async move { on_update(directory, peer) });
    }
}

impl PeerDirectory for MemoryDirectory {
    fn addresses(&self, peer: &str) -> Vec<String> {
        self.peers.get(peer).map(|r| r.addresses.clone()).unwrap_or_default()
    }

    fn agent_version(&self, peer: &str) -> Result<String, DirectoryError> {
        let record = self
            .peers
            .get(peer)
            .ok_or_else(|| DirectoryError::UnknownPeer(peer.to_string()))?;
        record
            .agent_version
            .clone()
            .ok_or_else(|| DirectoryError::NoAgentVersion(peer.to_string()))
    }

    fn protocols(&self, peer: &str) -> Vec<String> {
        self.peers.get(peer).map(|r| r.protocols.clone()).unwrap_or_default()
    }
}
