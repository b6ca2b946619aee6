//! Network collaborator contract.
//!
//! The scrape engine never builds hosts or runs DHT queries itself. It asks a
//! [`Network`] for a fresh session, hands it the (debounced) peer-update
//! callback, and issues closest-peer lookups through the returned
//! [`DiscoveryHandle`]. The host lives until the session's cancellation token
//! fires.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use dhtscrape_core::{PeerObservation, ScrapeKey};

/// Lazily produced, finite sequence of peer ids from one lookup.
pub type PeerIdStream = BoxStream<'static, String>;

/// Called whenever the peer directory gains or changes an entry for a peer.
pub type PeerUpdateFn = Arc<dyn Fn(Arc<dyn PeerDirectory>, String) + Send + Sync>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },
    #[error("transport setup failed: {0}")]
    Transport(String),
    #[error("listen on {addr} failed: {reason}")]
    Listen { addr: String, reason: String },
    #[error("closest-peers query failed: {0}")]
    Query(String),
    #[error("network session closed")]
    SessionClosed,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("peer {0} not in directory")]
    UnknownPeer(String),
    #[error("no agent version recorded for {0}")]
    NoAgentVersion(String),
}

/// Point lookups into the per-peer metadata store.
pub trait PeerDirectory: Send + Sync {
    fn addresses(&self, peer: &str) -> Vec<String>;
    fn agent_version(&self, peer: &str) -> Result<String, DirectoryError>;
    fn protocols(&self, peer: &str) -> Vec<String>;
}

/// The host side of a session. Only used for diagnostics.
pub trait NetworkHandle: Send + Sync {
    fn local_peer_id(&self) -> String;
    fn listen_addrs(&self) -> Vec<String>;
}

#[async_trait]
pub trait DiscoveryHandle: Send + Sync {
    /// Start a closest-peers query for `key`.
    ///
    /// The stream ends when the query completes. Dropping it or cancelling
    /// `cancel` terminates the query early.
    async fn find_closest_peers(
        &self,
        cancel: CancellationToken,
        key: &ScrapeKey,
    ) -> Result<PeerIdStream, NetworkError>;
}

/// A live host + DHT pair.
pub struct NetworkSession {
    pub host: Box<dyn NetworkHandle>,
    pub dht: Arc<dyn DiscoveryHandle>,
}

#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Establish a fresh identity, connect to `bootstrap_addrs` best-effort and
    /// start reporting directory writes to `on_peer_update`.
    ///
    /// Everything the session spawns must stop once `cancel` fires.
    async fn create_session(
        &self,
        cancel: CancellationToken,
        bootstrap_addrs: &[String],
        on_peer_update: PeerUpdateFn,
    ) -> Result<NetworkSession, NetworkError>;
}

/// Build an observation from the directory's current state for `peer`.
pub fn observe(directory: &dyn PeerDirectory, peer: &str) -> PeerObservation {
    PeerObservation {
        peer_id: peer.to_string(),
        addresses: directory.addresses(peer),
        protocols: directory.protocols(peer),
        agent_version: directory.agent_version(peer).unwrap_or_default(),
    }
}
