//! Peer observations — what the scraper reports about a peer.
//!
//! An observation is a snapshot taken when a peer's debounce quiet period
//! elapses. It is handed off by value; two observations of the same peer are
//! independent values, never updates to a shared record.

use serde::{Deserialize, Serialize};

/// Snapshot of everything the peer directory knows about one peer.
///
/// Serialized as one JSON object per line on the `/peers` stream:
/// `{"peerID":"12D3...","addresses":[...],"protocols":[...],"agentVersion":"..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerObservation {
    /// Opaque peer identifier (base58 peer id for libp2p).
    #[serde(rename = "peerID")]
    pub peer_id: String,

    /// Known network addresses, in directory order. May be empty.
    pub addresses: Vec<String>,

    /// Supported protocol identifiers.
    pub protocols: Vec<String>,

    /// Agent version, empty when the peer never identified itself.
    #[serde(rename = "agentVersion")]
    pub agent_version: String,
}

impl PeerObservation {
    /// An observation carrying only the peer id.
    pub fn bare(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            addresses: Vec::new(),
            protocols: Vec::new(),
            agent_version: String::new(),
        }
    }
}
