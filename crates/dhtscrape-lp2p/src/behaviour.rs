//! Swarm construction: Kademlia (client mode) + identify over TCP and QUIC.

use std::time::Duration;

use libp2p::{identify, kad, noise, swarm::NetworkBehaviour, tcp, yamux, PeerId, Swarm};

use dhtscrape_core::version::USER_AGENT;
use dhtscrape_services::NetworkError;

/// Protocol version advertised over identify.
const IDENTIFY_PROTOCOL: &str = "ipfs/0.1.0";
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(NetworkBehaviour)]
pub struct ScrapeBehaviour {
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
}

impl ScrapeBehaviour {
    pub fn new(local_peer_id: PeerId, local_public_key: libp2p::identity::PublicKey) -> Self {
        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.to_string(), local_public_key)
                .with_agent_version(USER_AGENT.to_string()),
        );

        let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
        kad_config.set_query_timeout(QUERY_TIMEOUT);
        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        // Scrapers only ask; they never serve records.
        kademlia.set_mode(Some(kad::Mode::Client));

        Self { kademlia, identify }
    }
}

/// Fresh identity, TCP (noise + yamux), QUIC and DNS resolution.
pub fn build_swarm() -> Result<Swarm<ScrapeBehaviour>, NetworkError> {
    let transport = |e: &dyn std::fmt::Display| NetworkError::Transport(e.to_string());

    let swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| transport(&e))?
        .with_quic()
        .with_dns()
        .map_err(|e| transport(&e))?
        .with_behaviour(|key| {
            let local_peer_id = key.public().to_peer_id();
            tracing::debug!(peer_id = %local_peer_id, "created swarm identity");
            ScrapeBehaviour::new(local_peer_id, key.public())
        })
        .map_err(|e| transport(&e))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}
