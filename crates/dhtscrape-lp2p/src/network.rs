//! [`Network`] on rust-libp2p.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dhtscrape_core::config::NetworkConfig;
use dhtscrape_core::ScrapeKey;
use dhtscrape_services::{
    DiscoveryHandle, Network, NetworkError, NetworkHandle, NetworkSession, PeerIdStream,
    PeerUpdateFn,
};

use crate::behaviour::build_swarm;
use crate::directory::MemoryDirectory;
use crate::event_loop::{Command, EventLoop};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct Lp2pNetwork {
    listen_addrs: Vec<String>,
    bootstrap_timeout: Duration,
}

impl Lp2pNetwork {
    pub fn new(listen_addrs: Vec<String>, bootstrap_timeout: Duration) -> Self {
        Self {
            listen_addrs,
            bootstrap_timeout,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            config.listen_addrs.clone(),
            Duration::from_secs(config.bootstrap_timeout_secs),
        )
    }
}

#[async_trait]
impl Network for Lp2pNetwork {
    async fn create_session(
        &self,
        cancel: CancellationToken,
        bootstrap_addrs: &[String],
        on_peer_update: PeerUpdateFn,
    ) -> Result<NetworkSession, NetworkError> {
        let mut swarm = build_swarm()?;
        for addr in &self.listen_addrs {
            let ma = parse_addr(addr)?;
            swarm.listen_on(ma).map_err(|e| NetworkError::Listen {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        }

        let local_peer_id = *swarm.local_peer_id();
        let directory = MemoryDirectory::new(on_peer_update);
        let listen_addrs = Arc::new(DashSet::new());
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);

        let event_loop = EventLoop::new(swarm, rx, directory, listen_addrs.clone(), cancel.clone());
        tokio::spawn(event_loop.run().in_current_span());

        let connected = bootstrap(&commands, bootstrap_addrs, self.bootstrap_timeout).await;
        tracing::info!(
            peer_id = %local_peer_id,
            connected,
            total = bootstrap_addrs.len(),
            "bootstrap finished"
        );
        commands
            .send(Command::Bootstrap)
            .await
            .map_err(|_| NetworkError::SessionClosed)?;

        Ok(NetworkSession {
            host: Box::new(Lp2pHost {
                peer_id: local_peer_id,
                listen_addrs,
            }),
            dht: Arc::new(Lp2pDht { commands }),
        })
    }
}

fn parse_addr(addr: &str) -> Result<Multiaddr, NetworkError> {
    addr.parse().map_err(|e: libp2p::multiaddr::Error| NetworkError::InvalidAddress {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Split a `/.../p2p/<id>` address into the peer id and its transport part.
fn split_peer_addr(addr: &str) -> Result<(PeerId, Multiaddr), NetworkError> {
    let mut ma = parse_addr(addr)?;
    match ma.pop() {
        Some(Protocol::P2p(peer)) => Ok((peer, ma)),
        _ => Err(NetworkError::InvalidAddress {
            addr: addr.to_string(),
            reason: "missing /p2p/<peer id> suffix".to_string(),
        }),
    }
}

/// Dial every bootstrap address in parallel and wait for the dials to settle
/// or `timeout`, whichever comes first. Failures are logged, never raised.
/// Returns how many dials succeeded.
async fn bootstrap(commands: &mpsc::Sender<Command>, addrs: &[String], timeout: Duration) -> usize {
    let mut dials = futures::stream::FuturesUnordered::new();
    for addr in addrs {
        let (peer, ma) = match split_peer_addr(addr) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(error = %e, "skipping bootstrap address");
                continue;
            }
        };
        let (done, settled) = oneshot::channel();
        if commands
            .send(Command::Dial {
                peer,
                addr: ma,
                done,
            })
            .await
            .is_err()
        {
            break;
        }
        let addr = addr.clone();
        dials.push(async move { (addr, settled.await) });
    }

    let mut connected = 0;
    let wait_all = async {
        while let Some((addr, outcome)) = dials.next().await {
            match outcome {
                Ok(Ok(())) => connected += 1,
                Ok(Err(e)) => tracing::error!(addr = %addr, error = %e, "bootstrap dial failed"),
                Err(_) => tracing::error!(addr = %addr, "bootstrap dial abandoned"),
            }
        }
    };
    if tokio::time::timeout(timeout, wait_all).await.is_err() {
        tracing::warn!(timeout_secs = timeout.as_secs(), "bootstrap dials still pending");
    }
    connected
}

struct Lp2pHost {
    peer_id: PeerId,
    listen_addrs: Arc<DashSet<String>>,
}

impl NetworkHandle for Lp2pHost {
    fn local_peer_id(&self) -> String {
        self.peer_id.to_base58()
    }

    fn listen_addrs(&self) -> Vec<String> {
        self.listen_addrs.iter().map(|a| a.key().clone()).collect()
    }
}

struct Lp2pDht {
    commands: mpsc::Sender<Command>,
}

#[async_trait]
impl DiscoveryHandle for Lp2pDht {
    async fn find_closest_peers(
        &self,
        cancel: CancellationToken,
        key: &ScrapeKey,
    ) -> Result<PeerIdStream, NetworkError> {
        let (peers, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::FindClosest {
                key: key.as_bytes().to_vec(),
                peers,
            })
            .await
            .map_err(|_| NetworkError::SessionClosed)?;

        let stream = futures::stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
            let peer = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                peer = rx.recv() => peer,
            }?;
            Some((peer.to_base58(), (rx, cancel)))
        });
        Ok(stream.boxed())
    }
}
