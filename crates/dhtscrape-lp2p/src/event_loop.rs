//! Swarm Event Loop
//!
//! One task owns the swarm for the lifetime of a session. Handles talk to it
//! over a command channel; swarm events feed the peer directory and answer
//! pending dials and closest-peer queries.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use futures::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, kad, Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::behaviour::{ScrapeBehaviour, ScrapeBehaviourEvent};
use crate::directory::MemoryDirectory;

pub enum Command {
    /// Dial `peer` at `addr`; `done` resolves once the dial settles.
    Dial {
        peer: PeerId,
        addr: Multiaddr,
        done: oneshot::Sender<Result<(), String>>,
    },
    /// Kick off a routing table refresh.
    Bootstrap,
    /// Stream the peers of a closest-peers query into `peers`.
    FindClosest {
        key: Vec<u8>,
        peers: mpsc::UnboundedSender<PeerId>,
    },
}

pub struct EventLoop {
    swarm: Swarm<ScrapeBehaviour>,
    commands: mpsc::Receiver<Command>,
    directory: Arc<MemoryDirectory>,
    listen_addrs: Arc<DashSet<String>>,
    cancel: CancellationToken,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), String>>>>,
    queries: HashMap<kad::QueryId, mpsc::UnboundedSender<PeerId>>,
}

impl EventLoop {
    pub fn new(
        swarm: Swarm<ScrapeBehaviour>,
        commands: mpsc::Receiver<Command>,
        directory: Arc<MemoryDirectory>,
        listen_addrs: Arc<DashSet<String>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            swarm,
            commands,
            directory,
            listen_addrs,
            cancel,
            pending_dials: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    /// Run until the session is cancelled or every handle is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
        tracing::debug!(
            peer_id = %self.swarm.local_peer_id(),
            known_peers = self.directory.len(),
            "swarm event loop stopped"
        );
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Dial { peer, addr, done } => {
                self.swarm.behaviour_mut().kademlia.add_address(&peer, addr.clone());
                let opts = DialOpts::peer_id(peer).addresses(vec![addr]).build();
                match self.swarm.dial(opts) {
                    Ok(()) => self.pending_dials.entry(peer).or_default().push(done),
                    Err(e) => {
                        let _ = done.send(Err(e.to_string()));
                    }
                }
            }
            Command::Bootstrap => {
                if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                    tracing::warn!(error = %e, "routing table bootstrap skipped");
                }
            }
            Command::FindClosest { key, peers } => {
                let id = self.swarm.behaviour_mut().kademlia.get_closest_peers(key);
                self.queries.insert(id, peers);
            }
        }
    }

    fn settle_dial(&mut self, peer: &PeerId, outcome: Result<(), String>) {
        if let Some(waiters) = self.pending_dials.remove(peer) {
            for done in waiters {
                let _ = done.send(outcome.clone());
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<ScrapeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(address = %address, "listening");
                self.listen_addrs.insert(address.to_string());
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listen_addrs.remove(&address.to_string());
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                tracing::trace!(peer = %peer_id, remote_addr = %endpoint.get_remote_address(), "peer connected");
                self.directory
                    .add_addresses(&peer_id.to_base58(), [endpoint.get_remote_address().to_string()]);
                self.settle_dial(&peer_id, Ok(()));
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                tracing::trace!(peer = %peer_id, error = %error, "outgoing connection failed");
                self.settle_dial(&peer_id, Err(error.to_string()));
            }
            SwarmEvent::Behaviour(ScrapeBehaviourEvent::Kademlia(event)) => self.handle_kad(event),
            SwarmEvent::Behaviour(ScrapeBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                tracing::trace!(peer = %peer_id, agent = %info.agent_version, "identify received");
                for addr in &info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                }
                self.directory.record_identify(
                    &peer_id.to_base58(),
                    info.listen_addrs.iter().map(|a| a.to_string()).collect(),
                    info.protocols.iter().map(|p| p.to_string()).collect(),
                    info.agent_version,
                );
            }
            _ => {}
        }
    }

    fn handle_kad(&mut self, event: kad::Event) {
        match event {
            kad::Event::RoutingUpdated {
                peer, addresses, ..
            } => {
                self.directory
                    .add_addresses(&peer.to_base58(), addresses.iter().map(|a| a.to_string()));
            }
            kad::Event::OutboundQueryProgressed {
                id,
                result: kad::QueryResult::GetClosestPeers(result),
                step,
                ..
            } => {
                let Some(peers) = self.queries.get(&id) else {
                    return;
                };
                let mut consumer_gone = peers.is_closed();
                match result {
                    Ok(ok) => {
                        for info in ok.peers {
                            if peers.send(info.peer_id).is_err() {
                                consumer_gone = true;
                                break;
                            }
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "closest-peers query ended early"),
                }

                if consumer_gone && !step.last {
                    if let Some(mut query) = self.swarm.behaviour_mut().kademlia.query_mut(&id) {
                        query.finish();
                    }
                }
                if consumer_gone || step.last {
                    // Dropping the sender ends the consumer's stream.
                    self.queries.remove(&id);
                }
            }
            _ => {}
        }
    }
}
