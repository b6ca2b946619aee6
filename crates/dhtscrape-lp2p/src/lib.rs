//! dhtscrape-lp2p — the network collaborator on rust-libp2p.
//!
//! A session is one swarm with a fresh identity, a client-mode Kademlia
//! behaviour and identify. The swarm runs on its own task until the session
//! token is cancelled; everything learned about remote peers lands in a
//! [`MemoryDirectory`].

pub mod behaviour;
pub mod directory;
pub mod event_loop;
pub mod network;

pub use directory::MemoryDirectory;
pub use network::Lp2pNetwork;
