//! Gossamer — a distributed chat-network substrate.
//!
//! Peer server nodes form a tree-shaped overlay; each node holds a
//! replicated model of the network's clients, channels and memberships.
//! Nodes exchange typed messages over bidirectional links, and any
//! inconsistency produced by merging two independent histories (the
//! classic netsplit / netjoin problem) is resolved deterministically by
//! timestamp arbitration so every node converges to the same state.
//!
//! This crate is the replicated-state engine only: the per-node event
//! loop, link I/O with its bounded send queue, the burst and sync
//! barrier protocols, timestamp conflict resolution for nicknames and
//! channel state, tree routing for unicast messages, and the channel
//! mode-delta algebra. User-facing protocol front-ends, configuration
//! loading and listener accept loops are left to the embedding
//! application, which plugs in through [`EventHandler`] and drives the
//! engine through a [`NodeHandle`].
//!
//! # Architecture
//!
//! - **Single-writer state**: exactly one task runs the node event loop
//!   and owns all mutable state. External callers submit work through
//!   the handle's request channel and await a reply.
//! - **Links**: each peer connection spawns a read loop and a control
//!   loop; outbound bytes flow through a fixed-capacity [`SendQueue`]
//!   so a stalled peer never blocks the engine.
//! - **Convergence**: nickname and channel collisions are arbitrated by
//!   creation timestamp; splits remove whole subtrees; the sync barrier
//!   confirms all nodes have drained prior traffic.

pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod node;
pub mod state;
pub mod wire;

pub use config::NodeConfig;
pub use error::{ConfigError, LinkError, NodeError, SendQueueError, WireError};
pub use event::EventHandler;
pub use network::{LinkId, SendQueue};
pub use node::{ChannelSpec, ClientSpec, Node, NodeHandle, NodeState};
pub use state::{
    Channel, ChannelId, ChannelModeDelta, Client, ClientId, MemberModeDelta, Membership,
    ModeDelta, Server, Subnet,
};
