//! Transport plumbing: per-peer links and their bounded send queues.

pub mod link;
pub mod sendq;

pub use link::{Link, LinkEvent};
pub use sendq::SendQueue;

/// Identifies one link for the lifetime of a node. Links have no
/// name-based identity of their own; the node maps ids to servers once
/// the handshake completes.
pub type LinkId = u64;
