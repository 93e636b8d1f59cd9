//! Replicated data model.
//!
//! Every record here is owned by the node event-loop task; cross
//! references are string keys (server names, lowercase nicks and
//! channel names) or [`LinkId`](crate::network::LinkId)s rather than
//! pointers, so destruction of either end of a relationship cannot
//! leave the other dangling.

pub mod channel;
pub mod client;
pub mod mode;
pub mod server;
pub mod subnet;

pub use channel::{Channel, ChannelId, ChannelModes, Membership};
pub use client::{Client, ClientId};
pub use mode::{
    filter_channel_modes, parse_channel_mode_string, serialize_channel_modes, ChannelModeDelta,
    MemberModeDelta, ModeDelta,
};
pub use server::Server;
pub use subnet::Subnet;
