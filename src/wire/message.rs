//! Typed wire messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ChannelId, ChannelModeDelta, ClientId, MemberModeDelta};

/// Version of the link protocol carried in [`Hello`]. Peers with a
/// different protocol version are refused.
pub const PROTOCOL_VERSION: u32 = 1;

/// Stable type tags. Append-only; never renumber.
pub mod tag {
    pub const HELLO: u32 = 1;
    pub const BURST_COMPLETE: u32 = 2;
    pub const SYNC: u32 = 3;
    pub const CLIENT: u32 = 4;
    pub const SERVER: u32 = 5;
    pub const KILL: u32 = 6;
    pub const SPLIT: u32 = 7;
    pub const CHANNEL: u32 = 8;
    pub const CHANNEL_MODE: u32 = 9;
    pub const MEMBERSHIP: u32 = 10;
    pub const MEMBERSHIP_END: u32 = 11;
    pub const PRIVATE_MESSAGE: u32 = 12;
    pub const CHANNEL_MESSAGE: u32 = 13;
}

/// Introduction sent by each side at the beginning of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: u32,
    pub local_time_ms: u64,
    pub name: String,
    pub description: String,
    pub default_subnet: String,
}

/// Marks the end of the bulk state transfer to a fresh peer. `server`
/// is the name of the node whose burst completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstComplete {
    pub server: String,
}

/// Sync barrier request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sync {
    pub sequence: u32,
    pub reply: bool,
    pub origin: String,
    pub reply_from: String,
}

/// Announces one client to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAnnounce {
    pub subnet: String,
    pub server: String,
    pub nick: String,
    pub ident: String,
    pub vident: String,
    pub host: String,
    pub vhost: String,
    pub ip: String,
    pub vip: String,
    pub gecos: String,
    pub ts: DateTime<Utc>,
}

/// Announces one server. `via` is the hub through which it is reached
/// from the sender's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAnnounce {
    pub name: String,
    pub desc: String,
    pub via: String,
}

/// Why a client was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillReason {
    Quit,
    Collision,
    SendQueue,
    RecvQueue,
}

/// Removes a client. Authoritative kills are orders from the owning
/// server and flood outward; non-authoritative kills are instructions
/// routed toward the owning server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kill {
    /// Client being killed.
    pub id: ClientId,
    /// Server doing the killing.
    pub server: String,
    pub authority: bool,
    /// The client that initiated the kill, if any.
    pub by: Option<ClientId>,
    pub reason: String,
    pub reason_code: KillReason,
}

/// Removes an entire server subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub server: String,
    pub reason: String,
}

/// Announces full channel state, including all current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAnnounce {
    pub name: String,
    pub subnet: String,
    pub ts: DateTime<Utc>,
    pub members: Vec<MembershipAnnounce>,
}

/// Announces a single (re)join, or one member inside a
/// [`ChannelAnnounce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipAnnounce {
    pub client: ClientId,
    pub channel: ChannelId,
    pub ts: DateTime<Utc>,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_op: bool,
    pub is_halfop: bool,
    pub is_voice: bool,
}

impl MembershipAnnounce {
    pub fn has_any_privilege(&self) -> bool {
        self.is_owner || self.is_admin || self.is_op || self.is_halfop || self.is_voice
    }
}

/// Announces a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEnd {
    pub channel: ChannelId,
    pub client: ClientId,
    pub reason: String,
}

/// A channel or member mode change, pre-filtered by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelModeChange {
    pub from: ClientId,
    pub channel: ChannelId,
    pub mode: ChannelModeDelta,
    pub member_mode: Vec<MemberModeDelta>,
}

/// Unicast text, routed along the tree toward the target's server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub from: ClientId,
    pub to: ClientId,
    pub message: String,
}

/// Channel text, flooded to every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub from: ClientId,
    pub to: ChannelId,
    pub message: String,
}

/// Every message kind that can cross a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Hello(Hello),
    BurstComplete(BurstComplete),
    Sync(Sync),
    Client(ClientAnnounce),
    Server(ServerAnnounce),
    Kill(Kill),
    Split(Split),
    Channel(ChannelAnnounce),
    ChannelMode(ChannelModeChange),
    Membership(MembershipAnnounce),
    MembershipEnd(MembershipEnd),
    PrivateMessage(PrivateMessage),
    ChannelMessage(ChannelMessage),
}

impl WireMessage {
    /// The stable wire tag for this message.
    pub fn tag(&self) -> u32 {
        match self {
            WireMessage::Hello(_) => tag::HELLO,
            WireMessage::BurstComplete(_) => tag::BURST_COMPLETE,
            WireMessage::Sync(_) => tag::SYNC,
            WireMessage::Client(_) => tag::CLIENT,
            WireMessage::Server(_) => tag::SERVER,
            WireMessage::Kill(_) => tag::KILL,
            WireMessage::Split(_) => tag::SPLIT,
            WireMessage::Channel(_) => tag::CHANNEL,
            WireMessage::ChannelMode(_) => tag::CHANNEL_MODE,
            WireMessage::Membership(_) => tag::MEMBERSHIP,
            WireMessage::MembershipEnd(_) => tag::MEMBERSHIP_END,
            WireMessage::PrivateMessage(_) => tag::PRIVATE_MESSAGE,
            WireMessage::ChannelMessage(_) => tag::CHANNEL_MESSAGE,
        }
    }

    /// Short name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::BurstComplete(_) => "burst_complete",
            WireMessage::Sync(m) => {
                if m.reply {
                    "sync_reply"
                } else {
                    "sync"
                }
            }
            WireMessage::Client(_) => "client",
            WireMessage::Server(_) => "server",
            WireMessage::Kill(_) => "kill",
            WireMessage::Split(_) => "split",
            WireMessage::Channel(_) => "channel",
            WireMessage::ChannelMode(_) => "channel_mode",
            WireMessage::Membership(_) => "membership",
            WireMessage::MembershipEnd(_) => "membership_end",
            WireMessage::PrivateMessage(_) => "private_message",
            WireMessage::ChannelMessage(_) => "channel_message",
        }
    }
}
