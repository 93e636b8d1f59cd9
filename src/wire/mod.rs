//! Server-to-server wire protocol.
//!
//! The protocol is a stream of `(header, payload)` frames. The header
//! is two big-endian `u32`s — a stable type tag and the payload length
//! — and the payload is the bincode encoding of the tagged record.
//! Tags are append-only and must never be renumbered.

pub mod codec;
pub mod message;

pub use codec::WireCodec;
pub use message::{
    BurstComplete, ChannelAnnounce, ChannelMessage, ChannelModeChange, ClientAnnounce, Hello,
    Kill, KillReason, MembershipAnnounce, MembershipEnd, PrivateMessage, ServerAnnounce, Split,
    Sync, WireMessage, PROTOCOL_VERSION,
};
