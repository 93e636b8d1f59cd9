//! Unified error handling for the Gossamer engine.
//!
//! Errors fall into four classes: configuration failures (fatal at
//! construction), wire/transport failures (surfaced per-link and
//! resolved by splitting that link's server), send-queue failures
//! (reported asynchronously, then treated like transport failures), and
//! local semantic rejections (returned to the caller, never propagated
//! on the wire).

use thiserror::Error;

use crate::state::{ChannelId, ClientId};

/// Errors raised while validating a [`NodeConfig`](crate::NodeConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no server name specified in configuration")]
    MissingServerName,

    #[error("no server description specified in configuration")]
    MissingServerDesc,

    #[error("no network name specified in configuration")]
    MissingNetName,

    #[error("no default subnet name specified in configuration")]
    MissingDefaultSubnet,

    #[error("send queue capacity must be non-zero")]
    ZeroSendQueueCapacity,
}

/// Errors raised by the wire codec or the underlying byte stream.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message of type {tag}: {source}")]
    Decode {
        tag: u32,
        #[source]
        source: bincode::Error,
    },

    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("frame of {actual} bytes exceeds limit of {limit}")]
    FrameTooLarge { actual: usize, limit: usize },

    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Errors surfaced asynchronously by a [`SendQueue`](crate::SendQueue).
///
/// All are fatal: the queue shuts down and becomes a no-op after the
/// first one is raised.
#[derive(Debug, Error)]
pub enum SendQueueError {
    #[error("send queue overflow")]
    Overflow,

    #[error("send queue sink error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal condition on a link, delivered to the node as part of a
/// [`LinkEvent`](crate::network::LinkEvent). The node responds by
/// splitting the link's server.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    SendQueue(#[from] SendQueueError),
}

/// Errors returned to local callers of the node API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// A client nickname or channel name is already taken in the subnet.
    #[error("name in use")]
    NameInUse,

    /// The client is already a member of the channel.
    #[error("already a member")]
    AlreadyAMember,

    /// No client with this identity exists (it may have been killed or
    /// split away since the identity was obtained).
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    /// No channel with this identity exists.
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// No subnet with this name exists.
    #[error("unknown subnet: {0}")]
    UnknownSubnet(String),

    /// The node's event loop has shut down.
    #[error("node closed")]
    NodeClosed,
}
