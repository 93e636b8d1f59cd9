//! Application event interface.
//!
//! The embedding layer (an IRC front-end, a bridge, a test harness)
//! observes replicated-state changes through this trait. Callbacks run
//! on the node's event-loop task, so implementations must be quick and
//! must not call back into the [`NodeHandle`](crate::NodeHandle)
//! synchronously.

use crate::state::{Channel, ChannelModeDelta, Client, MemberModeDelta, Membership, Server};

/// Receives notifications from the node event loop.
///
/// Every method has a no-op default, so implementors only override what
/// they need. The node accepts `None` in place of a handler, in which
/// case all events are silently ignored.
///
/// An event is never delivered with missing participants: if a
/// referenced entity cannot be resolved the event is dropped entirely.
pub trait EventHandler: Send {
    /// A server joined the network, directly or through `hub`.
    fn on_server_link(&self, server: &Server, hub: &Server) {
        let _ = (server, hub);
    }

    /// A client became a member of a channel.
    fn on_channel_join(&self, channel: &Channel, client: &Client, membership: &Membership) {
        let _ = (channel, client, membership);
    }

    /// A client left a channel.
    fn on_channel_part(&self, channel: &Channel, client: &Client, reason: &str) {
        let _ = (channel, client, reason);
    }

    /// A message was delivered to a channel.
    fn on_channel_message(&self, from: &Client, to: &Channel, message: &str) {
        let _ = (from, to, message);
    }

    /// Channel or member modes changed. `by` is `None` when the change
    /// was produced by merge arbitration rather than a client action.
    /// Only deltas that actually changed state are reported.
    fn on_channel_mode_change(
        &self,
        channel: &Channel,
        by: Option<&Client>,
        delta: &ChannelModeDelta,
        member_deltas: &[MemberModeDelta],
    ) {
        let _ = (channel, by, delta, member_deltas);
    }

    /// A private message was delivered to a locally-homed client.
    fn on_private_message(&self, from: &Client, to: &Client, message: &str) {
        let _ = (from, to, message);
    }
}
