//! Bulk state transfer to a freshly handshaken peer.

use tracing::debug;

use crate::network::LinkId;
use crate::node::Node;
use crate::wire::{self, WireMessage};

impl Node {
    /// Send everything we know down one link: a pre-order walk of the
    /// server tree behind each directly-linked neighbor, then every
    /// client in every subnet, then the burst marker. Servers go first
    /// so the peer can resolve the clients that reference them.
    ///
    /// Channels are not burst; they propagate lazily through channel
    /// announcements on their next mutation.
    pub(super) fn burst_to(&self, link_id: LinkId) {
        for server in self.local.values() {
            self.burst_server_subtree(link_id, server);
        }
        for subnet in self.state.subnets.values() {
            for client in subnet.clients.values() {
                self.send_to_link(link_id, &WireMessage::Client(client.announce()));
            }
        }
        self.send_to_link(
            link_id,
            &WireMessage::BurstComplete(wire::BurstComplete {
                server: self.state.me.clone(),
            }),
        );
        debug!(me = %self.state.me, "burst sent");
    }

    fn burst_server_subtree(&self, link_id: LinkId, name: &str) {
        let Some(server) = self.state.network.get(name) else {
            panic!("[{}] burst of unknown server {}", self.state.me, name);
        };
        self.send_to_link(link_id, &WireMessage::Server(server.announce()));
        for child in &server.links {
            self.burst_server_subtree(link_id, child);
        }
    }
}
