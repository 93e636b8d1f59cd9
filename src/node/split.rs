//! Structural removal of server subtrees.
//!
//! A split is either detected (an I/O error on one of our own links)
//! or announced (a SPLIT message from elsewhere in the tree). Both run
//! the same processing: the entire subtree behind the lost server is
//! removed, along with every client homed there and every membership
//! those clients held.

use tracing::{info, warn};

use crate::network::LinkId;
use crate::node::Node;
use crate::wire::{self, WireMessage};

impl Node {
    /// Detected split: the link has failed or been dropped. Closes and
    /// silences the link, removes the subtree and broadcasts a fresh
    /// SPLIT.
    pub(super) fn split(&mut self, link_id: LinkId, reason: &str) {
        let Some(server) = self.local.get(&link_id).cloned() else {
            panic!("[{}] split of a link that has no server: {}", self.state.me, reason);
        };

        self.local.remove(&link_id);
        if let Some(link) = self.links.get(&link_id) {
            link.close();
            link.set_silenced();
        }

        self.process_split(&server);

        self.send_all(&WireMessage::Split(wire::Split {
            server: server.clone(),
            reason: reason.to_string(),
        }));
        self.bump_version();
        info!(me = %self.state.me, server = %server, reason = %reason, "split");
    }

    /// Announced split, propagating away from the lost subtree. The
    /// message must arrive via the route toward that subtree; anything
    /// else means the tree is corrupt.
    pub(super) fn handle_split(&mut self, m: wire::Split, from: &str) {
        let Some(server) = self.state.network.get(&m.server) else {
            panic!("[{}] split of {} but not connected", self.state.me, m.server);
        };
        if server.route.as_deref() != Some(from) {
            panic!("[{}] split of {} from wrong direction", self.state.me, m.server);
        }

        self.process_split(&m.server);
        self.send_all_skip(&WireMessage::Split(m), Some(from));
        self.bump_version();
    }

    /// Remove a server, its whole subtree, every client homed on any of
    /// them and all of those clients' memberships. Channels that empty
    /// out disappear with their members.
    fn process_split(&mut self, server_name: &str) {
        let Some(server) = self.state.network.remove(server_name) else {
            warn!(me = %self.state.me, server = %server_name, "split of unknown server");
            return;
        };
        if let Some(hub) = server
            .hub
            .as_ref()
            .and_then(|hub| self.state.network.get_mut(hub))
        {
            hub.links.remove(server_name);
        }

        for subnet in self.state.subnets.values_mut() {
            let doomed: Vec<String> = subnet
                .clients
                .values()
                .filter(|client| client.server == server_name)
                .map(|client| client.lnick.clone())
                .collect();
            for lnick in doomed {
                subnet.remove_client(&lnick);
            }
        }

        for child in server.links {
            self.process_split(&child);
        }
    }
}
