//! Server records and the spanning tree.
//!
//! Every node keeps one record per server in the network. The `hub`
//! edges form a tree rooted at the local server; `route` names the
//! directly-linked neighbor through which a remote server is reached.

use std::collections::HashSet;

use crate::network::LinkId;
use crate::wire;

/// One server in the network, as seen from the local node.
#[derive(Debug, Clone)]
pub struct Server {
    pub name: String,
    pub desc: String,

    /// Parent in the spanning tree; `None` for the local server.
    pub hub: Option<String>,

    /// Name of the directly-linked server to forward through to reach
    /// this one. Equal to `name` when this server is directly linked;
    /// `None` for the local server.
    pub route: Option<String>,

    /// The transport, present iff this server is directly linked.
    pub link: Option<LinkId>,

    /// Names of this server's children in the spanning tree.
    pub links: HashSet<String>,
}

impl Server {
    /// The local server, or a directly-linked peer when `link` and
    /// `hub` are given.
    pub fn new_local(
        name: impl Into<String>,
        desc: impl Into<String>,
        link: Option<LinkId>,
        hub: Option<String>,
    ) -> Self {
        let name = name.into();
        Self {
            route: link.is_some().then(|| name.clone()),
            name,
            desc: desc.into(),
            hub,
            link,
            links: HashSet::new(),
        }
    }

    /// A server reached through `hub`; inherits the hub's route. The
    /// hub is never the local server: remote servers are always
    /// introduced from behind a directly-linked peer.
    pub fn new_remote(name: impl Into<String>, desc: impl Into<String>, hub: &Server) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            hub: Some(hub.name.clone()),
            route: hub.route.clone(),
            link: None,
            links: HashSet::new(),
        }
    }

    pub fn is_me(&self) -> bool {
        self.hub.is_none() && self.link.is_none()
    }

    pub(crate) fn announce(&self) -> wire::ServerAnnounce {
        wire::ServerAnnounce {
            name: self.name.clone(),
            desc: self.desc.clone(),
            via: self.hub.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_peer_routes_through_itself() {
        let peer = Server::new_local("hub.b", "peer", Some(7), Some("hub.a".into()));
        assert_eq!(peer.route.as_deref(), Some("hub.b"));
        assert_eq!(peer.link, Some(7));
    }

    #[test]
    fn remote_inherits_route_from_hub() {
        let peer = Server::new_local("hub.b", "peer", Some(7), Some("hub.a".into()));
        let remote = Server::new_remote("hub.c", "remote", &peer);
        assert_eq!(remote.route.as_deref(), Some("hub.b"));
        assert_eq!(remote.hub.as_deref(), Some("hub.b"));
        assert!(remote.link.is_none());

        let deeper = Server::new_remote("hub.d", "remote", &remote);
        assert_eq!(deeper.route.as_deref(), Some("hub.b"));
    }

    #[test]
    fn local_server_has_no_route() {
        let me = Server::new_local("hub.a", "me", None, None);
        assert!(me.is_me());
        assert!(me.route.is_none());
    }
}
