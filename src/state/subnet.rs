//! Subnets: namespaces grouping clients and channels.

use std::collections::HashMap;

use tracing::trace;

use crate::state::channel::{Channel, Membership};
use crate::state::client::Client;

/// A namespace of clients and channels, both keyed by lowercase name.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub name: String,
    pub clients: HashMap<String, Client>,
    pub channels: HashMap<String, Channel>,
}

impl Subnet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clients: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    /// Install a membership, updating the channel's member map, the
    /// local-member subset and the client's reverse index together.
    pub(crate) fn add_member(
        &mut self,
        lname: &str,
        lnick: &str,
        membership: Membership,
        local: bool,
    ) {
        if let Some(channel) = self.channels.get_mut(lname) {
            channel.members.insert(lnick.to_string(), membership);
            if local {
                channel.local_members.insert(lnick.to_string());
            }
        }
        if let Some(client) = self.clients.get_mut(lnick) {
            client.channels.insert(lname.to_string());
        }
    }

    /// Destroy one membership. Removes the channel when its last member
    /// leaves. Returns whether a membership actually existed.
    pub(crate) fn remove_member(&mut self, lname: &str, lnick: &str) -> bool {
        let (existed, now_empty) = match self.channels.get_mut(lname) {
            Some(channel) => {
                let existed = channel.members.remove(lnick).is_some();
                channel.local_members.remove(lnick);
                (existed, channel.members.is_empty())
            }
            None => return false,
        };
        if now_empty {
            trace!(subnet = %self.name, channel = %lname, "removing empty channel");
            self.channels.remove(lname);
        }
        if let Some(client) = self.clients.get_mut(lnick) {
            client.channels.remove(lname);
        }
        existed
    }

    /// Destroy a client and every membership it holds. This is the only
    /// way a client leaves the subnet, so the member maps and the
    /// reverse index can never disagree.
    pub(crate) fn remove_client(&mut self, lnick: &str) -> Option<Client> {
        let client = self.clients.remove(lnick)?;
        for lname in &client.channels {
            let now_empty = match self.channels.get_mut(lname) {
                Some(channel) => {
                    channel.members.remove(lnick);
                    channel.local_members.remove(lnick);
                    channel.members.is_empty()
                }
                None => false,
            };
            if now_empty {
                trace!(subnet = %self.name, channel = %lname, "removing empty channel");
                self.channels.remove(lname);
            }
        }
        Some(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn client(nick: &str, server: &str) -> Client {
        Client {
            subnet: "test".into(),
            server: server.into(),
            nick: nick.into(),
            lnick: nick.to_lowercase(),
            ident: nick.into(),
            vident: String::new(),
            host: format!("host.{nick}"),
            vhost: String::new(),
            ip: String::new(),
            vip: String::new(),
            gecos: nick.into(),
            ts: Utc::now(),
            channels: HashSet::new(),
        }
    }

    #[test]
    fn remove_client_destroys_memberships_and_empty_channels() {
        let mut subnet = Subnet::new("test");
        subnet.clients.insert("alpha".into(), client("alpha", "hub.a"));
        subnet.clients.insert("beta".into(), client("beta", "hub.b"));
        subnet.channels.insert("room".into(), Channel::new("test", "room"));

        subnet.add_member("room", "alpha", Membership::new(Utc::now()), true);
        subnet.add_member("room", "beta", Membership::new(Utc::now()), false);

        subnet.remove_client("beta");
        let room = subnet.channels.get("room").expect("channel still populated");
        assert!(!room.members.contains_key("beta"));
        assert!(room.members.contains_key("alpha"));

        subnet.remove_client("alpha");
        assert!(subnet.channels.is_empty());
        assert!(subnet.clients.is_empty());
    }

    #[test]
    fn remove_member_drops_empty_channel_and_reverse_index() {
        let mut subnet = Subnet::new("test");
        subnet.clients.insert("alpha".into(), client("alpha", "hub.a"));
        subnet.channels.insert("room".into(), Channel::new("test", "room"));
        subnet.add_member("room", "alpha", Membership::new(Utc::now()), true);

        assert!(subnet.remove_member("room", "alpha"));
        assert!(subnet.channels.is_empty());
        assert!(subnet.clients["alpha"].channels.is_empty());

        assert!(!subnet.remove_member("room", "alpha"));
    }
}
