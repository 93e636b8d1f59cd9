//! Handlers for inbound wire messages.
//!
//! `from` is always the directly-linked server whose link the message
//! arrived on; re-broadcasts skip it so tree flooding delivers exactly
//! once. An unknown server or subnet in routed traffic means the
//! network is corrupt, and the node aborts rather than continue.

use tracing::{debug, info, warn};

use crate::network::link::LinkEvent;
use crate::network::LinkId;
use crate::node::Node;
use crate::state::{Channel, ChannelModeDelta, Client, MemberModeDelta, Membership, ModeDelta, Server};
use crate::wire::{self, WireMessage, PROTOCOL_VERSION};

impl Node {
    /// A freshly adopted link must produce HELLO as its first message;
    /// anything else is ignored and the link keeps waiting.
    pub(super) fn handle_new_link_event(&mut self, event: LinkEvent) {
        if let Some(err) = event.err {
            warn!(me = %self.state.me, error = %err, "pre-handshake link failed");
            self.new_links.remove(&event.link);
            if let Some(link) = self.links.get(&event.link) {
                link.close();
                link.set_silenced();
            }
            return;
        }
        match event.msg {
            Some(WireMessage::Hello(hello)) => self.handle_hello(event.link, hello),
            Some(other) => {
                debug!(me = %self.state.me, msg = %other.kind(), "ignoring pre-handshake message");
            }
            None => {}
        }
    }

    /// Close and silence a link that failed the handshake; late events
    /// from it are dropped at the top of the event loop.
    fn refuse_link(&self, link_id: LinkId) {
        if let Some(link) = self.links.get(&link_id) {
            link.close();
            link.set_silenced();
        }
    }

    fn handle_hello(&mut self, link_id: LinkId, hello: wire::Hello) {
        self.new_links.remove(&link_id);
        let me = self.state.me.clone();

        if hello.protocol != PROTOCOL_VERSION {
            warn!(
                me = %me,
                peer = %hello.name,
                protocol = hello.protocol,
                "protocol version mismatch, refusing link"
            );
            self.refuse_link(link_id);
            return;
        }
        if hello.default_subnet != self.state.default_subnet {
            warn!(
                me = %me,
                peer = %hello.name,
                subnet = %hello.default_subnet,
                "default subnet mismatch, refusing link"
            );
            self.refuse_link(link_id);
            return;
        }
        if self.state.network.contains_key(&hello.name) {
            info!(me = %me, peer = %hello.name, "already have server, refusing link");
            self.refuse_link(link_id);
            return;
        }

        if let Some(link) = self.links.get(&link_id) {
            link.set_name(format!("{} <-> {}", me, hello.name));
        }

        let server = Server::new_local(&hello.name, &hello.description, Some(link_id), Some(me.clone()));
        info!(me = %me, server = %hello.name, "got new local server");

        // Everything we know goes to the new peer: the server tree
        // behind each existing neighbor, then every client, then the
        // burst marker. The peer must learn servers before the clients
        // that reference them.
        self.burst_to(link_id);

        // Announce the newcomer to everyone else. It is not yet
        // registered, so the broadcast cannot loop back to it.
        let announce = server.announce();
        self.send_all(&WireMessage::Server(announce));
        debug!(me = %me, server = %hello.name, "bursted");

        self.local.insert(link_id, hello.name.clone());
        self.state.network.insert(hello.name.clone(), server);
        if let Some(me_server) = self.state.network.get_mut(&me) {
            me_server.links.insert(hello.name.clone());
        }

        let server = &self.state.network[&hello.name];
        let me_server = self.state.me();
        self.fire(|h| h.on_server_link(server, me_server));
    }

    pub(super) fn handle_link_message(&mut self, msg: WireMessage, from: &str) {
        debug!(me = %self.state.me, from = %from, msg = %msg.kind(), "recv");
        match msg {
            WireMessage::Hello(_) => {
                debug!(me = %self.state.me, from = %from, "unexpected hello from linked peer");
            }
            WireMessage::BurstComplete(m) => {
                info!(me = %self.state.me, server = %m.server, "burst complete");
                self.send_all_skip(&WireMessage::BurstComplete(m), Some(from));
                self.bump_version();
            }
            WireMessage::Client(m) => self.handle_client(m, from),
            WireMessage::Server(m) => self.handle_server(m, from),
            WireMessage::Sync(m) => self.handle_sync(m, from),
            WireMessage::Kill(m) => self.handle_kill(m, from),
            WireMessage::Split(m) => self.handle_split(m, from),
            WireMessage::Channel(m) => self.handle_channel(m, from),
            WireMessage::ChannelMode(m) => self.handle_channel_mode(m, from),
            WireMessage::Membership(m) => self.handle_membership(m, from),
            WireMessage::MembershipEnd(m) => self.handle_membership_end(m, from),
            WireMessage::PrivateMessage(m) => self.handle_private_message(m, from),
            WireMessage::ChannelMessage(m) => self.handle_channel_message(m, from),
        }
    }

    /// Install an announced client, arbitrating nickname collisions by
    /// timestamp: a client not older than the other is killed, so exact
    /// ties kill both.
    fn handle_client(&mut self, m: wire::ClientAnnounce, from: &str) {
        if !self.state.network.contains_key(&m.server) {
            panic!("[{}] client {} from unknown server {}", self.state.me, m.nick, m.server);
        }
        let me = self.state.me.clone();
        let lnick = m.nick.to_lowercase();

        let Some(subnet) = self.state.subnets.get_mut(&m.subnet) else {
            panic!("[{}] client {} in unknown subnet {}", self.state.me, m.nick, m.subnet);
        };

        let mut kill_broadcast = None;
        let mut kill_routed = None;
        let mut add_incoming = true;

        if let Some(existing) = subnet.clients.get(&lnick) {
            // Collision. Either one side is younger and must die, or
            // they are exactly the same age and both die.
            if existing.ts >= m.ts {
                let kill = wire::Kill {
                    id: existing.id(),
                    server: me.clone(),
                    authority: false,
                    by: None,
                    reason: "Nickname collision (older)".to_string(),
                    reason_code: wire::KillReason::Collision,
                };
                if existing.server == me {
                    let mut kill = kill;
                    kill.authority = true;
                    kill_broadcast = Some(kill);
                } else {
                    kill_routed = Some((existing.server.clone(), kill));
                }
            }
            if m.ts >= existing.ts {
                add_incoming = false;
            }
        }

        if add_incoming {
            // The incoming client takes the nick; whichever record held
            // it goes away with its memberships. A surviving remote
            // loser is removed when its owner's authoritative kill
            // flows back.
            subnet.remove_client(&lnick);
            let client = Client::from_announce(&m);
            debug!(me = %me, client = %client.id(), "added client");
            subnet.clients.insert(lnick, client);
        } else if let Some(kill) = &kill_broadcast {
            subnet.remove_client(&kill.id.nick);
        }

        if let Some(kill) = kill_broadcast {
            self.send_all_skip(&WireMessage::Kill(kill), Some(from));
        }
        if let Some((owner, kill)) = kill_routed {
            self.send_to_server(&owner, &WireMessage::Kill(kill));
        }
        if add_incoming {
            self.send_all_skip(&WireMessage::Client(m), Some(from));
        } else {
            debug!(me = %me, nick = %m.nick, "not adding client, lost collision");
        }
    }

    fn handle_server(&mut self, m: wire::ServerAnnounce, from: &str) {
        if self.state.network.contains_key(&m.name) {
            panic!("[{}] already linked: {}", self.state.me, m.name);
        }
        let Some(via) = self.state.network.get(&m.via) else {
            panic!("[{}] {} via {} but that does not exist", self.state.me, m.name, m.via);
        };

        let server = Server::new_remote(&m.name, &m.desc, via);
        info!(me = %self.state.me, server = %m.name, via = %m.via, "attaching server");
        self.state.network.insert(m.name.clone(), server);
        if let Some(hub) = self.state.network.get_mut(&m.via) {
            hub.links.insert(m.name.clone());
        }

        self.send_all_skip(&WireMessage::Server(m.clone()), Some(from));

        let server = &self.state.network[&m.name];
        let hub = &self.state.network[&m.via];
        self.fire(|h| h.on_server_link(server, hub));
    }

    /// Authoritative kills are orders from the owning server: apply and
    /// flood. Non-authoritative kills are instructions: apply locally
    /// when the target is ours (flipping authority), otherwise forward
    /// along the target's route.
    fn handle_kill(&mut self, mut m: wire::Kill, from: &str) {
        let resolved = self
            .state
            .lookup_client(&m.id)
            .map(|c| (c.subnet.clone(), c.lnick.clone(), c.server.clone()));

        if m.authority {
            if let Some((subnet, lnick, _)) = resolved {
                info!(me = %self.state.me, client = %m.id, reason = %m.reason, "killing client");
                self.process_quit(&subnet, &lnick);
            }
            self.send_all_skip(&WireMessage::Kill(m), Some(from));
        } else {
            let Some((subnet, lnick, owner)) = resolved else {
                return;
            };
            if owner == self.state.me {
                info!(me = %self.state.me, client = %m.id, reason = %m.reason, "killing own client");
                self.process_quit(&subnet, &lnick);
                m.authority = true;
                self.send_all(&WireMessage::Kill(m));
            } else {
                let route = self.state.network.get(&owner).and_then(|s| s.route.clone());
                if route.as_deref() != Some(from) {
                    self.send_to_server(&owner, &WireMessage::Kill(m));
                }
                // Arriving from the route direction would loop; drop.
            }
        }
    }

    /// Merge an announced channel, trusting each side's privileges
    /// according to the relative channel timestamps. Newly introduced
    /// members fire join events regardless of trust; their privileges
    /// only survive when the remote side is trusted.
    fn handle_channel(&mut self, m: wire::ChannelAnnounce, from: &str) {
        if !self.state.subnets.contains_key(&m.subnet) {
            panic!("[{}] channel {} in unknown subnet {}", self.state.me, m.name, m.subnet);
        }
        let lname = m.name.to_lowercase();

        // Resolve announced members up front; unknown ones are skipped.
        let resolved: Vec<wire::MembershipAnnounce> = m
            .members
            .iter()
            .filter(|mem| self.state.lookup_client(&mem.client).is_some())
            .cloned()
            .collect();

        // Identical timestamps mean the same channel re-merging after a
        // split: both sides are acceptable. A newer timestamp on either
        // side means that side was re-created and is not trusted.
        let (trust_remote, trust_local) = {
            let subnet = &self.state.subnets[&m.subnet];
            match subnet.channels.get(&lname) {
                Some(existing) => (!(existing.ts < m.ts), !(m.ts < existing.ts)),
                None => (true, true),
            }
        };

        let mut deltas: Vec<MemberModeDelta> = Vec::new();
        let mut joined: Vec<String> = Vec::new();

        {
            let subnet = self
                .state
                .subnets
                .get_mut(&m.subnet)
                .expect("subnet checked above");
            if !subnet.channels.contains_key(&lname) {
                let mut channel = Channel::new(&m.subnet, &m.name);
                channel.ts = m.ts;
                subnet.channels.insert(lname.clone(), channel);
            }
            let clients = &subnet.clients;
            let channel = subnet
                .channels
                .get_mut(&lname)
                .expect("channel just ensured");

            if !trust_local {
                // Local modes cannot be trusted: strip every existing
                // member's privileges, tracked as removal deltas.
                for (lnick, membership) in channel.members.iter_mut() {
                    if !membership.has_any_privilege() {
                        continue;
                    }
                    let Some(client) = clients.get(lnick) else {
                        continue;
                    };
                    let mut delta = MemberModeDelta::new(client.id());
                    strip_flag(&mut membership.is_owner, &mut delta.is_owner);
                    strip_flag(&mut membership.is_admin, &mut delta.is_admin);
                    strip_flag(&mut membership.is_op, &mut delta.is_op);
                    strip_flag(&mut membership.is_halfop, &mut delta.is_halfop);
                    strip_flag(&mut membership.is_voice, &mut delta.is_voice);
                    deltas.push(delta);
                }
            }

            for mem in &resolved {
                let lnick = &mem.client.nick;
                if let Some(existing) = channel.members.get_mut(lnick) {
                    if trust_remote && mem.has_any_privilege() {
                        // Both sides trusted: privileges union.
                        let mut delta = MemberModeDelta::new(mem.client.clone());
                        union_flag(mem.is_owner, &mut existing.is_owner, &mut delta.is_owner);
                        union_flag(mem.is_admin, &mut existing.is_admin, &mut delta.is_admin);
                        union_flag(mem.is_op, &mut existing.is_op, &mut delta.is_op);
                        union_flag(mem.is_halfop, &mut existing.is_halfop, &mut delta.is_halfop);
                        union_flag(mem.is_voice, &mut existing.is_voice, &mut delta.is_voice);
                        if !delta.is_empty() {
                            deltas.push(delta);
                        }
                    }
                } else {
                    let mut membership = Membership::new(mem.ts);
                    if trust_remote && mem.has_any_privilege() {
                        let mut delta = MemberModeDelta::new(mem.client.clone());
                        grant_flag(mem.is_owner, &mut membership.is_owner, &mut delta.is_owner);
                        grant_flag(mem.is_admin, &mut membership.is_admin, &mut delta.is_admin);
                        grant_flag(mem.is_op, &mut membership.is_op, &mut delta.is_op);
                        grant_flag(mem.is_halfop, &mut membership.is_halfop, &mut delta.is_halfop);
                        grant_flag(mem.is_voice, &mut membership.is_voice, &mut delta.is_voice);
                        deltas.push(delta);
                    }
                    channel.members.insert(lnick.clone(), membership);
                    joined.push(lnick.clone());
                }
            }

            for lnick in &joined {
                if let Some(client) = subnet.clients.get_mut(lnick) {
                    client.channels.insert(lname.clone());
                }
            }
        }

        self.send_all_skip(&WireMessage::Channel(m.clone()), Some(from));

        let subnet = &self.state.subnets[&m.subnet];
        if let Some(channel) = subnet.channels.get(&lname) {
            for lnick in &joined {
                if let (Some(client), Some(membership)) =
                    (subnet.clients.get(lnick), channel.members.get(lnick))
                {
                    self.fire(|h| h.on_channel_join(channel, client, membership));
                }
            }
            if !deltas.is_empty() {
                let empty = ChannelModeDelta::default();
                self.fire(|h| h.on_channel_mode_change(channel, None, &empty, &deltas));
            }
        }
    }

    /// A single (re)join. Ignored when the client or channel is unknown
    /// or the client is already a member.
    fn handle_membership(&mut self, m: wire::MembershipAnnounce, from: &str) {
        let Some(client) = self.state.lookup_client(&m.client) else {
            return;
        };
        let Some(channel) = self.state.lookup_channel(&m.channel) else {
            return;
        };
        let (subnet_name, lname, lnick) =
            (channel.subnet.clone(), channel.lname.clone(), client.lnick.clone());
        if channel.members.contains_key(&lnick) {
            return;
        }

        let mut membership = Membership::new(m.ts);
        let mut delta = MemberModeDelta::new(m.client.clone());
        grant_flag(m.is_owner, &mut membership.is_owner, &mut delta.is_owner);
        grant_flag(m.is_admin, &mut membership.is_admin, &mut delta.is_admin);
        grant_flag(m.is_op, &mut membership.is_op, &mut delta.is_op);
        grant_flag(m.is_halfop, &mut membership.is_halfop, &mut delta.is_halfop);
        grant_flag(m.is_voice, &mut membership.is_voice, &mut delta.is_voice);

        if let Some(subnet) = self.state.subnets.get_mut(&subnet_name) {
            subnet.add_member(&lname, &lnick, membership, false);
        }

        let subnet = &self.state.subnets[&subnet_name];
        if let (Some(channel), Some(client)) =
            (subnet.channels.get(&lname), subnet.clients.get(&lnick))
        {
            if let Some(membership) = channel.members.get(&lnick) {
                self.fire(|h| h.on_channel_join(channel, client, membership));
                if !delta.is_empty() {
                    let empty = ChannelModeDelta::default();
                    self.fire(|h| {
                        h.on_channel_mode_change(channel, None, &empty, std::slice::from_ref(&delta))
                    });
                }
            }
        }
        self.send_all_skip(&WireMessage::Membership(m), Some(from));
    }

    /// A part. The membership is removed (and the channel, when it
    /// empties); unknown participants mean the event is dropped.
    fn handle_membership_end(&mut self, m: wire::MembershipEnd, from: &str) {
        let Some(client) = self.state.lookup_client(&m.client) else {
            return;
        };
        let Some(channel) = self.state.lookup_channel(&m.channel) else {
            return;
        };
        let (subnet_name, lname, lnick) =
            (channel.subnet.clone(), channel.lname.clone(), client.lnick.clone());
        if !channel.members.contains_key(&lnick) {
            return;
        }

        self.fire(|h| h.on_channel_part(channel, client, &m.reason));

        if let Some(subnet) = self.state.subnets.get_mut(&subnet_name) {
            subnet.remove_member(&lname, &lnick);
        }
        self.send_all_skip(&WireMessage::MembershipEnd(m), Some(from));
    }

    fn handle_private_message(&mut self, m: wire::PrivateMessage, from: &str) {
        let Some(to) = self.state.lookup_client(&m.to) else {
            debug!(me = %self.state.me, to = %m.to, "private message to unknown client");
            return;
        };

        if to.server == self.state.me {
            let Some(from_client) = self.state.lookup_client(&m.from) else {
                debug!(me = %self.state.me, from = %m.from, "private message from unknown client");
                return;
            };
            self.fire(|h| h.on_private_message(from_client, to, &m.message));
        } else {
            let owner = to.server.clone();
            let route = self.state.network.get(&owner).and_then(|s| s.route.clone());
            if route.as_deref() == Some(from) {
                warn!(me = %self.state.me, to = %m.to, "private message routing loop, dropping");
                return;
            }
            self.send_to_server(&owner, &WireMessage::PrivateMessage(m));
        }
    }

    fn handle_channel_message(&mut self, m: wire::ChannelMessage, from: &str) {
        let Some(channel) = self.state.lookup_channel(&m.to) else {
            debug!(me = %self.state.me, to = %m.to, "channel message to unknown channel");
            return;
        };
        let Some(from_client) = self.state.lookup_client(&m.from) else {
            debug!(me = %self.state.me, from = %m.from, "channel message from unknown client");
            return;
        };

        self.fire(|h| h.on_channel_message(from_client, channel, &m.message));
        self.send_all_skip(&WireMessage::ChannelMessage(m), Some(from));
    }

    /// Apply a pre-filtered mode change from the network. The origin
    /// already enforced authority; only change-detection applies here.
    fn handle_channel_mode(&mut self, m: wire::ChannelModeChange, from: &str) {
        let Some(channel) = self.state.lookup_channel(&m.channel) else {
            debug!(me = %self.state.me, channel = %m.channel, "mode change on unknown channel");
            return;
        };
        let (subnet_name, lname) = (channel.subnet.clone(), channel.lname.clone());
        if self.state.lookup_client(&m.from).is_none() {
            debug!(me = %self.state.me, from = %m.from, "mode change from unknown client");
        }

        let member_deltas: Vec<MemberModeDelta> = m
            .member_mode
            .iter()
            .filter(|d| self.state.lookup_client(&d.client).is_some())
            .cloned()
            .collect();

        let (applied, applied_members) = self
            .state
            .subnets
            .get_mut(&subnet_name)
            .and_then(|subnet| subnet.channels.get_mut(&lname))
            .map(|channel| channel.apply_mode_delta(&m.mode, &member_deltas))
            .unwrap_or_default();

        if !applied.is_empty() || !applied_members.is_empty() {
            let channel = &self.state.subnets[&subnet_name].channels[&lname];
            let actor = self.state.lookup_client(&m.from);
            self.fire(|h| h.on_channel_mode_change(channel, actor, &applied, &applied_members));
        }
        self.send_all_skip(&WireMessage::ChannelMode(m), Some(from));
    }
}

fn strip_flag(flag: &mut bool, delta: &mut ModeDelta) {
    if *flag {
        *flag = false;
        *delta = ModeDelta::Removed;
    }
}

fn grant_flag(announced: bool, flag: &mut bool, delta: &mut ModeDelta) {
    if announced {
        *flag = true;
        *delta = ModeDelta::Added;
    }
}

fn union_flag(announced: bool, flag: &mut bool, delta: &mut ModeDelta) {
    if announced && !*flag {
        *flag = true;
        *delta = ModeDelta::Added;
    }
}
