//! Local-origin operations, executed on the event-loop task on behalf
//! of [`NodeHandle`](crate::NodeHandle) callers.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::network::link::{Link, LinkSource};
use crate::network::sendq::SendSink;
use crate::node::Node;
use crate::state::{
    filter_channel_modes, Channel, ChannelId, ChannelModeDelta, Client, ClientId,
    MemberModeDelta, Membership,
};
use crate::wire::{self, WireMessage, PROTOCOL_VERSION};

use super::handle::{ChannelSpec, ClientSpec};

impl Node {
    /// Adopt a byte-stream pair as a fresh link and greet the peer. The
    /// link stays in the pre-handshake set until its HELLO arrives.
    pub(super) fn begin_link(&mut self, reader: LinkSource, writer: SendSink, name: String) {
        let id = self.next_link_id;
        self.next_link_id += 1;

        let link = Link::spawn(
            id,
            reader,
            writer,
            self.config.send_queue_capacity,
            self.inbound_tx.clone(),
        );
        link.set_name(&name);
        self.links.insert(id, link);
        self.new_links.insert(id);

        info!(me = %self.state.me, link = %name, "beginning link");
        self.send_to_link(
            id,
            &WireMessage::Hello(wire::Hello {
                protocol: PROTOCOL_VERSION,
                local_time_ms: Utc::now().timestamp_millis() as u64,
                name: self.state.me.clone(),
                description: self.config.server_desc.clone(),
                default_subnet: self.state.default_subnet.clone(),
            }),
        );
    }

    pub(super) fn attach_client(&mut self, spec: ClientSpec) -> Result<ClientId, NodeError> {
        let me = self.state.me.clone();
        let Some(subnet) = self.state.subnets.get_mut(&spec.subnet) else {
            return Err(NodeError::UnknownSubnet(spec.subnet));
        };

        let lnick = spec.nick.to_lowercase();
        if subnet.clients.contains_key(&lnick) {
            return Err(NodeError::NameInUse);
        }

        let client = Client {
            subnet: spec.subnet,
            server: me,
            lnick: lnick.clone(),
            nick: spec.nick,
            ident: spec.ident,
            vident: spec.vident,
            host: spec.host,
            vhost: spec.vhost,
            ip: spec.ip,
            vip: spec.vip,
            gecos: spec.gecos,
            ts: spec.ts.unwrap_or_else(Utc::now),
            channels: Default::default(),
        };
        let id = client.id();
        let announce = client.announce();
        info!(me = %self.state.me, client = %id, "attaching client");
        subnet.clients.insert(lnick, client);

        self.send_all(&WireMessage::Client(announce));
        Ok(id)
    }

    pub(super) fn attach_channel(&mut self, spec: ChannelSpec) -> Result<ChannelId, NodeError> {
        let Some(subnet) = self.state.subnets.get_mut(&spec.subnet) else {
            return Err(NodeError::UnknownSubnet(spec.subnet));
        };

        let lname = spec.name.to_lowercase();
        if subnet.channels.contains_key(&lname) {
            return Err(NodeError::NameInUse);
        }

        let mut channel = Channel::new(&spec.subnet, &spec.name);
        if let Some(ts) = spec.ts {
            channel.ts = ts;
        }
        let id = channel.id();
        let announce = channel.announce(|_| None);
        subnet.channels.insert(lname, channel);

        self.send_all(&WireMessage::Channel(announce));
        Ok(id)
    }

    pub(super) fn join_or_create_channel(
        &mut self,
        client_id: &ClientId,
        subnet_name: &str,
        name: &str,
    ) -> Result<ChannelId, NodeError> {
        if self.state.lookup_client(client_id).is_none() {
            return Err(NodeError::UnknownClient(client_id.clone()));
        }
        let Some(subnet) = self.state.subnets.get_mut(subnet_name) else {
            return Err(NodeError::UnknownSubnet(subnet_name.to_string()));
        };

        let lname = name.to_lowercase();
        let lnick = client_id.nick.clone();

        let announce = if let Some(channel) = subnet.channels.get(&lname) {
            if channel.members.contains_key(&lnick) {
                return Err(NodeError::AlreadyAMember);
            }
            let membership = Membership::new(Utc::now());
            let announce = membership.announce(&channel.id(), client_id);
            subnet.add_member(&lname, &lnick, membership, true);
            WireMessage::Membership(announce)
        } else {
            // Fresh channel: +nt, creator owns it.
            let mut channel = Channel::new(subnet_name, name);
            channel.modes.no_external_messages = true;
            channel.modes.topic_protected = true;
            let mut membership = Membership::new(channel.ts);
            membership.is_owner = true;
            subnet.channels.insert(lname.clone(), channel);
            subnet.add_member(&lname, &lnick, membership, true);

            let channel = &subnet.channels[&lname];
            let announce = channel.announce(|ln| subnet.clients.get(ln).map(Client::id));
            WireMessage::Channel(announce)
        };

        self.send_all(&announce);

        let subnet = &self.state.subnets[subnet_name];
        let channel = &subnet.channels[&lname];
        let channel_id = channel.id();
        if let (Some(client), Some(membership)) =
            (subnet.clients.get(&lnick), channel.members.get(&lnick))
        {
            self.fire(|h| h.on_channel_join(channel, client, membership));
        }
        Ok(channel_id)
    }

    pub(super) fn part_channel(
        &mut self,
        channel_id: &ChannelId,
        client_id: &ClientId,
        reason: &str,
    ) -> Result<(), NodeError> {
        let Some(channel) = self.state.lookup_channel(channel_id) else {
            return Err(NodeError::UnknownChannel(channel_id.clone()));
        };
        let Some(client) = self.state.lookup_client(client_id) else {
            return Err(NodeError::UnknownClient(client_id.clone()));
        };

        // Only locally-homed members part through this node.
        if !channel.local_members.contains(&client.lnick) {
            return Ok(());
        }

        let end = wire::MembershipEnd {
            channel: channel.id(),
            client: client.id(),
            reason: reason.to_string(),
        };
        let (subnet_name, lname, lnick) =
            (channel.subnet.clone(), channel.lname.clone(), client.lnick.clone());

        self.fire(|h| h.on_channel_part(channel, client, reason));

        if let Some(subnet) = self.state.subnets.get_mut(&subnet_name) {
            subnet.remove_member(&lname, &lnick);
        }
        self.send_all(&WireMessage::MembershipEnd(end));
        Ok(())
    }

    pub(super) fn quit(&mut self, client_id: &ClientId, reason: &str) -> Result<(), NodeError> {
        let Some(client) = self.state.lookup_client(client_id) else {
            return Err(NodeError::UnknownClient(client_id.clone()));
        };
        if client.server != self.state.me {
            return Ok(());
        }

        let kill = wire::Kill {
            id: client.id(),
            server: self.state.me.clone(),
            authority: true,
            by: None,
            reason: reason.to_string(),
            reason_code: wire::KillReason::Quit,
        };
        self.process_quit(&client_id.subnet, &client_id.nick);
        self.send_all(&WireMessage::Kill(kill));
        Ok(())
    }

    pub(super) fn channel_message(
        &mut self,
        from: &ClientId,
        channel_id: &ChannelId,
        message: &str,
    ) -> Result<(), NodeError> {
        let Some(channel) = self.state.lookup_channel(channel_id) else {
            return Err(NodeError::UnknownChannel(channel_id.clone()));
        };
        let Some(client) = self.state.lookup_client(from) else {
            return Err(NodeError::UnknownClient(from.clone()));
        };

        self.send_all(&WireMessage::ChannelMessage(wire::ChannelMessage {
            from: client.id(),
            to: channel.id(),
            message: message.to_string(),
        }));
        self.fire(|h| h.on_channel_message(client, channel, message));
        Ok(())
    }

    pub(super) fn private_message(
        &mut self,
        from: &ClientId,
        to: &ClientId,
        message: &str,
    ) -> Result<(), NodeError> {
        let Some(from_client) = self.state.lookup_client(from) else {
            return Err(NodeError::UnknownClient(from.clone()));
        };
        if from_client.server != self.state.me {
            return Ok(());
        }
        let Some(to_client) = self.state.lookup_client(to) else {
            return Err(NodeError::UnknownClient(to.clone()));
        };

        if to_client.server == self.state.me {
            self.fire(|h| h.on_private_message(from_client, to_client, message));
        } else {
            let msg = WireMessage::PrivateMessage(wire::PrivateMessage {
                from: from_client.id(),
                to: to_client.id(),
                message: message.to_string(),
            });
            self.send_to_server(&to_client.server.clone(), &msg);
        }
        Ok(())
    }

    pub(super) fn change_channel_mode(
        &mut self,
        actor: &ClientId,
        channel_id: &ChannelId,
        delta: ChannelModeDelta,
        member_deltas: Vec<MemberModeDelta>,
    ) -> Result<(), NodeError> {
        let Some(channel) = self.state.lookup_channel(channel_id) else {
            return Err(NodeError::UnknownChannel(channel_id.clone()));
        };
        if self.state.lookup_client(actor).is_none() {
            return Err(NodeError::UnknownClient(actor.clone()));
        }

        let (filtered_mode, filtered_members) =
            filter_channel_modes(channel, actor, &delta, &member_deltas);
        let (subnet_name, lname) = (channel.subnet.clone(), channel.lname.clone());

        self.send_all(&WireMessage::ChannelMode(wire::ChannelModeChange {
            from: actor.clone(),
            channel: channel.id(),
            mode: filtered_mode.clone(),
            member_mode: filtered_members.clone(),
        }));

        let (applied, applied_members) = self
            .state
            .subnets
            .get_mut(&subnet_name)
            .and_then(|subnet| subnet.channels.get_mut(&lname))
            .map(|channel| channel.apply_mode_delta(&filtered_mode, &filtered_members))
            .unwrap_or_default();

        if !applied.is_empty() || !applied_members.is_empty() {
            let channel = &self.state.subnets[&subnet_name].channels[&lname];
            let actor_client = self.state.lookup_client(actor);
            self.fire(|h| h.on_channel_mode_change(channel, actor_client, &applied, &applied_members));
        }
        Ok(())
    }

    /// Force-drop the direct link to `server`, running the same split
    /// processing a transport failure would.
    pub(super) fn disconnect_server(&mut self, server: &str) {
        match self.state.network.get(server).and_then(|s| s.link) {
            Some(link_id) => {
                info!(me = %self.state.me, server = %server, "disconnecting server");
                self.split(link_id, "disconnected by operator");
            }
            None => {
                warn!(me = %self.state.me, server = %server, "disconnect of a server that is not directly linked");
            }
        }
    }

    /// Start teardown: flush every handshaken link, drop the rest. The
    /// run loop exits and drains once this returns.
    pub(super) fn begin_shutdown(&mut self) {
        info!(me = %self.state.me, "shutting down");
        for link_id in self.local.keys() {
            if let Some(link) = self.links.get(link_id) {
                link.shutdown();
            }
        }
        for link_id in &self.new_links {
            if let Some(link) = self.links.get(link_id) {
                link.close();
            }
        }
        debug!(me = %self.state.me, "links released");
    }
}
